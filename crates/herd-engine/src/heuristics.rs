//! Placement heuristics: initial agent distribution across masters and
//! shards, and the migration policy plug-in.

use herd_core::id::{AgentGlobalId, MasterId};
use herd_core::registry::TypeRegistry;
use herd_agent::{AgentStore, PopulationIndex};
use herd_snapshot::AgentSeed;

/// Assign initial agents to masters so every master gets the same
/// amount, give or take one.
pub fn assign_masters(seeds: &[AgentSeed], masters: u32) -> Vec<MasterId> {
    seeds
        .iter()
        .enumerate()
        .map(|(i, _)| MasterId((i % masters as usize) as u32))
        .collect()
}

/// Assign `count` received agents to shards round-robin.
pub fn assign_shards(count: usize, shards: usize) -> Vec<usize> {
    (0..count).map(|i| i % shards.max(1)).collect()
}

/// One planned migration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Migration {
    /// The agent to move. Must be owned by the planning master.
    pub gid: AgentGlobalId,
    /// Where it goes.
    pub destination: MasterId,
}

/// Migration policy consulted during meta-evolution, with access to the
/// population and this master's load.
///
/// Implementations must only propose agents the planning master owns;
/// proposing a non-sendable agent type aborts meta-evolution.
pub trait MigrationHeuristic: Send + Sync {
    /// Decide this master's outgoing migrations for the step.
    fn plan(
        &self,
        registry: &TypeRegistry,
        index: &PopulationIndex,
        store: &AgentStore,
    ) -> Vec<Migration>;
}

/// The default policy: agents stay where they are.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoMigration;

impl MigrationHeuristic for NoMigration {
    fn plan(
        &self,
        _registry: &TypeRegistry,
        _index: &PopulationIndex,
        _store: &AgentStore,
    ) -> Vec<Migration> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_assignment_is_balanced() {
        let seeds: Vec<AgentSeed> = Vec::new();
        assert!(assign_masters(&seeds, 3).is_empty());

        let owners = assign_shards(7, 3);
        let count = |k| owners.iter().filter(|&&s| s == k).count();
        assert_eq!(count(0), 3);
        assert_eq!(count(1), 2);
        assert_eq!(count(2), 2);
    }

    #[test]
    fn zero_shards_is_treated_as_one() {
        assert_eq!(assign_shards(2, 0), vec![0, 0]);
    }
}
