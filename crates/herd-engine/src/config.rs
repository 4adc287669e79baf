//! Master configuration.

use std::sync::Arc;

use herd_core::registry::TypeRegistry;
use herd_agent::BehaviorTable;

use crate::heuristics::{MigrationHeuristic, NoMigration};

/// Everything needed to stand up one master over a fabric endpoint.
///
/// Cloneable so a test harness can hand the same model to every peer.
#[derive(Clone)]
pub struct MasterConfig {
    /// The immutable type catalog. Must be identical on every master.
    pub registry: Arc<TypeRegistry>,
    /// Behavior dispatch table, one entry per agent type.
    pub behaviors: BehaviorTable,
    /// Migration policy consulted during meta-evolution.
    pub heuristic: Arc<dyn MigrationHeuristic>,
    /// Worker threads (shards) per master.
    pub threads: usize,
}

impl MasterConfig {
    /// A configuration with the default migration policy (none) and a
    /// given shard count.
    pub fn new(registry: Arc<TypeRegistry>, behaviors: BehaviorTable, threads: usize) -> Self {
        Self {
            registry,
            behaviors,
            heuristic: Arc::new(NoMigration),
            threads: threads.max(1),
        }
    }

    /// Replace the migration heuristic.
    pub fn with_heuristic(mut self, heuristic: Arc<dyn MigrationHeuristic>) -> Self {
        self.heuristic = heuristic;
        self
    }
}

impl std::fmt::Debug for MasterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterConfig")
            .field("agent_types", &self.registry.agent_type_count())
            .field("interaction_types", &self.registry.interaction_type_count())
            .field("threads", &self.threads)
            .finish()
    }
}
