//! Per-master agent organization: shards, the store, and the replicated
//! population index.
//!
//! The store hands out `&mut Shard` slices to worker threads during the
//! behavior phase; agents never move between shards mid-step, so a
//! behavior's view of its own agent stays valid across every phase of
//! one step. Removal is deferred to meta-evolution time between steps.

use std::collections::{BTreeSet, HashMap};

use indexmap::IndexMap;

use herd_core::id::{AgentGlobalId, AgentLocalId, AgentTypeId, MasterId};
use herd_core::registry::TypeRegistry;

use crate::agent::Agent;

/// One worker thread's partition of the master's agents.
///
/// Iteration order is insertion order, which keeps per-shard outbox
/// drain order deterministic.
#[derive(Debug, Default)]
pub struct Shard {
    agents: IndexMap<AgentGlobalId, Agent>,
}

impl Shard {
    /// Number of agents in this shard.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether the shard holds no agents.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Borrow an agent by global id.
    pub fn get(&self, gid: AgentGlobalId) -> Option<&Agent> {
        self.agents.get(&gid)
    }

    /// Mutably borrow an agent by global id.
    pub fn get_mut(&mut self, gid: AgentGlobalId) -> Option<&mut Agent> {
        self.agents.get_mut(&gid)
    }

    /// Iterate the shard's agents.
    pub fn iter(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    /// Iterate the shard's agents mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Agent> {
        self.agents.values_mut()
    }
}

/// The master's collection of live agents, partitioned into shards and
/// indexed by global identity.
#[derive(Debug)]
pub struct AgentStore {
    shards: Vec<Shard>,
    /// gid → shard index. The stable address book.
    locate: HashMap<AgentGlobalId, usize>,
}

impl AgentStore {
    /// An empty store with `shard_count` shards (one per worker thread).
    pub fn new(shard_count: usize) -> Self {
        assert!(shard_count > 0, "a master needs at least one shard");
        Self {
            shards: (0..shard_count).map(|_| Shard::default()).collect(),
            locate: HashMap::new(),
        }
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Total number of agents on this master.
    pub fn len(&self) -> usize {
        self.locate.len()
    }

    /// Whether this master holds no agents.
    pub fn is_empty(&self) -> bool {
        self.locate.is_empty()
    }

    /// Add an agent to a shard. Replaces nothing: adding a gid twice is
    /// a programming error.
    pub fn add(&mut self, shard: usize, registry: &TypeRegistry, agent: Agent) -> AgentGlobalId {
        let gid = agent.gid(registry);
        let prev = self.locate.insert(gid, shard);
        debug_assert!(prev.is_none(), "agent {gid} added twice");
        self.shards[shard].agents.insert(gid, agent);
        gid
    }

    /// Remove an agent. Must only be called between steps (behaviors
    /// hold references into shards for the duration of one step).
    pub fn remove(&mut self, gid: AgentGlobalId) -> Option<Agent> {
        let shard = self.locate.remove(&gid)?;
        self.shards[shard].agents.shift_remove(&gid)
    }

    /// Whether this master holds the agent.
    pub fn contains(&self, gid: AgentGlobalId) -> bool {
        self.locate.contains_key(&gid)
    }

    /// Borrow an agent by global id.
    pub fn get(&self, gid: AgentGlobalId) -> Option<&Agent> {
        let shard = *self.locate.get(&gid)?;
        self.shards[shard].get(gid)
    }

    /// Mutably borrow an agent by global id.
    pub fn get_mut(&mut self, gid: AgentGlobalId) -> Option<&mut Agent> {
        let shard = *self.locate.get(&gid)?;
        self.shards[shard].get_mut(gid)
    }

    /// The shard index holding an agent, if local.
    pub fn shard_of(&self, gid: AgentGlobalId) -> Option<usize> {
        self.locate.get(&gid).copied()
    }

    /// The shard with the fewest agents; where births and arrivals land.
    pub fn least_loaded_shard(&self) -> usize {
        self.shards
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| s.len())
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    /// Borrow all shards.
    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    /// Mutably borrow all shards (the behavior phase splits this across
    /// workers).
    pub fn shards_mut(&mut self) -> &mut [Shard] {
        &mut self.shards
    }

    /// Iterate every owned agent, shard by shard.
    pub fn iter_owned(&self) -> impl Iterator<Item = &Agent> {
        self.shards.iter().flat_map(|s| s.iter())
    }

    /// Iterate every owned agent mutably, shard by shard.
    pub fn iter_owned_mut(&mut self) -> impl Iterator<Item = &mut Agent> {
        self.shards.iter_mut().flat_map(|s| s.iter_mut())
    }
}

/// The replicated view of the whole population: identical on every
/// master, mutated only between steps during meta-evolution.
#[derive(Clone, Debug)]
pub struct PopulationIndex {
    /// gid → owning master, for every live agent everywhere.
    owner: HashMap<AgentGlobalId, MasterId>,
    /// Per type, the ordered set of live local ids.
    ids_by_type: Vec<BTreeSet<AgentLocalId>>,
    /// Per type, max live local id + 1 (0 if none ever existed).
    id_bound: Vec<u64>,
}

impl PopulationIndex {
    /// An empty index for a model with `type_count` agent types.
    pub fn new(type_count: u32) -> Self {
        Self {
            owner: HashMap::new(),
            ids_by_type: (0..type_count).map(|_| BTreeSet::new()).collect(),
            id_bound: vec![0; type_count as usize],
        }
    }

    /// Record a live agent and its owner.
    pub fn insert(&mut self, registry: &TypeRegistry, gid: AgentGlobalId, owner: MasterId) {
        let ty = registry.type_of(gid);
        let local = registry.local_of(gid);
        self.owner.insert(gid, owner);
        self.ids_by_type[ty.0 as usize].insert(local);
        let bound = &mut self.id_bound[ty.0 as usize];
        *bound = (*bound).max(local.0 + 1);
    }

    /// Remove a dead agent. The id bound never shrinks, so the id is
    /// not reused.
    pub fn remove(&mut self, registry: &TypeRegistry, gid: AgentGlobalId) {
        let ty = registry.type_of(gid);
        let local = registry.local_of(gid);
        self.owner.remove(&gid);
        self.ids_by_type[ty.0 as usize].remove(&local);
    }

    /// Re-home a migrated agent.
    pub fn set_owner(&mut self, gid: AgentGlobalId, owner: MasterId) {
        if let Some(slot) = self.owner.get_mut(&gid) {
            *slot = owner;
        }
    }

    /// The owning master of an agent, if it exists.
    pub fn owner(&self, gid: AgentGlobalId) -> Option<MasterId> {
        self.owner.get(&gid).copied()
    }

    /// Whether the agent exists anywhere in the simulation.
    pub fn exists(&self, ty: AgentTypeId, local: AgentLocalId) -> bool {
        self.ids_by_type
            .get(ty.0 as usize)
            .is_some_and(|set| set.contains(&local))
    }

    /// The ordered set of live local ids of one type.
    pub fn agents_of_type(&self, ty: AgentTypeId) -> &BTreeSet<AgentLocalId> {
        &self.ids_by_type[ty.0 as usize]
    }

    /// Max live local id of a type, plus one. Fresh births allocate from
    /// here.
    pub fn id_bound(&self, ty: AgentTypeId) -> AgentLocalId {
        AgentLocalId(self.id_bound[ty.0 as usize])
    }

    /// Total live agents across all masters.
    pub fn len(&self) -> usize {
        self.owner.len()
    }

    /// Whether the simulation has no agents.
    pub fn is_empty(&self) -> bool {
        self.owner.is_empty()
    }

    /// All live gids in ascending order. Every master derives window
    /// offsets from this list, so its ordering is contractual.
    pub fn sorted_gids(&self) -> Vec<AgentGlobalId> {
        let mut gids: Vec<AgentGlobalId> = self.owner.keys().copied().collect();
        gids.sort_unstable();
        gids
    }
}
