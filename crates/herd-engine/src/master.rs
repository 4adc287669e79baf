//! The master: one peer process of the simulation.
//!
//! A master owns its partition of the agent population, the replicated
//! population index, both attribute windows, the interaction router,
//! and the per-shard working state (scratch caches, outboxes, evolution
//! queues). Construction runs the collective initialization protocol:
//! the root distributes the initial population, every peer builds the
//! same owner map and window plan, and the windows are filled before
//! the first step.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use herd_core::codec::{write_bytes, write_u32_le, write_u64_le, ByteReader};
use herd_core::error::ProtocolError;
use herd_core::id::{AgentGlobalId, AgentLocalId, AgentTypeId, AttrId, MasterId, StepId};
use herd_core::registry::TypeRegistry;
use herd_core::value::Value;
use herd_agent::{Agent, AgentStore, BehaviorTable, PopulationIndex};
use herd_fabric::Fabric;
use herd_router::{Outbox, Router};
use herd_snapshot::AgentSeed;
use herd_window::{ScratchCache, WindowLayer, WindowPlan};

use crate::config::MasterConfig;
use crate::error::StepError;
use crate::evolution::EvoQueue;
use crate::heuristics::{self, MigrationHeuristic};

/// Tag for initial agent payload shipments from the root.
pub(crate) const TAG_INIT_AGENT: u64 = 16;
/// Tag for modify-attribute value shipments from the root.
pub(crate) const TAG_MODIFY_VALUE: u64 = 17;

/// One peer of the simulation.
pub struct Master {
    pub(crate) id: MasterId,
    pub(crate) fabric: Arc<dyn Fabric>,
    pub(crate) registry: Arc<TypeRegistry>,
    pub(crate) behaviors: BehaviorTable,
    pub(crate) heuristic: Arc<dyn MigrationHeuristic>,
    pub(crate) store: AgentStore,
    pub(crate) index: PopulationIndex,
    pub(crate) windows: WindowLayer,
    pub(crate) router: Router,
    /// One scratch cache per shard worker.
    pub(crate) scratch: Vec<ScratchCache>,
    /// One outbox per shard worker.
    pub(crate) outboxes: Vec<Outbox>,
    /// One evolution queue per shard worker.
    pub(crate) evo_queues: Vec<EvoQueue>,
    pub(crate) step: StepId,
    pub(crate) period: u64,
    pub(crate) cancel: Arc<AtomicBool>,
}

impl Master {
    /// Stand up a master over a fabric endpoint.
    ///
    /// `seeds` is the initial population and is only meaningful on the
    /// root; every other master must pass an empty vector. The call is
    /// collective: all masters must enter it together.
    pub fn init(
        config: MasterConfig,
        fabric: Arc<dyn Fabric>,
        seeds: Vec<AgentSeed>,
    ) -> Result<Self, StepError> {
        let MasterConfig {
            registry,
            behaviors,
            heuristic,
            threads,
        } = config;
        let id = fabric.master_id();
        let masters = fabric.master_count();

        // Root assigns owners and broadcasts the (gid, owner) pairs;
        // every master builds the identical owner map from them.
        let assignment = if id.is_root() {
            heuristics::assign_masters(&seeds, masters)
        } else {
            Vec::new()
        };
        let blob = if id.is_root() {
            encode_population(&registry, &seeds, &assignment)
        } else {
            Vec::new()
        };
        let blob = fabric.broadcast(MasterId::ROOT, blob)?;
        let pairs = decode_population(&blob)?;

        let mut index = PopulationIndex::new(registry.agent_type_count());
        for &(gid, owner) in &pairs {
            index.insert(&registry, gid, owner);
        }

        // The root ships each remote agent's payload to its owner.
        let arrivals: Vec<AgentSeed> = if id.is_root() {
            let mut mine = Vec::new();
            for (seed, &owner) in seeds.into_iter().zip(&assignment) {
                if owner == id {
                    mine.push(seed);
                } else {
                    fabric.send(owner, TAG_INIT_AGENT, encode_seed(&seed))?;
                }
            }
            mine
        } else {
            let expected = pairs.iter().filter(|(_, owner)| *owner == id).count();
            let mut mine = Vec::with_capacity(expected);
            for _ in 0..expected {
                let bytes = fabric.recv(MasterId::ROOT, TAG_INIT_AGENT)?;
                mine.push(decode_seed(&registry, &bytes)?);
            }
            mine
        };

        // Spread arrivals across shards round-robin.
        let mut store = AgentStore::new(threads);
        let shard_assign = heuristics::assign_shards(arrivals.len(), threads);
        for (seed, shard) in arrivals.into_iter().zip(shard_assign) {
            let agent = Agent::new(&registry, seed.ty, seed.local_id, id, seed.payload);
            store.add(shard, &registry, agent);
        }

        // Plan, verify, and allocate the windows.
        let mut windows = WindowLayer::new(Arc::clone(&fabric), Arc::clone(&registry));
        let plan = WindowPlan::build(&registry, masters, &pairs);
        windows.install_plan(plan)?;

        let router = Router::new(Arc::clone(&fabric), Arc::clone(&registry));
        let itypes = registry.interaction_type_count();

        let mut master = Self {
            id,
            registry,
            behaviors,
            heuristic,
            store,
            index,
            windows,
            router,
            scratch: (0..threads).map(|_| ScratchCache::new(1024)).collect(),
            outboxes: (0..threads).map(|_| Outbox::new(masters, itypes)).collect(),
            evo_queues: (0..threads).map(|_| EvoQueue::default()).collect(),
            step: StepId(0),
            period: 1,
            cancel: Arc::new(AtomicBool::new(false)),
            fabric,
        };
        master.fill_windows()?;
        info!(
            master = %master.id,
            masters,
            agents = master.store.len(),
            population = master.index.len(),
            "master initialized"
        );
        Ok(master)
    }

    /// This master's rank.
    pub fn master_id(&self) -> MasterId {
        self.id
    }

    /// The current time step.
    pub fn time_step(&self) -> StepId {
        self.step
    }

    /// Steps executed per `run` order.
    pub fn period(&self) -> u64 {
        self.period
    }

    /// The type registry.
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// The local agent store.
    pub fn store(&self) -> &AgentStore {
        &self.store
    }

    /// The replicated population index.
    pub fn index(&self) -> &PopulationIndex {
        &self.index
    }

    /// Whether an agent exists anywhere in the simulation.
    pub fn does_agent_exist(&self, ty: AgentTypeId, local: AgentLocalId) -> bool {
        self.index.exists(ty, local)
    }

    /// Max live local id of a type, plus one.
    pub fn id_bound(&self, ty: AgentTypeId) -> AgentLocalId {
        self.index.id_bound(ty)
    }

    /// The cancellation flag: setting it makes an in-flight run exit to
    /// idle at the next phase boundary.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Replace the migration heuristic. Takes effect at the next
    /// meta-evolution; every master should install the same policy.
    pub fn set_migration_heuristic(&mut self, heuristic: Arc<dyn MigrationHeuristic>) {
        self.heuristic = heuristic;
    }

    pub(crate) fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Read one attribute of a locally held agent by names. Intended
    /// for inspection from the control side; behaviors use their
    /// context instead.
    pub fn read_attribute(
        &self,
        type_name: &str,
        local_id: AgentLocalId,
        attr_name: &str,
    ) -> Option<Value> {
        let ty = self.registry.agent_type_by_name(type_name).ok()?;
        let attr = self.registry.attr_by_name(ty, attr_name).ok()?;
        let gid = self.registry.global_id(ty, local_id);
        let agent = self.store.get(gid)?;
        agent.attr_value(&self.registry, attr).ok()
    }

    /// Apply a validated attribute write to a locally held agent.
    pub(crate) fn apply_attribute_bytes(
        &mut self,
        gid: AgentGlobalId,
        attr: AttrId,
        bytes: &[u8],
    ) -> Result<(), StepError> {
        let registry = Arc::clone(&self.registry);
        let ty = registry.type_of(gid);
        let expected = registry.field_descriptor(ty, attr).size as usize;
        if bytes.len() != expected {
            return Err(StepError::Protocol(ProtocolError::MalformedMessage {
                detail: format!(
                    "attribute payload for agent {gid} is {} bytes, expected {expected}",
                    bytes.len()
                ),
            }));
        }
        let agent = self.store.get_mut(gid).ok_or(StepError::Protocol(
            ProtocolError::OwnerDivergence { gid },
        ))?;
        agent.set_attr_bytes(&registry, attr, bytes);
        Ok(())
    }
}

impl std::fmt::Debug for Master {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Master")
            .field("id", &self.id)
            .field("step", &self.step)
            .field("agents", &self.store.len())
            .field("population", &self.index.len())
            .finish()
    }
}

// ── Init wire helpers ───────────────────────────────────────────

fn encode_population(
    registry: &TypeRegistry,
    seeds: &[AgentSeed],
    assignment: &[MasterId],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + seeds.len() * 12);
    write_u64_le(&mut out, seeds.len() as u64);
    for (seed, owner) in seeds.iter().zip(assignment) {
        write_u64_le(&mut out, registry.global_id(seed.ty, seed.local_id).0);
        write_u32_le(&mut out, owner.0);
    }
    out
}

fn decode_population(bytes: &[u8]) -> Result<Vec<(AgentGlobalId, MasterId)>, StepError> {
    let malformed = |detail: String| {
        StepError::Protocol(ProtocolError::MalformedMessage { detail })
    };
    let mut r = ByteReader::new(bytes);
    let count = r
        .read_u64_le()
        .map_err(|e| malformed(format!("population header: {e}")))? as usize;
    let mut pairs = Vec::with_capacity(count);
    for _ in 0..count {
        let gid = AgentGlobalId(
            r.read_u64_le()
                .map_err(|e| malformed(format!("population entry: {e}")))?,
        );
        let owner = MasterId(
            r.read_u32_le()
                .map_err(|e| malformed(format!("population entry: {e}")))?,
        );
        pairs.push((gid, owner));
    }
    Ok(pairs)
}

fn encode_seed(seed: &AgentSeed) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + seed.payload.len());
    write_u32_le(&mut out, seed.ty.0);
    write_u64_le(&mut out, seed.local_id.0);
    write_bytes(&mut out, &seed.payload);
    out
}

fn decode_seed(registry: &TypeRegistry, bytes: &[u8]) -> Result<AgentSeed, StepError> {
    let malformed = |detail: String| {
        StepError::Protocol(ProtocolError::MalformedMessage { detail })
    };
    let mut r = ByteReader::new(bytes);
    let ty = AgentTypeId(
        r.read_u32_le()
            .map_err(|e| malformed(format!("agent seed: {e}")))?,
    );
    if ty.0 >= registry.agent_type_count() {
        return Err(malformed(format!("agent seed names unknown type {ty}")));
    }
    let local_id = AgentLocalId(
        r.read_u64_le()
            .map_err(|e| malformed(format!("agent seed: {e}")))?,
    );
    let payload = r
        .read_bytes()
        .map_err(|e| malformed(format!("agent seed payload: {e}")))?
        .to_vec();
    if payload.len() != registry.agent_type(ty).payload_size as usize {
        return Err(malformed(format!(
            "agent seed payload is {} bytes, expected {}",
            payload.len(),
            registry.agent_type(ty).payload_size
        )));
    }
    Ok(AgentSeed {
        ty,
        local_id,
        payload,
    })
}
