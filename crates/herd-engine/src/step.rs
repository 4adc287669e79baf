//! The step pipeline: publish → meta-evolution → exchange → dispatch →
//! behavior, every phase transition a global barrier.
//!
//! Phase contracts:
//!
//! * **publish** — owners copy their agents' public structs into the
//!   local public window and replicate every critical attribute that
//!   changed since the last publish, inside a critical-window epoch.
//! * **meta-evolution** — death/birth/migration requests are gathered
//!   and applied identically everywhere; the window plan is rebuilt and
//!   the windows refilled when the population changed.
//! * **exchange / dispatch** — the router's bulk transfer, then
//!   delivery into per-type mailboxes (cleared first: a mailbox holds
//!   exactly the interactions delivered this step).
//! * **behavior** — a public-window read epoch opens and one worker per
//!   shard runs its agents' behaviors in parallel.
//!
//! Cancellation is honored between phases only; a phase always runs to
//! completion.

use std::sync::Arc;

use tracing::{debug, warn};

use herd_core::error::{ModelError, ProtocolError};
use herd_core::id::{AgentGlobalId, AgentLocalId, AgentTypeId, AttrId, MasterId, StepId};
use herd_core::registry::TypeRegistry;
use herd_core::value::Value;
use herd_core::Interaction;
use herd_agent::{
    Agent, AttributeRead, BehaviorCtx, BehaviorTable, InteractionSink, PopulationIndex, Shard,
};
use herd_fabric::WindowKind;
use herd_router::Outbox;
use herd_window::{ScratchCache, WindowLayer, WindowPlan};

use crate::error::StepError;
use crate::evolution::{encode_records, decode_records, EvoKind, EvoQueue, EvoRecord};
use crate::master::Master;

impl Master {
    /// Run `steps` time steps, stopping early (to idle, without error)
    /// if any master's cancellation flag is raised between phases.
    pub fn run(&mut self, steps: u64) -> Result<(), StepError> {
        for _ in 0..steps {
            if self.cancel_sync()? {
                debug!(master = %self.id, step = %self.step, "run cancelled between steps");
                break;
            }
            if !self.run_time_step()? {
                break;
            }
        }
        Ok(())
    }

    /// Execute one full step of the pipeline.
    ///
    /// Returns `false` when the step was cut short by cancellation at a
    /// phase boundary (the phases already run always ran to completion
    /// on every master).
    pub fn run_time_step(&mut self) -> Result<bool, StepError> {
        self.step = StepId(self.step.0 + 1);

        self.publish_phase()?;
        self.fabric.barrier()?;
        if self.cancel_sync()? {
            return Ok(false);
        }
        self.meta_evolution()?;
        self.fabric.barrier()?;
        if self.cancel_sync()? {
            return Ok(false);
        }
        self.exchange_phase()?;
        self.fabric.barrier()?;
        if self.cancel_sync()? {
            return Ok(false);
        }
        self.dispatch_phase()?;
        self.fabric.barrier()?;
        if self.cancel_sync()? {
            return Ok(false);
        }
        self.behavior_phase()?;
        self.fabric.barrier()?;
        debug!(master = %self.id, step = %self.step, "step complete");
        Ok(true)
    }

    /// Collective cancellation check: true when any master has its
    /// flag raised. Keeping the decision collective is what lets every
    /// master exit to idle at the same phase boundary.
    fn cancel_sync(&self) -> Result<bool, StepError> {
        let flags = self
            .fabric
            .all_gather(vec![u8::from(self.cancelled())])?;
        Ok(flags.iter().any(|f| f.first().copied().unwrap_or(0) != 0))
    }

    // ── publish ──────────────────────────────────────────────

    /// Mirror owned agents' public structs into the local window and
    /// replicate changed critical attributes to every peer.
    pub(crate) fn publish_phase(&mut self) -> Result<(), StepError> {
        let registry = Arc::clone(&self.registry);
        let mut published: Vec<AgentGlobalId> = Vec::new();
        {
            let epoch = self.windows.epoch(WindowKind::Critical)?;
            let mut image = Vec::new();
            for agent in self.store.iter_owned() {
                let gid = agent.gid(&registry);
                let public_size = registry.public_struct_size(agent.ty()) as usize;
                if public_size > 0 {
                    image.resize(public_size, 0);
                    agent.copy_public_into(&registry, &mut image);
                    self.windows.write_public_local(gid, &image)?;
                }
                let changed = agent.changed_critical(&registry);
                if !changed.is_empty() {
                    for attr in changed {
                        self.windows.publish_critical(
                            gid,
                            attr,
                            agent.attr_bytes(&registry, attr),
                        )?;
                    }
                    published.push(gid);
                }
            }
            epoch.close()?;
        }
        for gid in published {
            if let Some(agent) = self.store.get_mut(gid) {
                agent.mark_critical_published(&registry);
            }
        }
        Ok(())
    }

    /// Fill both windows from scratch: every owned agent's public
    /// struct plus a full critical replication. Used at initialization
    /// and after any re-plan, when offsets may have shifted for
    /// everyone.
    pub(crate) fn fill_windows(&mut self) -> Result<(), StepError> {
        let registry = Arc::clone(&self.registry);
        {
            let epoch = self.windows.epoch(WindowKind::Critical)?;
            let mut image = Vec::new();
            for agent in self.store.iter_owned() {
                let gid = agent.gid(&registry);
                let public_size = registry.public_struct_size(agent.ty()) as usize;
                if public_size > 0 {
                    image.resize(public_size, 0);
                    agent.copy_public_into(&registry, &mut image);
                    self.windows.write_public_local(gid, &image)?;
                }
                self.windows
                    .publish_critical_struct(gid, &agent.critical_image(&registry))?;
            }
            epoch.close()?;
        }
        self.fabric.barrier()?;
        for agent in self.store.iter_owned_mut() {
            agent.mark_critical_published(&registry);
        }
        Ok(())
    }

    // ── meta-evolution ───────────────────────────────────────

    /// Gather this step's death/birth/migration requests, apply them
    /// deterministically on every master, and re-plan the windows if
    /// the population changed.
    pub(crate) fn meta_evolution(&mut self) -> Result<(), StepError> {
        let registry = Arc::clone(&self.registry);

        // Local records: deaths, then migrations, then births.
        let mut records: Vec<EvoRecord> = Vec::new();
        for queue in &mut self.evo_queues {
            for gid in queue.deaths.drain(..) {
                records.push(EvoRecord {
                    kind: EvoKind::Death,
                    gid,
                    ty: registry.type_of(gid),
                    origin: self.id,
                    destination: MasterId(0),
                    payload: Vec::new(),
                });
            }
        }
        for migration in self.heuristic.plan(&registry, &self.index, &self.store) {
            let ty = registry.type_of(migration.gid);
            // Sendability is validated on the apply path, after the
            // all-gather, so every master aborts at the same point.
            match self.store.get(migration.gid) {
                Some(agent) => records.push(EvoRecord {
                    kind: EvoKind::Migration,
                    gid: migration.gid,
                    ty,
                    origin: self.id,
                    destination: migration.destination,
                    payload: agent.sendable_payload(&registry),
                }),
                None => warn!(
                    gid = %migration.gid,
                    "migration heuristic proposed an agent this master does not hold; skipped"
                ),
            }
        }
        for queue in &mut self.evo_queues {
            for (ty, payload) in queue.births.drain(..) {
                records.push(EvoRecord {
                    kind: EvoKind::Birth,
                    gid: AgentGlobalId(0),
                    ty,
                    origin: self.id,
                    destination: self.id,
                    payload,
                });
            }
        }

        // Replicate every master's records.
        let gathered = self.fabric.all_gather(encode_records(&records))?;
        let mut all: Vec<EvoRecord> = Vec::new();
        for part in &gathered {
            all.extend(decode_records(part).map_err(ProtocolError::from)?);
        }
        if all.is_empty() {
            return Ok(());
        }

        self.apply_records(&all)?;

        // Offsets shift whenever the population changes, so the plan is
        // rebuilt and the windows refilled.
        let pairs: Vec<_> = self
            .index
            .sorted_gids()
            .into_iter()
            .filter_map(|gid| self.index.owner(gid).map(|owner| (gid, owner)))
            .collect();
        let plan = WindowPlan::build(&registry, self.fabric.master_count(), &pairs);
        self.windows.install_plan(plan)?;
        self.fill_windows()?;
        Ok(())
    }

    /// Apply a replicated record list: all deaths, then all migrations,
    /// then all births, in gather order.
    fn apply_records(&mut self, all: &[EvoRecord]) -> Result<(), StepError> {
        let registry = Arc::clone(&self.registry);

        for record in all.iter().filter(|r| r.kind == EvoKind::Death) {
            if self.index.owner(record.gid).is_none() {
                // Duplicate request (an agent may ask to die more than
                // once per step); the first one won.
                continue;
            }
            self.index.remove(&registry, record.gid);
            self.store.remove(record.gid);
        }

        for record in all.iter().filter(|r| r.kind == EvoKind::Migration) {
            let Some(owner) = self.index.owner(record.gid) else {
                warn!(gid = %record.gid, "migration of an agent that died this step; skipped");
                continue;
            };
            if owner != record.origin {
                return Err(StepError::Protocol(ProtocolError::OwnerDivergence {
                    gid: record.gid,
                }));
            }
            let ty = registry.type_of(record.gid);
            if !registry.is_sendable_agent(ty) {
                return Err(StepError::Protocol(ProtocolError::NonSendableMigration {
                    gid: record.gid,
                    type_name: registry.agent_type(ty).name.clone(),
                }));
            }
            self.index.set_owner(record.gid, record.destination);
            if record.origin == self.id && record.destination != self.id {
                self.store.remove(record.gid);
            } else if record.destination == self.id && record.origin != self.id {
                let agent = self.agent_from_wire(ty, registry.local_of(record.gid), &record.payload)?;
                let shard = self.store.least_loaded_shard();
                self.store.add(shard, &registry, agent);
            }
        }

        for record in all.iter().filter(|r| r.kind == EvoKind::Birth) {
            let local = self.index.id_bound(record.ty);
            let gid = registry.global_id(record.ty, local);
            self.index.insert(&registry, gid, record.destination);
            if record.destination == self.id {
                let agent = self.agent_from_wire(record.ty, local, &record.payload)?;
                let shard = self.store.least_loaded_shard();
                self.store.add(shard, &registry, agent);
            }
        }
        Ok(())
    }

    fn agent_from_wire(
        &self,
        ty: AgentTypeId,
        local: AgentLocalId,
        payload: &[u8],
    ) -> Result<Agent, StepError> {
        let expected = self.registry.agent_type(ty).payload_size as usize;
        if payload.len() != expected {
            return Err(StepError::Protocol(ProtocolError::MalformedMessage {
                detail: format!(
                    "agent payload for type '{}' is {} bytes, expected {expected}",
                    self.registry.agent_type(ty).name,
                    payload.len()
                ),
            }));
        }
        Ok(Agent::new(
            &self.registry,
            ty,
            local,
            self.id,
            payload.to_vec(),
        ))
    }

    // ── exchange / dispatch ──────────────────────────────────

    pub(crate) fn exchange_phase(&mut self) -> Result<(), StepError> {
        self.router.exchange(&mut self.outboxes)?;
        Ok(())
    }

    pub(crate) fn dispatch_phase(&mut self) -> Result<(), StepError> {
        for agent in self.store.iter_owned_mut() {
            agent.clear_mailboxes();
        }
        self.router.dispatch(&mut self.store)?;
        Ok(())
    }

    // ── behavior ─────────────────────────────────────────────

    /// Open the public read epoch and run one worker per shard.
    pub(crate) fn behavior_phase(&mut self) -> Result<(), StepError> {
        let step = self.step;
        let registry = Arc::clone(&self.registry);
        let behaviors = &self.behaviors;
        let index = &self.index;
        let windows = &self.windows;
        let shards = self.store.shards_mut();
        let scratches = &mut self.scratch;
        let outboxes = &mut self.outboxes;
        let evo_queues = &mut self.evo_queues;

        let epoch = windows.epoch(WindowKind::Public)?;
        let result: Result<(), StepError> = std::thread::scope(|scope| {
            let mut workers = Vec::with_capacity(shards.len());
            for (((shard, cache), outbox), evo) in shards
                .iter_mut()
                .zip(scratches.iter_mut())
                .zip(outboxes.iter_mut())
                .zip(evo_queues.iter_mut())
            {
                let registry = Arc::clone(&registry);
                workers.push(scope.spawn(move || {
                    run_shard(step, &registry, behaviors, index, windows, shard, cache, outbox, evo)
                }));
            }
            for worker in workers {
                worker.join().map_err(|_| {
                    StepError::Protocol(ProtocolError::OrderDesync {
                        detail: "a behavior worker panicked".into(),
                    })
                })??;
            }
            Ok(())
        });
        match result {
            Ok(()) => epoch.close()?,
            Err(e) => {
                // The guard's drop releases the epoch on this path.
                drop(epoch);
                return Err(e);
            }
        }
        Ok(())
    }
}

// ── Shard worker ────────────────────────────────────────────────

/// Resolves a behavior's remote reads through the window layer, with
/// this worker's scratch cache.
struct WindowReads<'a> {
    registry: &'a TypeRegistry,
    index: &'a PopulationIndex,
    windows: &'a WindowLayer,
    cache: &'a mut ScratchCache,
}

impl AttributeRead for WindowReads<'_> {
    fn read(&mut self, gid: AgentGlobalId, attr: AttrId) -> Result<Value, ModelError> {
        let ty = self.registry.type_of(gid);
        if self.registry.is_critical(ty, attr) {
            return self.windows.read_critical(gid, attr);
        }
        let owner = self.index.owner(gid).ok_or_else(|| ModelError::AgentNotFound {
            local_id: self.registry.local_of(gid),
            type_name: self.registry.agent_type(ty).name.clone(),
        })?;
        self.windows.read_public(self.cache, owner, gid, attr)
    }
}

/// Routes a behavior's sends into this worker's outbox.
struct OutboxSink<'a> {
    registry: &'a TypeRegistry,
    index: &'a PopulationIndex,
    outbox: &'a mut Outbox,
}

impl InteractionSink for OutboxSink<'_> {
    fn push(&mut self, interaction: Interaction) {
        self.outbox.push(self.registry, self.index, interaction);
    }
}

#[allow(clippy::too_many_arguments)]
fn run_shard(
    step: StepId,
    registry: &TypeRegistry,
    behaviors: &BehaviorTable,
    index: &PopulationIndex,
    windows: &WindowLayer,
    shard: &mut Shard,
    cache: &mut ScratchCache,
    outbox: &mut Outbox,
    evo: &mut EvoQueue,
) -> Result<(), StepError> {
    cache.reset();
    for agent in shard.iter_mut() {
        let ty = agent.ty();
        let behavior = behaviors.for_type(ty);
        let mut reads = WindowReads {
            registry,
            index,
            windows,
            cache: &mut *cache,
        };
        let mut sink = OutboxSink {
            registry,
            index,
            outbox: &mut *outbox,
        };
        let mut ctx =
            BehaviorCtx::new(step, registry, index, &mut reads, &mut sink, &mut *evo, agent);
        match behavior.step(&mut ctx) {
            Ok(()) => {}
            Err(ModelError::AgentNotFound { local_id, type_name }) => {
                // Recoverable: the behavior body ended early, the step
                // continues.
                warn!(
                    behavior = behavior.name(),
                    %local_id,
                    type_name = %type_name,
                    "behavior ended early: target agent not found"
                );
            }
            Err(ModelError::NoSuchAttribute { type_name, attr }) => {
                warn!(
                    behavior = behavior.name(),
                    type_name = %type_name,
                    attr,
                    "behavior ended early: no such attribute"
                );
            }
            Err(ModelError::Transport(e)) => return Err(StepError::Transport(e)),
        }
    }
    Ok(())
}
