//! Meta-evolution scenarios: deaths, births, migrations, and the
//! non-sendable migration abort.

mod common;

use std::sync::Arc;

use herd_core::error::{ModelError, ProtocolError};
use herd_core::id::{AgentLocalId, MasterId};
use herd_core::registry::{AgentTypeBuilder, RegistryBuilder, TypeRegistry};
use herd_core::value::Value;
use herd_core::wire::{ScalarKind, WireShape};
use herd_agent::{AgentStore, Behavior, BehaviorCtx, BehaviorTable, PopulationIndex};
use herd_engine::{Migration, MigrationHeuristic, StepError};

use common::{run_cluster, seeds_i64};

fn cell_registry(sendable: bool) -> Arc<TypeRegistry> {
    let mut ty = AgentTypeBuilder::new("cell").public("v", WireShape::Scalar(ScalarKind::I64));
    if !sendable {
        ty = ty.private("scratchpad", WireShape::Opaque { size: 8 });
    }
    Arc::new(RegistryBuilder::new().agent(ty).build().unwrap())
}

/// One agent asks to die at a given step.
struct DieAt {
    step: u64,
    victim: u64,
}

impl Behavior for DieAt {
    fn name(&self) -> &str {
        "die-at"
    }

    fn step(&self, ctx: &mut BehaviorCtx<'_>) -> Result<(), ModelError> {
        if ctx.step().0 == self.step && ctx.self_id().0 == self.victim {
            ctx.request_death();
        }
        Ok(())
    }
}

/// Agent 0 asks for one birth at a given step.
struct SpawnAt {
    step: u64,
}

impl Behavior for SpawnAt {
    fn name(&self) -> &str {
        "spawn-at"
    }

    fn step(&self, ctx: &mut BehaviorCtx<'_>) -> Result<(), ModelError> {
        if ctx.step().0 == self.step && ctx.self_id().0 == 0 {
            let ty = ctx.self_type();
            let payload = Value::Object(
                [("v".to_string(), Value::I64(5))].into_iter().collect(),
            );
            let _ = ctx.request_birth(ty, &payload);
        }
        Ok(())
    }
}

/// Moves agent 0 of type `cell` to a fixed destination whenever this
/// master holds it.
struct MoveZeroTo(MasterId);

impl MigrationHeuristic for MoveZeroTo {
    fn plan(
        &self,
        registry: &TypeRegistry,
        _index: &PopulationIndex,
        store: &AgentStore,
    ) -> Vec<Migration> {
        let ty = match registry.agent_type_by_name("cell") {
            Ok(ty) => ty,
            Err(_) => return Vec::new(),
        };
        let gid = registry.global_id(ty, AgentLocalId(0));
        if store.contains(gid) {
            vec![Migration {
                gid,
                destination: self.0,
            }]
        } else {
            Vec::new()
        }
    }
}

#[test]
fn death_removes_the_agent_everywhere_and_never_reuses_its_id() {
    let registry = cell_registry(true);
    let ty = registry.agent_type_by_name("cell").unwrap();
    let behaviors =
        BehaviorTable::new(&registry).with(ty, Arc::new(DieAt { step: 1, victim: 1 }));
    let seeds = seeds_i64(&registry, "cell", "v", &[1, 2]);

    let results = run_cluster(2, 1, registry, behaviors, seeds, |mut master| {
        master.run(2).unwrap();
        let ty = master.registry().agent_type_by_name("cell").unwrap();
        (
            master.does_agent_exist(ty, AgentLocalId(1)),
            master.does_agent_exist(ty, AgentLocalId(0)),
            master.id_bound(ty),
            master.store().len(),
        )
    });

    for (rank, (dead_exists, zero_exists, bound, _)) in results.iter().enumerate() {
        assert!(!dead_exists, "master {rank}: agent 1 is gone");
        assert!(zero_exists, "master {rank}: agent 0 survives");
        assert_eq!(*bound, AgentLocalId(2), "master {rank}: the id is not reused");
    }
    let owned: usize = results.iter().map(|r| r.3).sum();
    assert_eq!(owned, 1);
}

#[test]
fn birth_assigns_a_fresh_id_on_the_requesting_master() {
    let registry = cell_registry(true);
    let ty = registry.agent_type_by_name("cell").unwrap();
    let behaviors = BehaviorTable::new(&registry).with(ty, Arc::new(SpawnAt { step: 1 }));
    let seeds = seeds_i64(&registry, "cell", "v", &[1, 2]);

    let results = run_cluster(2, 1, registry, behaviors, seeds, |mut master| {
        master.run(2).unwrap();
        let ty = master.registry().agent_type_by_name("cell").unwrap();
        (
            master.does_agent_exist(ty, AgentLocalId(2)),
            master.index().owner(master.registry().global_id(ty, AgentLocalId(2))),
            master.read_attribute("cell", AgentLocalId(2), "v"),
            master.id_bound(ty),
        )
    });

    for (rank, (exists, owner, _, bound)) in results.iter().enumerate() {
        assert!(exists, "master {rank}: the newborn is replicated in the index");
        // Agent 0 lives on master 0, which requested the birth.
        assert_eq!(*owner, Some(MasterId(0)), "master {rank}");
        assert_eq!(*bound, AgentLocalId(3), "master {rank}");
    }
    // The holder materialized the payload.
    assert_eq!(results[0].2, Some(Value::I64(5)));
    assert_eq!(results[1].2, None);
}

#[test]
fn migration_transfers_state_and_updates_the_owner_map() {
    let registry = cell_registry(true);
    let behaviors = BehaviorTable::new(&registry);
    let seeds = seeds_i64(&registry, "cell", "v", &[7, 1]);

    let results = run_cluster(2, 1, registry.clone(), behaviors, seeds, |mut master| {
        master.set_migration_heuristic(Arc::new(MoveZeroTo(MasterId(1))));
        master.run(1).unwrap();
        let ty = master.registry().agent_type_by_name("cell").unwrap();
        let gid = master.registry().global_id(ty, AgentLocalId(0));
        (
            master.index().owner(gid),
            master.store().contains(gid),
            master.read_attribute("cell", AgentLocalId(0), "v"),
        )
    });

    // Agent 0 moved from master 0 to master 1, payload intact.
    assert_eq!(results[0].0, Some(MasterId(1)));
    assert_eq!(results[1].0, Some(MasterId(1)));
    assert!(!results[0].1);
    assert!(results[1].1);
    assert_eq!(results[0].2, None);
    assert_eq!(results[1].2, Some(Value::I64(7)));
}

#[test]
fn migrating_a_non_sendable_agent_aborts_meta_evolution() {
    let registry = cell_registry(false);
    let behaviors = BehaviorTable::new(&registry);
    let seeds = seeds_i64(&registry, "cell", "v", &[7, 1]);

    let results = run_cluster(2, 1, registry, behaviors, seeds, |mut master| {
        master.set_migration_heuristic(Arc::new(MoveZeroTo(MasterId(1))));
        master.run(1)
    });

    for (rank, result) in results.into_iter().enumerate() {
        match result {
            Err(StepError::Protocol(ProtocolError::NonSendableMigration { type_name, .. })) => {
                assert_eq!(type_name, "cell", "master {rank}");
            }
            other => panic!("master {rank}: expected non-sendable abort, got {other:?}"),
        }
    }
}
