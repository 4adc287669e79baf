//! Fixture models with known trajectories.
//!
//! * `counter` — every agent adds the published `v` of every other
//!   agent of its type to its own. With two agents starting at `(1, 1)`
//!   the trajectory doubles each step, because reads see the previous
//!   publish.
//! * `relay` — a ring: each agent forwards every newly seen origin id
//!   to its successor. After N steps every agent has seen all N ids.
//! * `sentinel` — exercises the critical tier: agent 0 raises its
//!   critical `crit` at a trigger step; every agent mirrors the replica
//!   it reads into its public `v`.
//! * `chatter` — sends one token per step to a recipient that never
//!   existed, exercising the drop-with-warning policy.

use std::sync::Arc;

use herd_core::error::ModelError;
use herd_core::id::AgentLocalId;
use herd_core::registry::{
    AgentTypeBuilder, InteractionTypeBuilder, RegistryBuilder, TypeRegistry,
};
use herd_core::value::Value;
use herd_core::wire::{ScalarKind, WireShape};
use herd_agent::{Behavior, BehaviorCtx, BehaviorTable};

fn scalar(kind: ScalarKind) -> WireShape {
    WireShape::Scalar(kind)
}

fn object(pairs: &[(&str, Value)]) -> Value {
    Value::Object(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
    )
}

// ── counter ─────────────────────────────────────────────────────

/// Adds every peer's published `v` to its own each step.
#[derive(Debug, Default)]
pub struct CounterBehavior;

impl Behavior for CounterBehavior {
    fn name(&self) -> &str {
        "counter"
    }

    fn step(&self, ctx: &mut BehaviorCtx<'_>) -> Result<(), ModelError> {
        let ty = ctx.self_type();
        let v = ctx
            .attr("v")
            .map_err(|_| ModelError::NoSuchAttribute {
                type_name: "counter".into(),
                attr: 0,
            })?;
        let me = ctx.self_id();
        let others: Vec<AgentLocalId> = ctx
            .agents_of_type(ty)
            .iter()
            .copied()
            .filter(|&id| id != me)
            .collect();
        let mut total = match ctx.own(v) {
            Ok(Value::I64(x)) => x,
            _ => 0,
        };
        for other in others {
            if let Value::I64(x) = ctx.ask_attribute(v, ty, other)? {
                total += x;
            }
        }
        let _ = ctx.set_own(v, &Value::I64(total));
        Ok(())
    }
}

/// The `counter` model: one type, one public i64 `v`.
pub fn counter_model() -> (Arc<TypeRegistry>, BehaviorTable) {
    let registry = Arc::new(
        RegistryBuilder::new()
            .agent(AgentTypeBuilder::new("counter").public("v", scalar(ScalarKind::I64)))
            .build()
            .unwrap(),
    );
    let ty = registry.agent_type_by_name("counter").unwrap();
    let behaviors = BehaviorTable::new(&registry).with(ty, Arc::new(CounterBehavior));
    (registry, behaviors)
}

// ── relay ───────────────────────────────────────────────────────

/// Forwards every newly seen origin id around the ring.
#[derive(Debug, Default)]
pub struct RelayBehavior;

impl Behavior for RelayBehavior {
    fn name(&self) -> &str {
        "relay"
    }

    fn step(&self, ctx: &mut BehaviorCtx<'_>) -> Result<(), ModelError> {
        let ty = ctx.self_type();
        let seen_attr = ctx.attr("seen").map_err(|_| ModelError::NoSuchAttribute {
            type_name: "relay".into(),
            attr: 0,
        })?;
        let token = ctx
            .registry()
            .interaction_type_by_name("token")
            .map_err(|_| ModelError::NoSuchAttribute {
                type_name: "token".into(),
                attr: 0,
            })?;

        let ring = ctx.id_bound(ty).0;
        let me = ctx.self_id().0;
        let mut seen = match ctx.own(seen_attr) {
            Ok(Value::U64(mask)) => mask,
            _ => 0,
        };

        let mut fresh: Vec<u64> = Vec::new();
        if ctx.step().0 == 1 {
            fresh.push(me);
        }
        let received: Vec<u64> = ctx
            .received(token)
            .iter()
            .filter_map(|inter| {
                ctx.interaction_value(inter)
                    .ok()
                    .and_then(|v| v.field("origin").and_then(Value::as_i64))
                    .map(|v| v as u64)
            })
            .collect();
        for origin in received {
            if seen & (1 << origin) == 0 {
                fresh.push(origin);
            }
        }

        let successor = AgentLocalId((me + 1) % ring);
        for origin in fresh {
            seen |= 1 << origin;
            let _ = ctx.send(token, ty, successor, &object(&[("origin", Value::U64(origin))]));
        }
        let _ = ctx.set_own(seen_attr, &Value::U64(seen));
        Ok(())
    }
}

/// The `relay` model: a ring of agents with a `seen` bitmask and a
/// `token` interaction carrying its origin id. Rings of up to 64
/// agents.
pub fn relay_model() -> (Arc<TypeRegistry>, BehaviorTable) {
    let registry = Arc::new(
        RegistryBuilder::new()
            .agent(AgentTypeBuilder::new("relay").public("seen", scalar(ScalarKind::U64)))
            .interaction(InteractionTypeBuilder::new("token").field("origin", scalar(ScalarKind::U64)))
            .build()
            .unwrap(),
    );
    let ty = registry.agent_type_by_name("relay").unwrap();
    let behaviors = BehaviorTable::new(&registry).with(ty, Arc::new(RelayBehavior));
    (registry, behaviors)
}

// ── sentinel ────────────────────────────────────────────────────

/// Agent 0 raises its critical attribute at the trigger step; every
/// agent mirrors its local replica of that attribute into `v`.
#[derive(Debug)]
pub struct SentinelBehavior {
    /// Step at which agent 0 writes `value` into `crit`.
    pub trigger_step: u64,
    /// The value written.
    pub value: i64,
}

impl Behavior for SentinelBehavior {
    fn name(&self) -> &str {
        "sentinel"
    }

    fn step(&self, ctx: &mut BehaviorCtx<'_>) -> Result<(), ModelError> {
        let ty = ctx.self_type();
        let crit = ctx.attr("crit").map_err(|_| ModelError::NoSuchAttribute {
            type_name: "sentinel".into(),
            attr: 0,
        })?;
        let v = ctx.attr("v").map_err(|_| ModelError::NoSuchAttribute {
            type_name: "sentinel".into(),
            attr: 1,
        })?;

        // Read the replica first: the write below becomes globally
        // visible only at the next publish.
        let observed = ctx.ask_attribute(crit, ty, AgentLocalId(0))?;
        let _ = ctx.set_own(v, &observed);

        if ctx.self_id().0 == 0 && ctx.step().0 == self.trigger_step {
            let _ = ctx.set_own(crit, &Value::I64(self.value));
        }
        Ok(())
    }
}

/// The `sentinel` model: public `v`, critical `crit`.
pub fn sentinel_model(trigger_step: u64, value: i64) -> (Arc<TypeRegistry>, BehaviorTable) {
    let registry = Arc::new(
        RegistryBuilder::new()
            .agent(
                AgentTypeBuilder::new("sentinel")
                    .critical("crit", scalar(ScalarKind::I64))
                    .public("v", scalar(ScalarKind::I64)),
            )
            .build()
            .unwrap(),
    );
    let ty = registry.agent_type_by_name("sentinel").unwrap();
    let behaviors = BehaviorTable::new(&registry).with(
        ty,
        Arc::new(SentinelBehavior {
            trigger_step,
            value,
        }),
    );
    (registry, behaviors)
}

// ── chatter ─────────────────────────────────────────────────────

/// Sends one token per step to a recipient that never existed.
#[derive(Debug)]
pub struct ChatterBehavior {
    /// The local id of the (nonexistent) recipient.
    pub ghost: AgentLocalId,
}

impl Behavior for ChatterBehavior {
    fn name(&self) -> &str {
        "chatter"
    }

    fn step(&self, ctx: &mut BehaviorCtx<'_>) -> Result<(), ModelError> {
        let ty = ctx.self_type();
        let token = ctx
            .registry()
            .interaction_type_by_name("token")
            .map_err(|_| ModelError::NoSuchAttribute {
                type_name: "token".into(),
                attr: 0,
            })?;
        let _ = ctx.send(token, ty, self.ghost, &Value::Null);
        Ok(())
    }
}

/// The `chatter` model: a single type whose agents spam a ghost id.
pub fn chatter_model(ghost: AgentLocalId) -> (Arc<TypeRegistry>, BehaviorTable) {
    let registry = Arc::new(
        RegistryBuilder::new()
            .agent(AgentTypeBuilder::new("chatter").public("v", scalar(ScalarKind::I64)))
            .interaction(InteractionTypeBuilder::new("token").field("origin", scalar(ScalarKind::U64)))
            .build()
            .unwrap(),
    );
    let ty = registry.agent_type_by_name("chatter").unwrap();
    let behaviors = BehaviorTable::new(&registry).with(ty, Arc::new(ChatterBehavior { ghost }));
    (registry, behaviors)
}
