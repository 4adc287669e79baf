//! The behavior seam: the trait user model code implements, the
//! dispatch table keyed by agent type, and the context a behavior runs
//! against.
//!
//! A behavior sees exactly the capabilities the step pipeline grants
//! during the behavior phase: its own attributes, remote attribute reads
//! (resolved through windows by the engine-supplied [`AttributeRead`]),
//! interaction sending, meta-evolution requests, and the replicated
//! population queries.

use std::sync::Arc;

use herd_core::error::{CodecError, ConfigError, ModelError};
use herd_core::id::{
    AgentGlobalId, AgentLocalId, AgentTypeId, AttrId, InteractionTypeId, StepId,
};
use herd_core::registry::TypeRegistry;
use herd_core::value::Value;
use herd_core::Interaction;

use crate::agent::Agent;
use crate::marshal;
use crate::store::PopulationIndex;

/// Resolves attribute reads against the window layer.
///
/// Implemented by the engine per shard worker; the implementation owns
/// that worker's remote-read scratch cache.
pub trait AttributeRead {
    /// Read attribute `attr` of agent `gid`, wherever it lives.
    fn read(&mut self, gid: AgentGlobalId, attr: AttrId) -> Result<Value, ModelError>;
}

/// Accepts interactions enqueued by behaviors.
///
/// Implementations apply the drop policy: an interaction whose recipient
/// does not exist is dropped with a warning, never an error.
pub trait InteractionSink {
    /// Enqueue an interaction for the next exchange phase.
    fn push(&mut self, interaction: Interaction);
}

/// Accepts death and birth requests for the next meta-evolution phase.
pub trait EvolutionSink {
    /// Request removal of an agent at the end of this step.
    fn request_death(&mut self, gid: AgentGlobalId);
    /// Request creation of an agent of `ty` with the given payload.
    fn request_birth(&mut self, ty: AgentTypeId, payload: Vec<u8>);
}

/// Everything a behavior can touch while it runs.
pub struct BehaviorCtx<'a> {
    step: StepId,
    registry: &'a TypeRegistry,
    index: &'a PopulationIndex,
    reads: &'a mut dyn AttributeRead,
    outbox: &'a mut dyn InteractionSink,
    evolution: &'a mut dyn EvolutionSink,
    agent: &'a mut Agent,
}

impl<'a> BehaviorCtx<'a> {
    /// Assemble a context for one agent. Called by the engine's shard
    /// workers, once per agent per step.
    pub fn new(
        step: StepId,
        registry: &'a TypeRegistry,
        index: &'a PopulationIndex,
        reads: &'a mut dyn AttributeRead,
        outbox: &'a mut dyn InteractionSink,
        evolution: &'a mut dyn EvolutionSink,
        agent: &'a mut Agent,
    ) -> Self {
        Self {
            step,
            registry,
            index,
            reads,
            outbox,
            evolution,
            agent,
        }
    }

    /// The current time step.
    pub fn step(&self) -> StepId {
        self.step
    }

    /// The type registry.
    pub fn registry(&self) -> &TypeRegistry {
        self.registry
    }

    /// This agent's type.
    pub fn self_type(&self) -> AgentTypeId {
        self.agent.ty()
    }

    /// This agent's local id.
    pub fn self_id(&self) -> AgentLocalId {
        self.agent.local_id()
    }

    /// This agent's global id.
    pub fn self_gid(&self) -> AgentGlobalId {
        self.agent.gid(self.registry)
    }

    /// Read one of this agent's own attributes. Own reads see writes
    /// made earlier in the same behavior invocation.
    pub fn own(&self, attr: AttrId) -> Result<Value, CodecError> {
        self.agent.attr_value(self.registry, attr)
    }

    /// Write one of this agent's own attributes. The new value becomes
    /// remotely visible at the next publish phase.
    pub fn set_own(&mut self, attr: AttrId, value: &Value) -> Result<(), ConfigError> {
        self.agent.set_attr_value(self.registry, attr, value)
    }

    /// Resolve an attribute id on this agent's type by name.
    pub fn attr(&self, name: &str) -> Result<AttrId, ConfigError> {
        self.registry.attr_by_name(self.agent.ty(), name)
    }

    /// Read a public or critical attribute of any agent by identity.
    ///
    /// Returns the value the owner published at this step's publish
    /// phase (remote mutations made during the current behavior phase
    /// are not visible). Raises the recoverable
    /// [`ModelError::AgentNotFound`] if the target does not exist.
    pub fn ask_attribute(
        &mut self,
        attr: AttrId,
        recipient_type: AgentTypeId,
        recipient_id: AgentLocalId,
    ) -> Result<Value, ModelError> {
        if !self.index.exists(recipient_type, recipient_id) {
            return Err(ModelError::AgentNotFound {
                local_id: recipient_id,
                type_name: self.registry.agent_type(recipient_type).name.clone(),
            });
        }
        let gid = self.registry.global_id(recipient_type, recipient_id);
        self.reads.read(gid, attr)
    }

    /// Send an interaction. The payload object is keyed by field name;
    /// missing fields are zero. If the recipient does not exist at send
    /// time the interaction is dropped with a warning by the router —
    /// sending is always best-effort.
    pub fn send(
        &mut self,
        itype: InteractionTypeId,
        recipient_type: AgentTypeId,
        recipient_id: AgentLocalId,
        payload: &Value,
    ) -> Result<(), ConfigError> {
        let bytes = marshal::interaction_payload_from_object(self.registry, itype, payload)?;
        self.outbox.push(Interaction {
            itype,
            sender_type: self.agent.ty(),
            sender_id: self.agent.local_id(),
            recipient_type,
            recipient_id,
            payload: bytes,
        });
        Ok(())
    }

    /// Interactions of one type delivered to this agent this step.
    pub fn received(&self, itype: InteractionTypeId) -> &[Interaction] {
        self.agent.received(itype)
    }

    /// Decode a received interaction's payload into a name-keyed object.
    pub fn interaction_value(&self, interaction: &Interaction) -> Result<Value, CodecError> {
        marshal::interaction_to_object(self.registry, interaction)
    }

    /// Request this agent's removal at the next meta-evolution.
    pub fn request_death(&mut self) {
        let gid = self.agent.gid(self.registry);
        self.evolution.request_death(gid);
    }

    /// Request the birth of a new agent at the next meta-evolution. The
    /// payload object is keyed by attribute name; missing attributes are
    /// zero. The new agent's local id is assigned during meta-evolution.
    pub fn request_birth(&mut self, ty: AgentTypeId, payload: &Value) -> Result<(), ConfigError> {
        let bytes = marshal::payload_from_object(self.registry, ty, payload)?;
        self.evolution.request_birth(ty, bytes);
        Ok(())
    }

    /// Whether an agent exists anywhere in the simulation.
    pub fn agent_exists(&self, ty: AgentTypeId, local: AgentLocalId) -> bool {
        self.index.exists(ty, local)
    }

    /// The ordered live local ids of one agent type.
    pub fn agents_of_type(&self, ty: AgentTypeId) -> &std::collections::BTreeSet<AgentLocalId> {
        self.index.agents_of_type(ty)
    }

    /// Max live local id of a type, plus one.
    pub fn id_bound(&self, ty: AgentTypeId) -> AgentLocalId {
        self.index.id_bound(ty)
    }
}

/// The periodic routine of an agent type.
///
/// One implementation per agent type, registered in a [`BehaviorTable`].
/// Behaviors run in parallel across shards; an implementation must not
/// assume any ordering among agents within a step.
pub trait Behavior: Send + Sync {
    /// Human-readable name for diagnostics.
    fn name(&self) -> &str;

    /// Run one step for one agent.
    ///
    /// Returning [`ModelError::AgentNotFound`] ends this agent's turn
    /// early and the step continues; a transport error aborts the phase.
    fn step(&self, ctx: &mut BehaviorCtx<'_>) -> Result<(), ModelError>;
}

/// A behavior that does nothing; the default for unregistered types.
#[derive(Debug, Default)]
pub struct InertBehavior;

impl Behavior for InertBehavior {
    fn name(&self) -> &str {
        "inert"
    }

    fn step(&self, _ctx: &mut BehaviorCtx<'_>) -> Result<(), ModelError> {
        Ok(())
    }
}

/// Behavior dispatch table, indexed by agent type id.
#[derive(Clone)]
pub struct BehaviorTable {
    by_type: Vec<Arc<dyn Behavior>>,
}

impl BehaviorTable {
    /// A table of inert behaviors for every type in the registry.
    pub fn new(registry: &TypeRegistry) -> Self {
        Self {
            by_type: (0..registry.agent_type_count())
                .map(|_| Arc::new(InertBehavior) as Arc<dyn Behavior>)
                .collect(),
        }
    }

    /// Register the behavior of one agent type.
    pub fn with(mut self, ty: AgentTypeId, behavior: Arc<dyn Behavior>) -> Self {
        self.by_type[ty.0 as usize] = behavior;
        self
    }

    /// The behavior of an agent type.
    pub fn for_type(&self, ty: AgentTypeId) -> &Arc<dyn Behavior> {
        &self.by_type[ty.0 as usize]
    }
}

impl std::fmt::Debug for BehaviorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BehaviorTable")
            .field(
                "by_type",
                &self.by_type.iter().map(|b| b.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
