//! Strongly-typed identifiers for agents, types, masters, and steps.

use std::fmt;

/// Identifies an agent type within a simulation model.
///
/// Agent types are registered in the [`TypeRegistry`](crate::TypeRegistry)
/// at startup and assigned dense sequential ids: `AgentTypeId(n)` is the
/// n-th registered agent type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentTypeId(pub u32);

impl fmt::Display for AgentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for AgentTypeId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Identifies an interaction type within a simulation model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InteractionTypeId(pub u32);

impl fmt::Display for InteractionTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for InteractionTypeId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Identifies an attribute within one agent (or interaction) type.
///
/// Attribute ids are dense per type; the pair `(AgentTypeId, AttrId)` is
/// the global key for all registry lookups.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttrId(pub u32);

impl fmt::Display for AttrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for AttrId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Identifies a peer process (master) participating in the simulation.
///
/// Masters are ranked `0..M`; master 0 is the root and drives the control
/// plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MasterId(pub u32);

impl MasterId {
    /// The root master.
    pub const ROOT: MasterId = MasterId(0);

    /// Whether this master is the root.
    pub fn is_root(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for MasterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for MasterId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Identifier of an agent among agents of the same type, unique on the
/// master that created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentLocalId(pub u64);

impl fmt::Display for AgentLocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for AgentLocalId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Globally unique agent identifier encoding `(type, local id)`.
///
/// The encoding is contractual and relied on by routing:
/// `gid = local * Ta + type`, where `Ta` is the number of registered agent
/// types, so that `type = gid mod Ta` and `local = gid div Ta`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentGlobalId(pub u64);

impl AgentGlobalId {
    /// Compose a global id from a local id and type, given the model's
    /// agent type count.
    pub fn pack(local: AgentLocalId, ty: AgentTypeId, type_count: u32) -> Self {
        Self(local.0 * u64::from(type_count) + u64::from(ty.0))
    }

    /// The agent type encoded in this id.
    pub fn ty(self, type_count: u32) -> AgentTypeId {
        AgentTypeId((self.0 % u64::from(type_count)) as u32)
    }

    /// The local id encoded in this id.
    pub fn local(self, type_count: u32) -> AgentLocalId {
        AgentLocalId(self.0 / u64::from(type_count))
    }
}

impl fmt::Display for AgentGlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for AgentGlobalId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Monotonically increasing time-step counter.
///
/// Incremented once per completed step of the global pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepId(pub u64);

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for StepId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}
