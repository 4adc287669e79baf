//! Error types for the herd runtime, organized by the failure taxonomy of
//! the step pipeline: configuration, model, transport, protocol, and codec.
//!
//! Config and model errors are recoverable (the offending command or
//! behavior has no effect); transport errors terminate the in-flight step;
//! protocol errors are fatal to the simulation.

use std::error::Error;
use std::fmt;

use crate::id::{AgentGlobalId, AgentLocalId, MasterId};

/// Errors in externally supplied configuration: model descriptors,
/// initial populations, and control commands.
///
/// A config error is reported to the issuer and leaves the simulation
/// unchanged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A type name was not found in the registry.
    UnknownAgentType {
        /// The unresolved name.
        name: String,
    },
    /// An interaction type name was not found in the registry.
    UnknownInteractionType {
        /// The unresolved name.
        name: String,
    },
    /// An attribute name was not found on the given agent type.
    UnknownAttribute {
        /// Owning agent type name.
        agent_type: String,
        /// The unresolved attribute name.
        name: String,
    },
    /// Two types or two attributes of one type share a name.
    DuplicateName {
        /// The colliding name.
        name: String,
    },
    /// An attribute was declared both private and critical.
    CriticalPrivate {
        /// Owning agent type name.
        agent_type: String,
        /// The offending attribute name.
        attr: String,
    },
    /// A non-structural (opaque) attribute was declared public or critical.
    ///
    /// Opaque fields are permitted only on the private side of an agent
    /// type; they make the whole type non-sendable.
    OpaquePublic {
        /// Owning agent type name.
        agent_type: String,
        /// The offending attribute name.
        attr: String,
    },
    /// An attribute value could not be coerced to its declared wire shape.
    ValueShapeMismatch {
        /// Description of the mismatch.
        detail: String,
    },
    /// An initial-population document is malformed.
    MalformedPopulation {
        /// Description of the problem.
        detail: String,
    },
    /// A control command carried an invalid or missing argument.
    InvalidArgument {
        /// Description of the problem.
        detail: String,
    },
    /// The requested operation is not valid in the current control state.
    InvalidState {
        /// Description of the problem.
        detail: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAgentType { name } => write!(f, "unknown agent type '{name}'"),
            Self::UnknownInteractionType { name } => {
                write!(f, "unknown interaction type '{name}'")
            }
            Self::UnknownAttribute { agent_type, name } => {
                write!(f, "agent type '{agent_type}' has no attribute '{name}'")
            }
            Self::DuplicateName { name } => write!(f, "duplicate name '{name}'"),
            Self::CriticalPrivate { agent_type, attr } => write!(
                f,
                "attribute '{attr}' of '{agent_type}' cannot be both private and critical"
            ),
            Self::OpaquePublic { agent_type, attr } => write!(
                f,
                "non-structural attribute '{attr}' of '{agent_type}' must be private"
            ),
            Self::ValueShapeMismatch { detail } => {
                write!(f, "value does not match wire shape: {detail}")
            }
            Self::MalformedPopulation { detail } => {
                write!(f, "malformed initial population: {detail}")
            }
            Self::InvalidArgument { detail } => write!(f, "invalid argument: {detail}"),
            Self::InvalidState { detail } => write!(f, "invalid state: {detail}"),
        }
    }
}

impl Error for ConfigError {}

/// Errors raised by model code at simulation time.
///
/// `AgentNotFound` is the recoverable condition of the attribute-read
/// path: a behavior may catch and suppress it; unhandled, the behavior
/// body ends early and the step continues.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelError {
    /// An attribute read targeted an agent that does not exist.
    AgentNotFound {
        /// Local id of the missing agent.
        local_id: AgentLocalId,
        /// Name of the requested agent type.
        type_name: String,
    },
    /// An attribute id is not valid for the targeted agent type.
    NoSuchAttribute {
        /// Name of the agent type.
        type_name: String,
        /// The out-of-range attribute id.
        attr: u32,
    },
    /// A remote read or write failed in the messaging substrate.
    ///
    /// Fatal: terminates the step (the behavior must propagate it).
    Transport(TransportError),
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AgentNotFound {
                local_id,
                type_name,
            } => write!(
                f,
                "trying to access an attribute of agent {local_id} of type '{type_name}', \
                 which does not exist"
            ),
            Self::NoSuchAttribute { type_name, attr } => {
                write!(f, "agent type '{type_name}' has no attribute {attr}")
            }
            Self::Transport(e) => write!(f, "transport failure during behavior: {e}"),
        }
    }
}

impl Error for ModelError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for ModelError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

/// Errors from the message-passing fabric.
///
/// Transport failures are unexpected; they abort the current phase and
/// surface to the control plane, returning the scheduler to idle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportError {
    /// A peer's channel endpoint is gone.
    PeerLost {
        /// The unreachable peer.
        peer: MasterId,
    },
    /// A receive did not complete within the fabric's deadline.
    Timeout {
        /// The peer the receive was posted against.
        peer: MasterId,
    },
    /// A received message carried an unexpected tag.
    TagMismatch {
        /// Tag the receiver was matching.
        expected: u64,
        /// Tag actually received.
        found: u64,
    },
    /// A window access fell outside the target region.
    WindowOutOfBounds {
        /// Target window size in bytes.
        size: usize,
        /// Requested offset.
        offset: usize,
        /// Requested length.
        len: usize,
    },
    /// A one-sided operation was issued outside an access epoch.
    EpochClosed,
    /// A collective produced a payload of unexpected length.
    SizeMismatch {
        /// Expected byte length.
        expected: usize,
        /// Received byte length.
        found: usize,
    },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerLost { peer } => write!(f, "peer master {peer} is unreachable"),
            Self::Timeout { peer } => write!(f, "receive from master {peer} timed out"),
            Self::TagMismatch { expected, found } => {
                write!(f, "message tag mismatch: expected {expected}, found {found}")
            }
            Self::WindowOutOfBounds { size, offset, len } => write!(
                f,
                "window access [{offset}, {}) exceeds window size {size}",
                offset + len
            ),
            Self::EpochClosed => write!(f, "one-sided access outside an open window epoch"),
            Self::SizeMismatch { expected, found } => {
                write!(f, "collective payload size mismatch: expected {expected}, found {found}")
            }
        }
    }
}

impl Error for TransportError {}

/// Protocol errors: divergence of replicated state across peers, or a
/// between-step mutation that violates the owner-map contract.
///
/// Fatal; the simulation aborts with a diagnostic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    /// The window plan digest differs across masters.
    PlanDivergence {
        /// The first disagreeing master.
        master: MasterId,
    },
    /// Two masters disagree on an agent's owner.
    OwnerDivergence {
        /// The disputed agent.
        gid: AgentGlobalId,
    },
    /// A migration was requested for an agent whose type is not sendable.
    NonSendableMigration {
        /// The agent in question.
        gid: AgentGlobalId,
        /// Name of its (non-sendable) type.
        type_name: String,
    },
    /// A peer-to-peer message could not be decoded.
    MalformedMessage {
        /// Description of the problem.
        detail: String,
    },
    /// A control order arrived out of sequence.
    OrderDesync {
        /// Description of the problem.
        detail: String,
    },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PlanDivergence { master } => write!(
                f,
                "window offset plan diverges on master {master}; \
                 the replicated id ordering is broken"
            ),
            Self::OwnerDivergence { gid } => {
                write!(f, "owner map diverges across masters for agent {gid}")
            }
            Self::NonSendableMigration { gid, type_name } => write!(
                f,
                "agent {gid} of non-sendable type '{type_name}' cannot migrate"
            ),
            Self::MalformedMessage { detail } => write!(f, "malformed peer message: {detail}"),
            Self::OrderDesync { detail } => write!(f, "control order desync: {detail}"),
        }
    }
}

impl Error for ProtocolError {}

impl From<CodecError> for ProtocolError {
    fn from(e: CodecError) -> Self {
        Self::MalformedMessage {
            detail: e.to_string(),
        }
    }
}

/// Errors from the byte-level codec shared by messages and snapshots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CodecError {
    /// The input ended before a complete value was read.
    Truncated {
        /// Bytes needed to finish the read.
        needed: usize,
        /// Bytes remaining in the input.
        remaining: usize,
    },
    /// An unknown type marker was encountered.
    BadMarker {
        /// The unrecognized marker byte.
        found: u8,
    },
    /// A string field did not contain valid UTF-8.
    InvalidUtf8,
    /// A length field exceeds the remaining input.
    LengthOverflow {
        /// The implausible length.
        len: u64,
    },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { needed, remaining } => {
                write!(f, "truncated input: needed {needed} bytes, {remaining} remaining")
            }
            Self::BadMarker { found } => write!(f, "unknown type marker 0x{found:02x}"),
            Self::InvalidUtf8 => write!(f, "string is not valid UTF-8"),
            Self::LengthOverflow { len } => write!(f, "length {len} exceeds remaining input"),
        }
    }
}

impl Error for CodecError {}
