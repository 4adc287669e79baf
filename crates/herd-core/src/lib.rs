//! Core types for the herd distributed simulation runtime.
//!
//! This is the leaf crate with zero internal herd dependencies. It defines
//! the vocabulary shared by every other crate in the workspace: typed
//! identifiers, wire shapes and their flat transport descriptors, the
//! dynamic [`Value`] tree, the byte codec, the immutable [`TypeRegistry`],
//! and the error taxonomy.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod codec;
pub mod error;
pub mod id;
pub mod message;
pub mod registry;
pub mod value;
pub mod wire;

// Re-export core types at crate root for convenience.
pub use error::{CodecError, ConfigError, ModelError, ProtocolError, TransportError};
pub use id::{
    AgentGlobalId, AgentLocalId, AgentTypeId, AttrId, InteractionTypeId, MasterId, StepId,
};
pub use message::Interaction;
pub use registry::{
    AgentTypeBuilder, AgentTypeDef, AttrDef, FieldDescriptor, InteractionTypeBuilder,
    InteractionTypeDef, RegistryBuilder, TypeRegistry, Visibility,
};
pub use value::Value;
pub use wire::{FlatRun, ScalarKind, WireField, WireShape};
