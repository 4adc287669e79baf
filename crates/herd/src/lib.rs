//! Herd: a distributed agent-based simulation runtime.
//!
//! A user model — agent types with periodic behaviors, interaction
//! types for messaging — executes as a synchronous discrete-time
//! simulation across a set of peer *masters*. Every step is a
//! barrier-delimited pipeline (publish → meta-evolution → exchange →
//! dispatch → behavior); behaviors can read any agent's public
//! attribute by identity through one-sided memory windows, with a
//! fully replicated tier for critical attributes.
//!
//! This is the top-level facade crate re-exporting the public API of
//! the herd sub-crates; adding `herd` as a single dependency is
//! sufficient for most users.
//!
//! # Quick start
//!
//! ```rust
//! use herd::prelude::*;
//! use std::sync::Arc;
//!
//! // A model with one agent type carrying one public counter.
//! let registry = Arc::new(
//!     RegistryBuilder::new()
//!         .agent(AgentTypeBuilder::new("cell").public("v", WireShape::Scalar(ScalarKind::I64)))
//!         .build()
//!         .unwrap(),
//! );
//! let behaviors = BehaviorTable::new(&registry);
//! let config = MasterConfig::new(Arc::clone(&registry), behaviors, 1);
//!
//! // A single-master cluster, two agents.
//! let fabric = Arc::new(LocalFabric::cluster(1).into_iter().next().unwrap());
//! let ty = registry.agent_type_by_name("cell").unwrap();
//! let seeds = (0..2)
//!     .map(|id| AgentSeed { ty, local_id: AgentLocalId(id), payload: registry.default_payload(ty) })
//!     .collect();
//! let mut master = Master::init(config, fabric, seeds).unwrap();
//! master.run(3).unwrap();
//! assert_eq!(master.time_step(), StepId(3));
//! ```
//!
//! # Modules
//!
//! Each module corresponds to a sub-crate:
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `herd-core` | IDs, wire shapes, the type registry, values, errors |
//! | [`fabric`] | `herd-fabric` | The messaging substrate trait and the in-process cluster |
//! | [`window`] | `herd-window` | Attribute windows, offset plans, the remote-read cache |
//! | [`agent`] | `herd-agent` | Agents, shards, the population index, the behavior seam |
//! | [`router`] | `herd-router` | Interaction outboxes, exchange, and dispatch |
//! | [`engine`] | `herd-engine` | The master, the step pipeline, and the control plane |
//! | [`snapshot`] | `herd-snapshot` | Export containers and population files |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types, ids, the registry, and errors (`herd-core`).
pub use herd_core as types;

/// The messaging substrate (`herd-fabric`).
///
/// [`fabric::Fabric`] is the trait the runtime is written against;
/// [`fabric::LocalFabric`] runs a cluster of masters as threads.
pub use herd_fabric as fabric;

/// Attribute windows and offset planning (`herd-window`).
pub use herd_window as window;

/// Agents, shards, and the behavior seam (`herd-agent`).
///
/// The [`agent::Behavior`] trait is the main extension point for user
/// model code.
pub use herd_agent as agent;

/// Interaction routing (`herd-router`).
pub use herd_router as router;

/// The step scheduler and control plane (`herd-engine`).
///
/// [`engine::Master`] assembles one peer; [`engine::ControlSession`]
/// drives the root from a command queue.
pub use herd_engine as engine;

/// Snapshot export and population files (`herd-snapshot`).
pub use herd_snapshot as snapshot;

/// Common imports for typical herd usage.
///
/// ```rust
/// use herd::prelude::*;
/// ```
pub mod prelude {
    // Core ids and registry building
    pub use herd_core::{
        AgentGlobalId, AgentLocalId, AgentTypeBuilder, AgentTypeId, AttrId, InteractionTypeBuilder,
        InteractionTypeId, Interaction, MasterId, RegistryBuilder, ScalarKind, StepId, TypeRegistry,
        Value, Visibility, WireShape,
    };

    // Errors
    pub use herd_core::{CodecError, ConfigError, ModelError, ProtocolError, TransportError};

    // Fabric
    pub use herd_fabric::{Fabric, LocalFabric, WindowKind};

    // Agents and behaviors
    pub use herd_agent::{Agent, AgentStore, Behavior, BehaviorCtx, BehaviorTable, PopulationIndex};

    // Engine
    pub use herd_engine::{
        peer_main, ControlQueue, ControlSession, Master, MasterConfig, Order, StepError,
    };

    // Snapshot
    pub use herd_snapshot::{AgentSeed, PopulationFile};
}
