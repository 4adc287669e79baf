//! The herd step scheduler and control plane.
//!
//! A [`Master`] assembles the registry, window layer, router, agent
//! store, and behavior table over a fabric endpoint and drives the
//! synchronous step pipeline: publish → meta-evolution → exchange →
//! dispatch → behavior, every phase transition a global barrier. The
//! root master additionally speaks the control protocol: it broadcasts
//! [`Order`]s to its peers and is itself driven by an external
//! front-end over a named control queue.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod control;
pub mod error;
pub mod evolution;
pub mod heuristics;
pub mod master;
pub mod step;

pub use config::MasterConfig;
pub use control::{peer_main, Control, ControlQueue, ControlSession, Flow, Order};
pub use error::{ControlError, StepError};
pub use evolution::{EvoKind, EvoQueue, EvoRecord};
pub use heuristics::{Migration, MigrationHeuristic, NoMigration};
pub use master::Master;
