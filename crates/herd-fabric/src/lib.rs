//! Message-passing fabric for the herd runtime.
//!
//! The step pipeline needs five things from its substrate: typed
//! point-to-point send/receive, collective barrier/broadcast/gather
//! operations, all-to-all exchange, one-sided memory windows with remote
//! put/get, and epoch primitives bracketing window access. [`Fabric`]
//! captures exactly that surface; [`LocalFabric`] implements it for M
//! masters running as threads of one process, which is how every test in
//! the workspace runs a cluster.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod fabric;
pub mod local;

pub use fabric::{Fabric, WindowKind};
pub use local::LocalFabric;
