//! The window layer: remote attribute access for the herd runtime.
//!
//! Every master exposes two memory regions. The *public window* holds
//! the public non-critical attribute structs of the agents it owns; the
//! *critical window* is a full replica of every agent's critical struct,
//! identical on every master. [`WindowPlan`] derives both offset tables
//! from the replicated population so that all peers agree byte-for-byte;
//! [`WindowLayer`] owns the publish and read paths over a
//! [`Fabric`](herd_fabric::Fabric); [`ScratchCache`] memoizes remote
//! reads within one behavior phase.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod layer;
pub mod plan;
pub mod scratch;

pub use layer::{EpochGuard, WindowError, WindowLayer};
pub use plan::WindowPlan;
pub use scratch::ScratchCache;
