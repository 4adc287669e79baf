//! Shared test fixtures for the herd workspace.
//!
//! Small agent models with known closed-form trajectories, used by unit
//! and scenario tests across crates.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod fixtures;

pub use fixtures::{
    chatter_model, counter_model, relay_model, sentinel_model, ChatterBehavior, CounterBehavior,
    RelayBehavior, SentinelBehavior,
};
