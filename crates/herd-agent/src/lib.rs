//! Agent instances and their per-master organization.
//!
//! A master's population lives in [`Shard`]s, one per worker thread; the
//! [`AgentStore`] indexes shards by global identity, and the replicated
//! [`PopulationIndex`] answers the global queries every master can make
//! (owner, existence, ids by type). User model code plugs in through the
//! [`Behavior`] trait and runs against a [`BehaviorCtx`].

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod agent;
pub mod behavior;
pub mod marshal;
pub mod store;

pub use agent::Agent;
pub use behavior::{
    AttributeRead, Behavior, BehaviorCtx, BehaviorTable, EvolutionSink, InteractionSink,
};
pub use store::{AgentStore, PopulationIndex, Shard};
