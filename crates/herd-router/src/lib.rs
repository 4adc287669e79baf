//! Interaction routing for the herd runtime.
//!
//! Behaviors enqueue typed messages into per-shard [`Outbox`] matrices;
//! once per step the [`Router`] announces per-channel counts with an
//! all-to-all, bulk-exchanges the message bytes, lands them in the
//! fixed-stride inbox, and dispatches each to its recipient's per-type
//! mailbox. Within one `(source master, destination master, interaction
//! type)` channel, FIFO order is preserved end to end.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod outbox;
pub mod router;

pub use outbox::Outbox;
pub use router::Router;
