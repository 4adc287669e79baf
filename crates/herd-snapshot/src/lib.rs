//! Snapshot export for the herd runtime.
//!
//! Agent state serializes into a self-describing document: a tagged
//! binary encoding of scalars, strings, arrays, and string-keyed maps
//! ([`binary`]), with a JSON text rendering ([`json`]) for human
//! consumption. [`document`] builds, merges, and reshapes the exported
//! documents; [`population`] loads initial-population files and
//! materializes agent seeds from them.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod binary;
pub mod document;
pub mod error;
pub mod json;
pub mod population;

pub use document::{agents_document, convert_document, merge_documents};
pub use error::SnapshotError;
pub use population::{AgentEntry, AgentSeed, PopulationFile, TypeEntry};
