//! Error type for snapshot reading and writing.

use std::error::Error;
use std::fmt;

use herd_core::error::{CodecError, ConfigError};

/// Failures while building, writing, or reading snapshot documents.
#[derive(Debug)]
pub enum SnapshotError {
    /// Filesystem access failed.
    Io(std::io::Error),
    /// A binary document was malformed.
    Codec(CodecError),
    /// Registry resolution or value coercion failed.
    Config(ConfigError),
    /// JSON text could not be parsed.
    Json(serde_json::Error),
    /// The document's structure did not match the expected container.
    Malformed {
        /// Description of the problem.
        detail: String,
    },
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "snapshot I/O failed: {e}"),
            Self::Codec(e) => write!(f, "malformed binary document: {e}"),
            Self::Config(e) => write!(f, "{e}"),
            Self::Json(e) => write!(f, "malformed JSON document: {e}"),
            Self::Malformed { detail } => write!(f, "malformed document: {detail}"),
        }
    }
}

impl Error for SnapshotError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Malformed { .. } => None,
        }
    }
}

impl From<std::io::Error> for SnapshotError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<CodecError> for SnapshotError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

impl From<ConfigError> for SnapshotError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<serde_json::Error> for SnapshotError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}
