//! Engine error types: step-pipeline failures and control-plane
//! failures.

use std::error::Error;
use std::fmt;

use herd_core::error::{ConfigError, ProtocolError, TransportError};
use herd_snapshot::SnapshotError;
use herd_window::WindowError;

/// A failure that terminated an in-flight step.
///
/// Transport failures end the step and surface to the control plane;
/// protocol failures are fatal to the simulation.
#[derive(Clone, Debug, PartialEq)]
pub enum StepError {
    /// The messaging substrate failed mid-phase.
    Transport(TransportError),
    /// Replicated state diverged, or a peer broke the step contract.
    Protocol(ProtocolError),
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "step aborted: {e}"),
            Self::Protocol(e) => write!(f, "simulation aborted: {e}"),
        }
    }
}

impl Error for StepError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Protocol(e) => Some(e),
        }
    }
}

impl From<TransportError> for StepError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<ProtocolError> for StepError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl From<WindowError> for StepError {
    fn from(e: WindowError) -> Self {
        match e {
            WindowError::Transport(t) => Self::Transport(t),
            WindowError::Protocol(p) => Self::Protocol(p),
            WindowError::Unplanned { gid } => Self::Protocol(ProtocolError::MalformedMessage {
                detail: format!("agent {gid} missing from the window plan"),
            }),
        }
    }
}

/// A failure in the control plane: command handling, order execution,
/// or snapshot I/O.
#[derive(Debug)]
pub enum ControlError {
    /// The command or its data was invalid; nothing changed.
    Config(ConfigError),
    /// An ordered step failed.
    Step(StepError),
    /// Snapshot reading or writing failed.
    Snapshot(SnapshotError),
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "{e}"),
            Self::Step(e) => write!(f, "{e}"),
            Self::Snapshot(e) => write!(f, "{e}"),
        }
    }
}

impl Error for ControlError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Step(e) => Some(e),
            Self::Snapshot(e) => Some(e),
        }
    }
}

impl From<ConfigError> for ControlError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<StepError> for ControlError {
    fn from(e: StepError) -> Self {
        Self::Step(e)
    }
}

impl From<SnapshotError> for ControlError {
    fn from(e: SnapshotError) -> Self {
        Self::Snapshot(e)
    }
}

impl From<TransportError> for ControlError {
    fn from(e: TransportError) -> Self {
        Self::Step(StepError::Transport(e))
    }
}

impl From<ProtocolError> for ControlError {
    fn from(e: ProtocolError) -> Self {
        Self::Step(StepError::Protocol(e))
    }
}
