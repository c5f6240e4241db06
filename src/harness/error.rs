use crate::net::TransportError;
use crate::relay::RelayError;
use crate::wire::FramingError;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Observation point that diverged from the stage expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    ClientResponse,
    RelayInput,
    RelayOutput,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ClientResponse => "client response",
            Self::RelayInput => "relay input",
            Self::RelayOutput => "relay output",
        })
    }
}

/// Reason a stage failed. Every variant ends the stage immediately.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error("protocol violation: cluster peer sent {received} bytes, not more than a bare header")]
    ProtocolViolation { received: usize },
    #[error("daemon did not respond within {waited:?} (expected {expected:?})")]
    ResponseTimeout { expected: String, waited: Duration },
    #[error("{channel} mismatch: expected {expected:?}, got {actual:?}")]
    AssertionMismatch {
        channel: Channel,
        expected: String,
        actual: String,
    },
    #[error("relay saw no traffic for stage {stage} within {waited:?}")]
    CaptureMissing { stage: u64, waited: Duration },
    #[error("relay: {0}")]
    Relay(RelayError),
    #[error("client socket: {0}")]
    Transport(TransportError),
    #[error("group provisioning failed: {0}")]
    Provisioning(String),
}

impl StageError {
    /// Short machine-readable label used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Framing(_) => "framing_error",
            Self::ProtocolViolation { .. } => "protocol_violation",
            Self::ResponseTimeout { .. } => "response_timeout",
            Self::AssertionMismatch { .. } => "assertion_mismatch",
            Self::CaptureMissing { .. } => "capture_missing",
            Self::Relay(_) => "relay_error",
            Self::Transport(_) => "transport_error",
            Self::Provisioning(_) => "provisioning_error",
        }
    }

    pub fn channel(&self) -> Option<Channel> {
        match self {
            Self::AssertionMismatch { channel, .. } => Some(*channel),
            _ => None,
        }
    }
}

impl From<RelayError> for StageError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::ProtocolViolation { received } => Self::ProtocolViolation { received },
            RelayError::Framing(err) => Self::Framing(err),
            RelayError::CaptureTimeout { stage, waited } => Self::CaptureMissing { stage, waited },
            other => Self::Relay(other),
        }
    }
}

impl From<TransportError> for StageError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}
