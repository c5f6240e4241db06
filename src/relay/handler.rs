//! Verification/transform strategies plugged into the relay accept loop.

use super::state::RelayControl;
use super::RelayError;
use crate::wire::frame::{self, CLUSTER_DATA_HEADER_SIZE};
use bytes::Bytes;
use serde::Deserialize;

/// Turns the first chunk read from a connection into the reply written back.
///
/// The relay owns sockets, pausing and capture; a handler only sees bytes.
pub trait ExchangeHandler: Send + Sync + 'static {
    fn handle(&self, inbound: &[u8]) -> Result<Bytes, RelayError>;
}

/// Counter placed in reply frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyCounter {
    Fixed(u32),
    /// Reuse the counter of the inbound frame.
    Echo,
}

impl Default for ReplyCounter {
    fn default() -> Self {
        Self::Fixed(2)
    }
}

#[derive(Debug, Clone)]
pub struct ReplyOptions {
    pub command: Bytes,
    pub counter: ReplyCounter,
}

impl Default for ReplyOptions {
    fn default() -> Self {
        Self {
            command: Bytes::from_static(b"send_sync"),
            counter: ReplyCounter::default(),
        }
    }
}

/// Impersonates the cluster master: validates that a frame arrived and answers
/// with the configured stage output, unencrypted.
#[derive(Debug, Clone)]
pub struct ClusterExchange {
    control: RelayControl,
    options: ReplyOptions,
}

impl ClusterExchange {
    pub fn new(control: RelayControl, options: ReplyOptions) -> Self {
        Self { control, options }
    }
}

impl ExchangeHandler for ClusterExchange {
    fn handle(&self, inbound: &[u8]) -> Result<Bytes, RelayError> {
        if inbound.len() <= CLUSTER_DATA_HEADER_SIZE {
            return Err(RelayError::ProtocolViolation {
                received: inbound.len(),
            });
        }
        let active = self.control.active().ok_or(RelayError::NotConfigured)?;
        let message = frame::payload_after_header(inbound);
        tracing::info!(
            stage = active.stage,
            message = %String::from_utf8_lossy(message),
            "received cluster message from daemon"
        );

        let counter = match self.options.counter {
            ReplyCounter::Fixed(counter) => counter,
            ReplyCounter::Echo => frame::parse_header(inbound)?.counter,
        };
        let reply = frame::build(
            &self.options.command,
            counter,
            &active.expectation.expected_output,
            false,
            None,
        )?;
        tracing::info!(
            stage = active.stage,
            response = %String::from_utf8_lossy(&active.expectation.expected_output),
            "sending cluster response"
        );
        Ok(reply.frame)
    }
}
