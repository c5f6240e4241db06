//! Captured relay traffic, consumed by the controller for assertions.

use super::RelayError;
use crate::wire::frame::payload_after_header;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// One request/reply pair served for a stage.
    Exchange(CapturedExchange),
    /// The peer sent a bare or incomplete frame.
    Violation {
        stage: u64,
        received: usize,
        peer: String,
    },
    /// The handler failed for another reason.
    Failed {
        stage: u64,
        peer: String,
        reason: String,
    },
}

impl RelayEvent {
    pub fn stage(&self) -> u64 {
        match self {
            Self::Exchange(exchange) => exchange.stage,
            Self::Violation { stage, .. } | Self::Failed { stage, .. } => *stage,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CapturedExchange {
    pub stage: u64,
    pub peer: String,
    /// Raw inbound frame, header included.
    pub inbound: Bytes,
    /// Raw reply frame, header included.
    pub outbound: Bytes,
}

impl CapturedExchange {
    /// Inbound payload with the header stripped.
    pub fn input_text(&self) -> String {
        String::from_utf8_lossy(payload_after_header(&self.inbound)).into_owned()
    }

    /// Reply payload with the header stripped.
    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(payload_after_header(&self.outbound)).into_owned()
    }
}

/// Receiving end of the relay capture channel.
#[derive(Debug)]
pub struct TrafficMonitor {
    rx: mpsc::UnboundedReceiver<RelayEvent>,
}

impl TrafficMonitor {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<RelayEvent>) -> Self {
        Self { rx }
    }

    /// Wait for the exchange of `stage`, skipping events from earlier stages.
    pub async fn next_exchange(
        &mut self,
        stage: u64,
        timeout: Duration,
    ) -> Result<CapturedExchange, RelayError> {
        let deadline = Instant::now() + timeout;
        loop {
            let event = tokio::time::timeout_at(deadline, self.rx.recv())
                .await
                .map_err(|_| RelayError::CaptureTimeout {
                    stage,
                    waited: timeout,
                })?
                .ok_or(RelayError::Stopped)?;

            if event.stage() != stage {
                tracing::debug!(
                    expected = stage,
                    observed = event.stage(),
                    "discarding relay event from another stage"
                );
                continue;
            }
            return match event {
                RelayEvent::Exchange(exchange) => Ok(exchange),
                RelayEvent::Violation { received, peer, .. } => {
                    tracing::warn!(stage, peer = %peer, received, "relay saw malformed frame");
                    Err(RelayError::ProtocolViolation { received })
                }
                RelayEvent::Failed { reason, .. } => Err(RelayError::HandlerFailed(reason)),
            };
        }
    }

    /// Violation or handler failure reported for `stage` within `grace`.
    /// An exchange for the stage, a quiet channel or a stopped relay all
    /// yield `None`.
    pub async fn relay_fault(&mut self, stage: u64, grace: Duration) -> Option<RelayError> {
        let deadline = Instant::now() + grace;
        loop {
            let Ok(Some(event)) = tokio::time::timeout_at(deadline, self.rx.recv()).await else {
                return None;
            };
            if event.stage() != stage {
                continue;
            }
            return match event {
                RelayEvent::Exchange(_) => None,
                RelayEvent::Violation { received, .. } => {
                    Some(RelayError::ProtocolViolation { received })
                }
                RelayEvent::Failed { reason, .. } => Some(RelayError::HandlerFailed(reason)),
            };
        }
    }

    /// Next event of any stage, `None` once the relay has stopped.
    pub async fn next_event(&mut self) -> Option<RelayEvent> {
        self.rx.recv().await
    }

    /// Drop everything currently queued. Returns the number of events dropped.
    pub fn drain(&mut self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}
