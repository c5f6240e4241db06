//! Socket relay impersonating the cluster master.
//!
//! The relay owns one listening endpoint and serves connections strictly one
//! at a time. After each reply it pauses until the controller reconfigures
//! it and calls `restart()`, so exactly one reply is produced per stage and a
//! connection belonging to the next stage is never answered with stale
//! expectations. Connections arriving while paused wait in the listen
//! backlog.
//!
//! ```text
//!   configure ──► restart ──► [Running] ── accept/read/handle/write ──► [Paused]
//!        ▲                                                                 │
//!        └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod handler;
pub mod monitor;
pub mod state;

pub use handler::{ClusterExchange, ExchangeHandler, ReplyCounter, ReplyOptions};
pub use monitor::{CapturedExchange, RelayEvent, TrafficMonitor};
pub use state::{ActiveStage, RelayControl, RelayPhase, RelayState, StageExpectation};

use crate::net::{BoxedConnection, Endpoint, RelayListener};
use crate::wire::FramingError;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Default size of the first-chunk read buffer.
pub const DEFAULT_READ_BUFFER: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("protocol violation: peer sent {received} bytes, not more than a bare header")]
    ProtocolViolation { received: usize },
    #[error("relay has no fresh stage configuration")]
    NotConfigured,
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error("relay socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("relay handler failed: {0}")]
    HandlerFailed(String),
    #[error("no relay traffic captured for stage {stage} within {waited:?}")]
    CaptureTimeout { stage: u64, waited: Duration },
    #[error("relay stopped")]
    Stopped,
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub read_buffer: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            read_buffer: DEFAULT_READ_BUFFER,
        }
    }
}

/// Bound, not yet running relay.
pub struct SocketRelay {
    listener: RelayListener,
    control: RelayControl,
    settings: RelaySettings,
}

impl SocketRelay {
    pub async fn bind(endpoint: &Endpoint, settings: RelaySettings) -> Result<Self, RelayError> {
        let listener = RelayListener::bind(endpoint).await?;
        tracing::info!(endpoint = %listener.local_endpoint()?, "relay listening");
        Ok(Self {
            listener,
            control: RelayControl::new(),
            settings,
        })
    }

    /// Control block to hand to handlers that need the active stage.
    pub fn control(&self) -> RelayControl {
        self.control.clone()
    }

    /// Start the accept loop on the current runtime.
    pub fn spawn<H: ExchangeHandler>(self, handler: H) -> Result<(RelayHandle, TrafficMonitor), RelayError> {
        let endpoint = self.listener.local_endpoint()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let control = self.control.clone();
        let worker = RelayWorker {
            listener: self.listener,
            control: self.control,
            handler: Arc::new(handler),
            events: events_tx,
            read_buffer: self.settings.read_buffer.max(1),
        };
        let task = tokio::spawn(worker.run(shutdown_rx));
        Ok((
            RelayHandle {
                control,
                endpoint,
                shutdown: shutdown_tx,
                task: Some(task),
            },
            TrafficMonitor::new(events_rx),
        ))
    }
}

/// Bind `endpoint` and start a relay answering with [`ClusterExchange`].
pub async fn spawn_cluster_relay(
    endpoint: &Endpoint,
    settings: RelaySettings,
    reply: ReplyOptions,
) -> Result<(RelayHandle, TrafficMonitor), RelayError> {
    let relay = SocketRelay::bind(endpoint, settings).await?;
    let handler = ClusterExchange::new(relay.control(), reply);
    relay.spawn(handler)
}

/// Controller-side handle. Dropping it stops the relay.
pub struct RelayHandle {
    control: RelayControl,
    endpoint: Endpoint,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl RelayHandle {
    /// Replace the expectation pair for the next stage.
    pub fn configure(&self, expectation: StageExpectation) -> u64 {
        self.control.configure(expectation)
    }

    /// Release the relay for the configured stage.
    pub fn restart(&self) -> Result<u64, RelayError> {
        self.control.restart()
    }

    pub fn phase(&self) -> RelayPhase {
        self.control.phase()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn control(&self) -> &RelayControl {
        &self.control
    }

    /// Stop the accept loop and wait for it to exit.
    pub async fn shutdown(mut self) -> Result<(), RelayError> {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|err| RelayError::HandlerFailed(format!("relay task: {err}")))?;
        }
        Ok(())
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

struct RelayWorker<H> {
    listener: RelayListener,
    control: RelayControl,
    handler: Arc<H>,
    events: mpsc::UnboundedSender<RelayEvent>,
    read_buffer: usize,
}

impl<H: ExchangeHandler> RelayWorker<H> {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut gate = self.control.subscribe();
        loop {
            let active = tokio::select! {
                _ = shutdown.changed() => break,
                active = RelayControl::wait_running(&mut gate) => match active {
                    Ok(active) => active,
                    Err(_) => break,
                },
            };
            let accepted = tokio::select! {
                _ = shutdown.changed() => break,
                accepted = self.listener.accept() => accepted,
            };
            match accepted {
                Ok((conn, peer)) => self.serve(conn, peer, active).await,
                Err(err) => tracing::warn!("relay accept error: {err}"),
            }
        }
        self.listener.cleanup();
        tracing::info!("relay stopped");
    }

    async fn serve(&self, mut conn: BoxedConnection, peer: String, active: ActiveStage) {
        let mut stage = active.stage;
        let mut buf = vec![0u8; self.read_buffer];
        let n = match conn.read(&mut buf).await {
            Ok(n) => n,
            Err(err) => {
                tracing::warn!(stage, peer = %peer, "relay read error: {err}");
                return;
            }
        };
        if n == 0 {
            tracing::debug!(stage, peer = %peer, "peer closed without sending data");
            return;
        }
        buf.truncate(n);
        let inbound = Bytes::from(buf);
        // A configure() may have landed while this connection sat in accept.
        if let Some(current) = self.control.active() {
            stage = current.stage;
        }

        match self.handler.handle(&inbound) {
            Ok(reply) => {
                self.control.pause_after_reply(stage);
                if let Err(err) = write_reply(&mut conn, &reply).await {
                    tracing::warn!(stage, peer = %peer, "relay write error: {err}");
                }
                tracing::debug!(stage, peer = %peer, "stage served, relay paused");
                let _ = self.events.send(RelayEvent::Exchange(CapturedExchange {
                    stage,
                    peer,
                    inbound,
                    outbound: reply,
                }));
            }
            Err(RelayError::ProtocolViolation { received }) => {
                tracing::warn!(stage, peer = %peer, received, "invalid cluster message");
                let _ = self.events.send(RelayEvent::Violation {
                    stage,
                    received,
                    peer,
                });
            }
            Err(err) => {
                tracing::warn!(stage, peer = %peer, "relay handler error: {err}");
                let _ = self.events.send(RelayEvent::Failed {
                    stage,
                    peer,
                    reason: err.to_string(),
                });
            }
        }
    }
}

async fn write_reply(conn: &mut BoxedConnection, reply: &[u8]) -> std::io::Result<()> {
    conn.write_all(reply).await?;
    conn.flush().await?;
    conn.shutdown().await
}
