//! Relay stage state and the pause/resume gate.
//!
//! The whole state lives in a single `watch` slot so the accept loop always
//! observes the phase and the expectation pair together, and a `restart()`
//! issued before the loop starts waiting is never lost.

use super::RelayError;
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayPhase {
    /// Accepting and ready to answer one connection.
    Running,
    /// Blocked until the controller calls `restart()`.
    Paused,
}

/// Expected input and synthesized output for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageExpectation {
    pub expected_input: Bytes,
    pub expected_output: Bytes,
}

impl StageExpectation {
    pub fn new(expected_input: impl Into<Bytes>, expected_output: impl Into<Bytes>) -> Self {
        Self {
            expected_input: expected_input.into(),
            expected_output: expected_output.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayState {
    pub phase: RelayPhase,
    pub expectation: Option<Arc<StageExpectation>>,
    /// Number of the most recent `configure()` call.
    pub configured: u64,
    /// Stage number of the last reply sent.
    pub served: u64,
}

impl Default for RelayState {
    fn default() -> Self {
        Self {
            phase: RelayPhase::Paused,
            expectation: None,
            configured: 0,
            served: 0,
        }
    }
}

/// Active stage handed to the accept loop when the gate opens.
#[derive(Debug, Clone)]
pub struct ActiveStage {
    pub stage: u64,
    pub expectation: Arc<StageExpectation>,
}

/// Shared control block. Only `configure`, `restart` and the relay's own
/// post-reply transition mutate it.
#[derive(Debug, Clone)]
pub struct RelayControl {
    tx: Arc<watch::Sender<RelayState>>,
}

impl Default for RelayControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayControl {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(RelayState::default());
        Self { tx: Arc::new(tx) }
    }

    /// Replace the expectation pair. Returns the new stage number.
    ///
    /// Must only be called while paused; a mid-stage call is logged.
    pub fn configure(&self, expectation: StageExpectation) -> u64 {
        let expectation = Arc::new(expectation);
        let mut stage = 0;
        self.tx.send_modify(|state| {
            if state.phase == RelayPhase::Running {
                tracing::warn!(
                    stage = state.configured,
                    "relay reconfigured while running; stage expectations replaced mid-stage"
                );
            }
            state.configured += 1;
            state.expectation = Some(expectation);
            stage = state.configured;
        });
        tracing::debug!(stage, "relay configured");
        stage
    }

    /// Release the accept loop for the most recently configured stage.
    ///
    /// Fails when no configuration newer than the last served stage exists,
    /// so a stale expectation is never used for a reply.
    pub fn restart(&self) -> Result<u64, RelayError> {
        let mut outcome = Err(RelayError::NotConfigured);
        self.tx.send_if_modified(|state| {
            if state.expectation.is_none() || state.configured <= state.served {
                return false;
            }
            outcome = Ok(state.configured);
            if state.phase == RelayPhase::Running {
                return false;
            }
            state.phase = RelayPhase::Running;
            true
        });
        if let Ok(stage) = outcome {
            tracing::debug!(stage, "relay restarted");
        }
        outcome
    }

    /// Record the reply for `stage` and close the gate.
    pub(crate) fn pause_after_reply(&self, stage: u64) {
        self.tx.send_modify(|state| {
            state.served = state.served.max(stage);
            state.phase = RelayPhase::Paused;
        });
    }

    pub fn phase(&self) -> RelayPhase {
        self.tx.borrow().phase
    }

    pub fn snapshot(&self) -> RelayState {
        self.tx.borrow().clone()
    }

    /// Stage currently released for dispatch, if any.
    pub fn active(&self) -> Option<ActiveStage> {
        let state = self.tx.borrow();
        match (&state.phase, &state.expectation) {
            (RelayPhase::Running, Some(expectation)) => Some(ActiveStage {
                stage: state.configured,
                expectation: Arc::clone(expectation),
            }),
            _ => None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<RelayState> {
        self.tx.subscribe()
    }

    /// Block until the gate is open.
    pub async fn wait_running(
        gate: &mut watch::Receiver<RelayState>,
    ) -> Result<ActiveStage, RelayError> {
        let state = gate
            .wait_for(|state| state.phase == RelayPhase::Running && state.expectation.is_some())
            .await
            .map_err(|_| RelayError::Stopped)?;
        let expectation = state.expectation.clone().ok_or(RelayError::NotConfigured)?;
        Ok(ActiveStage {
            stage: state.configured,
            expectation,
        })
    }
}
