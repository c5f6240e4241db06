//! Drives stages end to end and checks the three observation points.

use super::error::{Channel, StageError};
use super::groups::{GroupProvisioner, GroupScope, NoopProvisioner};
use super::stage::{Stage, StagePlan, TestCase};
use crate::net::{EnrollmentClient, TransportError};
use crate::relay::{RelayError, RelayHandle, StageExpectation, TrafficMonitor};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(1);
/// How long a client mismatch waits for a relay fault that explains it.
const RELAY_FAULT_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Bound on the client-side response wait.
    pub response_timeout: Duration,
    /// Bound on waiting for the relay capture once the client has its answer.
    pub capture_timeout: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
        }
    }
}

/// What a passing stage observed.
#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome {
    pub relay_stage: u64,
    pub response: String,
    pub cluster_input: String,
    pub cluster_output: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub case: String,
    pub index: usize,
    pub passed: bool,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    pub name: String,
    pub stages: Vec<StageReport>,
}

impl CaseReport {
    pub fn passed(&self) -> bool {
        self.stages.iter().all(|stage| stage.passed)
    }
}

/// Owns the relay, its capture monitor and the client socket, and runs
/// stages strictly one after another.
pub struct ExchangeController {
    relay: RelayHandle,
    monitor: TrafficMonitor,
    client: EnrollmentClient,
    provisioner: Arc<dyn GroupProvisioner>,
    settings: ControllerSettings,
}

impl ExchangeController {
    pub fn new(
        relay: RelayHandle,
        monitor: TrafficMonitor,
        client: EnrollmentClient,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            relay,
            monitor,
            client,
            provisioner: Arc::new(NoopProvisioner),
            settings,
        }
    }

    pub fn with_provisioner(mut self, provisioner: Arc<dyn GroupProvisioner>) -> Self {
        self.provisioner = provisioner;
        self
    }

    pub fn relay(&self) -> &RelayHandle {
        &self.relay
    }

    /// Run one stage. Groups are torn down and the client socket closed
    /// whatever the outcome.
    pub async fn run_stage(&mut self, stage: &Stage) -> Result<StageOutcome, StageError> {
        let provisioner = Arc::clone(&self.provisioner);
        let (scope, provisioned) = GroupScope::provision(provisioner.as_ref(), &stage.groups);
        let result = match provisioned {
            Ok(()) => self.exchange(stage).await,
            Err(err) => Err(StageError::Provisioning(err)),
        };
        scope.teardown();
        self.client.close().await;
        result
    }

    async fn exchange(&mut self, stage: &Stage) -> Result<StageOutcome, StageError> {
        let stale = self.monitor.drain();
        if stale > 0 {
            tracing::debug!(stale, "dropped relay events left over from earlier stages");
        }

        let relay_stage = self.relay.configure(StageExpectation::new(
            stage.cluster_input.clone(),
            stage.cluster_output.clone(),
        ));
        self.relay.restart()?;

        // The daemon closes the socket after every answered request.
        self.client.open().await?;
        self.client.send(stage.port_input.as_bytes()).await?;
        tracing::debug!(relay_stage, request = %stage.port_input, "request sent");

        let response = match self.client.receive(self.settings.response_timeout).await {
            Ok(bytes) => bytes,
            Err(TransportError::Timeout(waited)) => {
                return Err(StageError::ResponseTimeout {
                    expected: stage.port_output.clone(),
                    waited,
                })
            }
            Err(err) => return Err(err.into()),
        };
        let response_text = String::from_utf8_lossy(&response).into_owned();
        tracing::debug!(relay_stage, response = %response_text, "response received");

        if let Err(mismatch) = check_prefix(&response, &stage.port_output) {
            // A daemon that could not talk to the relay answers the client
            // with an error; the relay side is the real failure.
            let grace = self.settings.capture_timeout.min(RELAY_FAULT_GRACE);
            if let Some(fault) = self.monitor.relay_fault(relay_stage, grace).await {
                return Err(fault.into());
            }
            return Err(mismatch);
        }

        let captured = self
            .monitor
            .next_exchange(relay_stage, self.settings.capture_timeout)
            .await?;
        check_equal(Channel::RelayInput, &stage.cluster_input, captured.input_text())?;
        check_equal(
            Channel::RelayOutput,
            &stage.cluster_output,
            captured.output_text(),
        )?;

        Ok(StageOutcome {
            relay_stage,
            response: response_text,
            cluster_input: captured.input_text(),
            cluster_output: captured.output_text(),
        })
    }

    /// Run every stage of a case. A failing stage does not stop later ones.
    pub async fn run_case(&mut self, case: &TestCase) -> CaseReport {
        let mut stages = Vec::with_capacity(case.stages.len());
        for (index, stage) in case.stages.iter().enumerate() {
            let started = Instant::now();
            let result = self.run_stage(stage).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            let report = match result {
                Ok(outcome) => {
                    tracing::info!(case = %case.name, index, relay_stage = outcome.relay_stage, "stage passed");
                    StageReport {
                        case: case.name.clone(),
                        index,
                        passed: true,
                        elapsed_ms,
                        error_kind: None,
                        channel: None,
                        message: None,
                    }
                }
                Err(err) => {
                    tracing::warn!(case = %case.name, index, kind = err.kind(), "stage failed: {err}");
                    StageReport {
                        case: case.name.clone(),
                        index,
                        passed: false,
                        elapsed_ms,
                        error_kind: Some(err.kind()),
                        channel: err.channel(),
                        message: Some(err.to_string()),
                    }
                }
            };
            stages.push(report);
        }
        CaseReport {
            name: case.name.clone(),
            stages,
        }
    }

    pub async fn run_plan(&mut self, plan: &StagePlan, filter: Option<&str>) -> Vec<CaseReport> {
        let mut reports = Vec::new();
        for case in plan.select(filter) {
            reports.push(self.run_case(case).await);
        }
        reports
    }

    /// Close the client and stop the relay.
    pub async fn shutdown(mut self) -> Result<(), RelayError> {
        self.client.close().await;
        self.relay.shutdown().await
    }
}

/// Only the expected prefix is compared; trailing response bytes are ignored.
fn check_prefix(response: &[u8], expected: &str) -> Result<(), StageError> {
    let expected_bytes = expected.as_bytes();
    if response.get(..expected_bytes.len()) == Some(expected_bytes) {
        return Ok(());
    }
    Err(StageError::AssertionMismatch {
        channel: Channel::ClientResponse,
        expected: expected.to_string(),
        actual: String::from_utf8_lossy(response).into_owned(),
    })
}

fn check_equal(channel: Channel, expected: &str, actual: String) -> Result<(), StageError> {
    if expected == actual {
        return Ok(());
    }
    Err(StageError::AssertionMismatch {
        channel,
        expected: expected.to_string(),
        actual,
    })
}
