//! Exchange controller: drives the daemon through its client socket while
//! the relay stands in for the cluster master, then checks all three
//! observation points for each stage.

pub mod controller;
pub mod error;
pub mod groups;
pub mod log_monitor;
pub mod stage;

pub use controller::{
    CaseReport, ControllerSettings, ExchangeController, StageOutcome, StageReport,
};
pub use error::{Channel, StageError};
pub use groups::{CommandProvisioner, GroupProvisioner, NoopProvisioner};
pub use log_monitor::{wait_for_startup, LogMonitor, LogMonitorError};
pub use stage::{Stage, StagePlan, TestCase};
