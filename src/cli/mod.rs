//! enroll-relay CLI.
//!
//! - `enroll-relay run` - drive a stage plan against a live daemon
//! - `enroll-relay relay` - serve the relay standalone
//! - `enroll-relay probe` - send one cluster frame to a relay
//! - `enroll-relay frame` - build or parse frames as hex

mod args;
pub mod commands;

pub use args::{Cli, Commands, FrameAction, FrameArgs, OutputFormat, ProbeArgs, RelayArgs, RunArgs};
