//! Operational plumbing: logging setup.

pub mod telemetry;

pub use telemetry::*;
