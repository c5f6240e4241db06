#![deny(unused, dead_code)]
#![deny(clippy::all, clippy::pedantic)]
// Module naming: common pattern in domain-driven code
#![allow(clippy::module_name_repetitions)]
// Documentation style
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// API ergonomics
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
// Format strings: allow non-inlined for readability
#![allow(clippy::uninlined_format_args)]
// Numeric casts: header fields are u32 on the wire
#![allow(clippy::cast_possible_truncation)]
// Control flow style
#![allow(clippy::manual_let_else)]
#![allow(clippy::single_match_else)]
// Error handling style
#![allow(clippy::result_large_err)]
// Large futures in the controller
#![allow(clippy::large_futures)]

//! enroll-relay - exercises an enrollment daemon by impersonating its
//! cluster master.
//!
//! # Module Organization
//!
//! ## Core
//! - `core::config` - Configuration parsing and validation
//!
//! ## Wire
//! - `wire::frame` - Cluster frame build/parse
//! - `wire::codec` - Incremental decoder for stream transports
//! - `wire::cipher` - Payload cipher capability
//!
//! ## Networking
//! - `net::endpoint` - `unix:`/`tcp:` endpoints
//! - `net::listener` - Relay listening socket
//! - `net::client` - Client-facing socket to the daemon
//! - `net::tls` - Client TLS profile
//!
//! ## Relay
//! - `relay` - Pausable single-reply socket relay
//! - `relay::monitor` - Captured traffic
//!
//! ## Harness
//! - `harness::controller` - Per-stage exchange controller
//! - `harness::stage` - Stage fixtures
//! - `harness::log_monitor` - Daemon log tailing
//! - `harness::groups` - Agent group provisioning
//!
//! ## Operations
//! - `ops::telemetry` - Logging setup

// Core infrastructure
pub mod core;

// Wire format
pub mod wire;

// Networking
pub mod net;

// Relay and controller
pub mod harness;
pub mod relay;

// Operations
pub mod ops;

// CLI
pub mod cli;

pub use self::core::config;
pub use ops::telemetry;
