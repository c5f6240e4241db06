//! CLI argument definitions using clap.

use crate::net::Endpoint;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// enroll-relay - drive an enrollment daemon against an impersonated cluster master.
#[derive(Parser)]
#[command(name = "enroll-relay")]
#[command(version)]
#[command(about = "Cluster relay and stage runner for enrollment daemon tests")]
pub struct Cli {
    /// Log filter directives (overrides the config file, `RUST_LOG` wins over both)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a stage plan against a live daemon
    Run(RunArgs),

    /// Serve the relay standalone with a fixed reply
    Relay(RelayArgs),

    /// Send one cluster frame to a relay and print the decoded reply
    Probe(ProbeArgs),

    /// Build or parse cluster frames as hex
    Frame(FrameArgs),
}

#[derive(clap::ValueEnum, Clone, Copy, Default)]
pub enum OutputFormat {
    /// JSON objects, one per line
    #[default]
    Json,
    /// Human readable summary
    Text,
}

// -----------------------------------------------------------------------------
// Run command
// -----------------------------------------------------------------------------

#[derive(Args)]
pub struct RunArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/enroll-relay.toml")]
    pub config: PathBuf,

    /// Stage plan fixture (TOML)
    #[arg(short, long)]
    pub plan: PathBuf,

    /// Only run cases whose name contains this string
    #[arg(long)]
    pub case: Option<String>,

    /// Skip waiting for the daemon startup line
    #[arg(long)]
    pub no_wait: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

// -----------------------------------------------------------------------------
// Relay command
// -----------------------------------------------------------------------------

#[derive(Args)]
pub struct RelayArgs {
    /// Endpoint to listen on (unix:<path> or tcp:<host>:<port>)
    #[arg(long)]
    pub endpoint: Endpoint,

    /// Payload to answer every request with
    #[arg(long)]
    pub output: String,

    /// Payload the daemon is expected to send; mismatches are reported
    #[arg(long)]
    pub input: Option<String>,

    /// Stop after this many exchanges (default: until ctrl-c)
    #[arg(long)]
    pub count: Option<u64>,

    /// Command written in reply frames
    #[arg(long, default_value = "send_sync")]
    pub reply_command: String,

    /// Echo the request counter instead of the fixed reply counter
    #[arg(long)]
    pub echo_counter: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,
}

// -----------------------------------------------------------------------------
// Probe command
// -----------------------------------------------------------------------------

#[derive(Args)]
pub struct ProbeArgs {
    /// Relay endpoint to dial
    #[arg(long)]
    pub endpoint: Endpoint,

    #[arg(long, default_value = "dapi")]
    pub command: String,

    #[arg(long, default_value_t = 1)]
    pub counter: u32,

    /// Payload sent in the frame
    #[arg(long)]
    pub payload: String,

    /// Hex AES-256 key; when set the request payload is encrypted
    #[arg(long, value_name = "HEX")]
    pub key: Option<String>,

    /// Reply wait in milliseconds
    #[arg(long, default_value_t = 5000)]
    pub timeout_ms: u64,
}

// -----------------------------------------------------------------------------
// Frame command
// -----------------------------------------------------------------------------

#[derive(Args)]
pub struct FrameArgs {
    #[command(subcommand)]
    pub action: FrameAction,
}

#[derive(Subcommand)]
pub enum FrameAction {
    /// Encode a frame and print it as hex
    Build {
        #[arg(long)]
        command: String,
        #[arg(long, default_value_t = 1)]
        counter: u32,
        #[arg(long)]
        payload: String,
        /// Hex AES-256 key; when set the payload is encrypted
        #[arg(long, value_name = "HEX")]
        key: Option<String>,
    },
    /// Decode a hex frame and print its header and payload
    Parse {
        hex: String,
        /// Hex AES-256 key used to open an encrypted payload
        #[arg(long, value_name = "HEX")]
        key: Option<String>,
    },
}
