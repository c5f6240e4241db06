//! enroll-relay - unified CLI entrypoint.
//!
//! Usage:
//!   enroll-relay run --config config/enroll-relay.toml --plan stages.toml
//!   enroll-relay relay --endpoint unix:/tmp/c-internal.sock --output '{"error":0}'
//!   enroll-relay probe --endpoint unix:/tmp/c-internal.sock --payload '{}'
//!   enroll-relay frame parse <hex>

use anyhow::Result;
use clap::Parser;
use enroll_relay::cli::commands::{run_frame, run_probe, run_relay, run_stages, LogOptions};
use enroll_relay::cli::{Cli, Commands};
use enroll_relay::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log = LogOptions {
        level: cli.log_level.clone(),
        json: cli.log_json,
    };

    match cli.command {
        // Reads the logging section of its config before initializing.
        Commands::Run(args) => run_stages(args, log).await,
        Commands::Relay(args) => {
            telemetry::init_tracing(log.level.as_deref(), log.json)?;
            run_relay(args).await
        }
        Commands::Probe(args) => {
            telemetry::init_tracing(log.level.as_deref(), log.json)?;
            run_probe(args).await
        }
        Commands::Frame(args) => {
            telemetry::init_tracing(log.level.as_deref(), log.json)?;
            run_frame(args)
        }
    }
}
