//! Run command - drives a stage plan against a live daemon.

use super::LogOptions;
use crate::cli::args::{OutputFormat, RunArgs};
use crate::config::Config;
use crate::harness::{
    log_monitor, CaseReport, CommandProvisioner, ExchangeController, StagePlan,
};
use crate::net::EnrollmentClient;
use crate::relay::spawn_cluster_relay;
use crate::telemetry;
use anyhow::{bail, Context, Result};
use std::sync::Arc;

pub async fn run_stages(args: RunArgs, log: LogOptions) -> Result<()> {
    let config = Config::load(&args.config)?;
    let level = log.level.as_deref().unwrap_or(&config.logging.level);
    telemetry::init_tracing(Some(level), log.json || config.logging.json)?;

    let plan = StagePlan::from_path(&args.plan)?;

    // The daemon only reaches the cluster once the relay socket exists.
    let (relay, monitor) = spawn_cluster_relay(
        &config.relay.endpoint,
        config.relay.settings(),
        config.relay.reply_options(),
    )
    .await
    .with_context(|| format!("failed to start relay on {}", config.relay.endpoint))?;

    if let (false, Some(path)) = (args.no_wait, &config.monitor.log_path) {
        let line = log_monitor::wait_for_startup(
            path,
            &config.monitor.startup_pattern,
            config.monitor.startup_timeout(),
        )
        .await
        .context("daemon did not come up")?;
        tracing::info!(line = %line, "daemon ready");
    }

    let client = EnrollmentClient::new(config.client.settings())
        .context("failed to prepare client connection")?;
    let mut controller =
        ExchangeController::new(relay, monitor, client, config.controller_settings());
    if let Some(tool) = &config.groups.tool {
        controller = controller.with_provisioner(Arc::new(CommandProvisioner::new(tool.clone())));
    }

    let reports = controller.run_plan(&plan, args.case.as_deref()).await;
    controller.shutdown().await?;

    if reports.is_empty() {
        bail!("no case matched {:?}", args.case.unwrap_or_default());
    }
    print_reports(&reports, args.format)?;

    let total: usize = reports.iter().map(|r| r.stages.len()).sum();
    let failed = reports
        .iter()
        .flat_map(|r| &r.stages)
        .filter(|stage| !stage.passed)
        .count();
    if failed > 0 {
        bail!("{failed} of {total} stages failed");
    }
    Ok(())
}

fn print_reports(reports: &[CaseReport], format: OutputFormat) -> Result<()> {
    for report in reports {
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string(report)?),
            OutputFormat::Text => {
                let verdict = if report.passed() { "PASS" } else { "FAIL" };
                println!("{verdict} {}", report.name);
                for stage in report.stages.iter().filter(|s| !s.passed) {
                    println!(
                        "  stage {}: {}",
                        stage.index,
                        stage.message.as_deref().unwrap_or("failed")
                    );
                }
            }
        }
    }
    Ok(())
}
