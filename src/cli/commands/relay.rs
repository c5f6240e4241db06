//! Relay command - stand-in cluster master answering with a fixed payload.

use crate::cli::args::{OutputFormat, RelayArgs};
use crate::relay::{
    spawn_cluster_relay, RelayEvent, RelaySettings, ReplyCounter, ReplyOptions, StageExpectation,
};
use crate::wire::CLUSTER_CMD_HEADER_SIZE;
use anyhow::{bail, Context, Result};
use bytes::Bytes;
use serde_json::json;

pub async fn run_relay(args: RelayArgs) -> Result<()> {
    if args.reply_command.is_empty()
        || args.reply_command.len() > CLUSTER_CMD_HEADER_SIZE
        || args.reply_command.contains(' ')
    {
        bail!(
            "reply command {:?} does not fit the command field or contains a space",
            args.reply_command
        );
    }
    let reply = ReplyOptions {
        command: Bytes::from(args.reply_command.clone().into_bytes()),
        counter: if args.echo_counter {
            ReplyCounter::Echo
        } else {
            ReplyCounter::default()
        },
    };
    let (relay, mut monitor) = spawn_cluster_relay(&args.endpoint, RelaySettings::default(), reply)
        .await
        .with_context(|| format!("failed to start relay on {}", args.endpoint))?;

    let expected_input = args.input.clone().unwrap_or_default();
    let mut served = 0u64;
    while args.count.map_or(true, |count| served < count) {
        let stage = relay.configure(StageExpectation::new(
            expected_input.clone(),
            args.output.clone(),
        ));
        relay.restart()?;

        // Violations and handler failures leave the relay running for the
        // same stage, so keep waiting until a reply goes out.
        loop {
            let event = tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!(served, "interrupted");
                    return relay.shutdown().await.map_err(Into::into);
                }
                event = monitor.next_event() => event,
            };
            let Some(event) = event else {
                bail!("relay stopped unexpectedly");
            };
            let done = matches!(event, RelayEvent::Exchange(_));
            print_event(&event, args.input.as_deref(), args.format);
            if done {
                break;
            }
        }
        tracing::debug!(stage, "exchange served");
        served += 1;
    }
    relay.shutdown().await?;
    Ok(())
}

fn print_event(event: &RelayEvent, expected_input: Option<&str>, format: OutputFormat) {
    match (event, format) {
        (RelayEvent::Exchange(exchange), OutputFormat::Json) => {
            let input = exchange.input_text();
            let mut out = json!({
                "stage": exchange.stage,
                "peer": exchange.peer,
                "input": input,
                "output": exchange.output_text(),
            });
            if let Some(expected) = expected_input {
                out["input_matches"] = json!(expected == input);
            }
            println!("{out}");
        }
        (RelayEvent::Exchange(exchange), OutputFormat::Text) => {
            let input = exchange.input_text();
            let verdict = match expected_input {
                Some(expected) if expected == input => " [input ok]",
                Some(_) => " [input MISMATCH]",
                None => "",
            };
            println!("stage {} from {}{verdict}", exchange.stage, exchange.peer);
            println!("  < {input}");
            println!("  > {}", exchange.output_text());
        }
        (RelayEvent::Violation { stage, received, peer }, OutputFormat::Json) => {
            println!(
                "{}",
                json!({ "stage": stage, "peer": peer, "violation": received })
            );
        }
        (RelayEvent::Violation { stage, received, peer }, OutputFormat::Text) => {
            println!("stage {stage} from {peer}: protocol violation ({received} bytes)");
        }
        (RelayEvent::Failed { stage, peer, reason }, OutputFormat::Json) => {
            println!("{}", json!({ "stage": stage, "peer": peer, "error": reason }));
        }
        (RelayEvent::Failed { stage, peer, reason }, OutputFormat::Text) => {
            println!("stage {stage} from {peer}: {reason}");
        }
    }
}
