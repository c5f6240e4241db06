//! Probe command - play the daemon side of the cluster socket once.

use super::{as_dyn, cipher_from_key};
use crate::cli::args::ProbeArgs;
use crate::net::BoxedConnection;
use crate::wire::{ClusterDecoder, ClusterHeader, ClusterMessage};
use anyhow::{anyhow, bail, Context, Result};
use bytes::{Bytes, BytesMut};
use serde_json::json;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub async fn run_probe(args: ProbeArgs) -> Result<()> {
    let cipher = cipher_from_key(args.key.as_deref())?;
    let request = ClusterMessage::new(
        args.command.into_bytes(),
        args.counter,
        args.payload.into_bytes(),
    )
    .encode(cipher.is_some(), as_dyn(&cipher))?;

    let mut conn = args
        .endpoint
        .connect()
        .await
        .with_context(|| format!("failed to connect to {}", args.endpoint))?;
    conn.write_all(&request.frame).await?;
    conn.flush().await?;
    tracing::debug!(endpoint = %args.endpoint, bytes = request.frame.len(), "probe frame sent");

    let timeout = Duration::from_millis(args.timeout_ms);
    let (header, payload) = tokio::time::timeout(timeout, read_frame(&mut conn))
        .await
        .map_err(|_| anyhow!("no reply from {} within {timeout:?}", args.endpoint))??;

    let out = json!({
        "command": header.command_str(),
        "counter": header.counter,
        "payload": String::from_utf8_lossy(&payload),
    });
    println!("{}", serde_json::to_string(&out)?);
    Ok(())
}

async fn read_frame(conn: &mut BoxedConnection) -> Result<(ClusterHeader, Bytes)> {
    let mut decoder = ClusterDecoder::new();
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        if let Some(frame) = decoder.decode(&mut buf)? {
            return Ok(frame);
        }
        if conn.read_buf(&mut buf).await? == 0 {
            match decoder.pending_payload() {
                Some(expected) => bail!(
                    "relay closed mid-frame: {} of {expected} payload bytes",
                    buf.len()
                ),
                None => bail!("relay closed after {} header bytes", buf.len()),
            }
        }
    }
}
