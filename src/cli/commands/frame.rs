//! Frame command - encode and decode cluster frames for debugging.

use super::{as_dyn, cipher_from_key};
use crate::cli::args::{FrameAction, FrameArgs};
use crate::wire::{ClusterMessage, CLUSTER_DATA_HEADER_SIZE};
use anyhow::{Context, Result};
use serde_json::json;

pub fn run_frame(args: FrameArgs) -> Result<()> {
    match args.action {
        FrameAction::Build {
            command,
            counter,
            payload,
            key,
        } => {
            let cipher = cipher_from_key(key.as_deref())?;
            let encoded = ClusterMessage::new(command.into_bytes(), counter, payload.into_bytes())
                .encode(cipher.is_some(), as_dyn(&cipher))?;
            println!("{}", hex::encode(&encoded.frame));
        }
        FrameAction::Parse { hex: text, key } => {
            let cipher = cipher_from_key(key.as_deref())?;
            let data = hex::decode(text.trim()).context("frame is not valid hex")?;
            let message = ClusterMessage::decode(&data, cipher.is_some())?;
            let plaintext = message.plaintext(as_dyn(&cipher))?;
            let frame_len = CLUSTER_DATA_HEADER_SIZE + message.payload.len();
            let out = json!({
                "command": String::from_utf8_lossy(&message.command),
                "counter": message.counter,
                "payload_len": message.payload.len(),
                "trailing_bytes": data.len() - frame_len,
                "payload": String::from_utf8_lossy(&plaintext),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}
