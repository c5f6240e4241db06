//! CLI command implementations.

mod frame;
mod probe;
mod relay;
mod run;

pub use frame::run_frame;
pub use probe::run_probe;
pub use relay::run_relay;
pub use run::run_stages;

use crate::wire::{Aes256GcmCipher, PayloadCipher};
use anyhow::{Context, Result};

/// Logging flags shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub level: Option<String>,
    pub json: bool,
}

fn cipher_from_key(key: Option<&str>) -> Result<Option<Aes256GcmCipher>> {
    key.map(|key| Aes256GcmCipher::from_hex(key).context("key must be 64 hex characters"))
        .transpose()
}

fn as_dyn(cipher: &Option<Aes256GcmCipher>) -> Option<&dyn PayloadCipher> {
    cipher.as_ref().map(|c| c as &dyn PayloadCipher)
}
