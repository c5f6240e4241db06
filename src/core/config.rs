use crate::harness::ControllerSettings;
use crate::net::{ClientSettings, Endpoint, TlsProfile};
use crate::relay::{ReplyCounter, ReplyOptions, RelaySettings};
use anyhow::{bail, Context, Result};
use bytes::Bytes;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_RELAY_SOCKET: &str = "/var/ossec/queue/cluster/c-internal.sock";
const DEFAULT_CLIENT_PORT: u16 = 1515;
const DEFAULT_STARTUP_PATTERN: &str = "Accepting connections on port 1515";

/// Top-level configuration for a test run.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub groups: GroupsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Socket the daemon dials to reach the cluster master.
    #[serde(default = "default_relay_endpoint")]
    pub endpoint: Endpoint,
    #[serde(default = "default_reply_command")]
    pub reply_command: String,
    #[serde(default)]
    pub reply_counter: ReplyCounter,
    #[serde(default = "default_relay_read_buffer")]
    pub read_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Enrollment port of the daemon under test.
    #[serde(default = "default_client_endpoint")]
    pub endpoint: Endpoint,
    /// Present when the daemon expects TLS on its client port.
    #[serde(default)]
    pub tls: Option<TlsProfile>,
    /// Prefix each request with its little-endian u32 length.
    #[serde(default)]
    pub size_prefixed: bool,
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    #[serde(default = "default_client_read_buffer")]
    pub read_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,
    /// Daemon log to watch for the startup line before the first stage.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    #[serde(default = "default_startup_pattern")]
    pub startup_pattern: String,
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupsConfig {
    /// Group management tool. Without it stage groups are assumed to exist.
    #[serde(default)]
    pub tool: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint: default_relay_endpoint(),
            reply_command: default_reply_command(),
            reply_counter: ReplyCounter::default(),
            read_buffer: default_relay_read_buffer(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_client_endpoint(),
            tls: None,
            size_prefixed: false,
            response_timeout_ms: default_response_timeout_ms(),
            read_buffer: default_client_read_buffer(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            capture_timeout_ms: default_capture_timeout_ms(),
            log_path: None,
            startup_pattern: default_startup_pattern(),
            startup_timeout_ms: default_startup_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl RelayConfig {
    pub fn settings(&self) -> RelaySettings {
        RelaySettings {
            read_buffer: self.read_buffer,
        }
    }

    pub fn reply_options(&self) -> ReplyOptions {
        ReplyOptions {
            command: Bytes::from(self.reply_command.clone().into_bytes()),
            counter: self.reply_counter,
        }
    }
}

impl ClientConfig {
    pub fn settings(&self) -> ClientSettings {
        ClientSettings {
            endpoint: self.endpoint.clone(),
            tls: self.tls.clone(),
            size_prefixed: self.size_prefixed,
            read_buffer: self.read_buffer,
        }
    }
}

impl MonitorConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_ref = path.as_ref();
        let data = fs::read_to_string(path_ref)
            .with_context(|| format!("unable to read config {}", path_ref.display()))?;
        let cfg: Self = toml::from_str(&data)
            .with_context(|| format!("invalid TOML config {}", path_ref.display()))?;
        cfg.validate()
            .with_context(|| format!("invalid config {}", path_ref.display()))?;
        Ok(cfg)
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            response_timeout: Duration::from_millis(self.client.response_timeout_ms),
            capture_timeout: Duration::from_millis(self.monitor.capture_timeout_ms),
        }
    }

    /// Validate schema-level invariants before anything binds a socket.
    pub fn validate(&self) -> Result<()> {
        if self.relay.reply_command.is_empty() {
            bail!("relay.reply_command must be non-empty");
        }
        if self.relay.reply_command.len() > crate::wire::CLUSTER_CMD_HEADER_SIZE {
            bail!(
                "relay.reply_command {:?} does not fit the command field",
                self.relay.reply_command
            );
        }
        if self.relay.reply_command.contains(' ') {
            bail!(
                "relay.reply_command {:?} must not contain spaces",
                self.relay.reply_command
            );
        }
        if self.relay.read_buffer == 0 || self.client.read_buffer == 0 {
            bail!("read_buffer must be > 0");
        }
        if self.client.response_timeout_ms == 0 {
            bail!("client.response_timeout_ms must be > 0");
        }
        if self.monitor.capture_timeout_ms == 0 {
            bail!("monitor.capture_timeout_ms must be > 0");
        }
        if self.client.endpoint == self.relay.endpoint {
            bail!("client.endpoint must differ from relay.endpoint");
        }
        if self.client.tls.is_some() && matches!(self.client.endpoint, Endpoint::Unix(_)) {
            bail!("client.tls requires a tcp endpoint");
        }
        if let Some(tls) = &self.client.tls {
            if let Some(ca) = &tls.ca_path {
                if !ca.exists() {
                    bail!("client.tls.ca_path {} missing", ca.display());
                }
            }
        }
        if let Some(tool) = &self.groups.tool {
            if !tool.exists() {
                bail!("groups.tool {} missing", tool.display());
            }
        }
        Ok(())
    }
}

fn default_relay_endpoint() -> Endpoint {
    Endpoint::Unix(PathBuf::from(DEFAULT_RELAY_SOCKET))
}

fn default_client_endpoint() -> Endpoint {
    Endpoint::Tcp {
        host: "127.0.0.1".to_string(),
        port: DEFAULT_CLIENT_PORT,
    }
}

fn default_reply_command() -> String {
    "send_sync".to_string()
}

fn default_relay_read_buffer() -> usize {
    crate::relay::DEFAULT_READ_BUFFER
}

fn default_client_read_buffer() -> usize {
    crate::net::client::DEFAULT_READ_BUFFER
}

fn default_response_timeout_ms() -> u64 {
    10_000
}

fn default_capture_timeout_ms() -> u64 {
    1_000
}

fn default_startup_pattern() -> String {
    DEFAULT_STARTUP_PATTERN.to_string()
}

fn default_startup_timeout_ms() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.client.endpoint.to_string(), "tcp:127.0.0.1:1515");
        assert_eq!(
            cfg.relay.endpoint.to_string(),
            format!("unix:{DEFAULT_RELAY_SOCKET}")
        );
        assert_eq!(cfg.relay.reply_counter, ReplyCounter::Fixed(2));
        assert_eq!(
            cfg.controller_settings().response_timeout,
            Duration::from_secs(10)
        );
        assert_eq!(cfg.monitor.startup_pattern, DEFAULT_STARTUP_PATTERN);
    }

    #[test]
    fn loads_full_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        fs::write(
            &path,
            r#"
[relay]
endpoint = "tcp:127.0.0.1:1516"
reply_command = "dapi_res"
reply_counter = "echo"

[client]
endpoint = "tcp:127.0.0.1:1515"
size_prefixed = true
response_timeout_ms = 2500

[client.tls]
server_name = "manager"

[monitor]
capture_timeout_ms = 300

[logging]
level = "debug"
json = true
"#,
        )
        .unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.relay.reply_counter, ReplyCounter::Echo);
        assert_eq!(&cfg.relay.reply_options().command[..], b"dapi_res");
        assert!(cfg.client.settings().size_prefixed);
        assert_eq!(cfg.client.tls.as_ref().unwrap().server_name, "manager");
        assert_eq!(
            cfg.controller_settings().capture_timeout,
            Duration::from_millis(300)
        );
        assert!(cfg.logging.json);
    }

    #[test]
    fn rejects_shared_endpoint() {
        let cfg: Config = toml::from_str(
            "[relay]\nendpoint = \"tcp:127.0.0.1:1515\"\n[client]\nendpoint = \"tcp:127.0.0.1:1515\"\n",
        )
        .unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(format!("{err:?}").contains("must differ"));
    }

    #[test]
    fn rejects_oversized_reply_command() {
        let cfg: Config = toml::from_str("[relay]\nreply_command = \"much_too_long\"\n").unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_reply_command_with_space() {
        let cfg: Config = toml::from_str("[relay]\nreply_command = \"send sync\"\n").unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(format!("{err:?}").contains("must not contain spaces"));
    }

    #[test]
    fn tls_over_unix_is_rejected() {
        let cfg: Config = toml::from_str(
            "[client]\nendpoint = \"unix:/tmp/authd.sock\"\n[client.tls]\nverify = false\n",
        )
        .unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(format!("{err:?}").contains("requires a tcp endpoint"));
    }
}
