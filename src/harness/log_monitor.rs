//! Tails a daemon log file until a line containing a pattern shows up.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::time::Instant;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum LogMonitorError {
    #[error("no log line containing {pattern:?} in {path} within {waited:?}")]
    Timeout {
        pattern: String,
        path: String,
        waited: Duration,
    },
    #[error("log monitor I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug)]
pub struct LogMonitor {
    path: PathBuf,
    offset: u64,
    partial: String,
    poll_interval: Duration,
}

impl LogMonitor {
    /// Only lines written after this call are considered.
    pub async fn from_end(path: impl Into<PathBuf>) -> Result<Self, LogMonitorError> {
        let path = path.into();
        let offset = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
            Err(source) => return Err(io_error(&path, source)),
        };
        Ok(Self {
            path,
            offset,
            partial: String::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Consider the whole file, including lines already written.
    pub fn from_start(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            partial: String::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Wait for a line containing `pattern`, returning that line.
    pub async fn wait_for(
        &mut self,
        pattern: &str,
        timeout: Duration,
    ) -> Result<String, LogMonitorError> {
        let deadline = Instant::now() + timeout;
        loop {
            for line in self.read_new_lines().await? {
                if line.contains(pattern) {
                    tracing::debug!(path = %self.path.display(), line = %line, "log pattern matched");
                    return Ok(line);
                }
            }
            if Instant::now() >= deadline {
                return Err(LogMonitorError::Timeout {
                    pattern: pattern.to_string(),
                    path: self.path.display().to_string(),
                    waited: timeout,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn read_new_lines(&mut self) -> Result<Vec<String>, LogMonitorError> {
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(io_error(&self.path, source)),
        };
        let len = file
            .metadata()
            .await
            .map_err(|source| io_error(&self.path, source))?
            .len();
        if len < self.offset {
            // Truncated (daemon restart clears the log); start over.
            self.offset = 0;
            self.partial.clear();
        }
        file.seek(SeekFrom::Start(self.offset))
            .await
            .map_err(|source| io_error(&self.path, source))?;
        let mut chunk = Vec::new();
        let read = file
            .read_to_end(&mut chunk)
            .await
            .map_err(|source| io_error(&self.path, source))?;
        self.offset += read as u64;

        self.partial.push_str(&String::from_utf8_lossy(&chunk));
        let mut lines = Vec::new();
        while let Some(pos) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=pos).collect();
            lines.push(line.trim_end_matches(&['\r', '\n'][..]).to_string());
        }
        Ok(lines)
    }
}

/// Block until the daemon log shows its startup line.
///
/// The whole file is searched, so a daemon started before the harness
/// still counts as ready.
pub async fn wait_for_startup(
    path: &Path,
    pattern: &str,
    timeout: Duration,
) -> Result<String, LogMonitorError> {
    LogMonitor::from_start(path).wait_for(pattern, timeout).await
}

fn io_error(path: &Path, source: std::io::Error) -> LogMonitorError {
    LogMonitorError::Io {
        path: path.display().to_string(),
        source,
    }
}
