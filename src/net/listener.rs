//! Listening side of the relay.

use super::endpoint::{BoxedConnection, Endpoint};
use std::io;
use std::path::PathBuf;
use tokio::net::{TcpListener, UnixListener};

/// Bound listener for the relay endpoint.
#[derive(Debug)]
pub enum RelayListener {
    Unix {
        listener: UnixListener,
        path: PathBuf,
    },
    Tcp(TcpListener),
}

impl RelayListener {
    /// Bind the endpoint. A stale Unix socket file left by a previous run is
    /// removed first.
    pub async fn bind(endpoint: &Endpoint) -> io::Result<Self> {
        match endpoint {
            Endpoint::Unix(path) => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                let listener = UnixListener::bind(path)?;
                Ok(Self::Unix {
                    listener,
                    path: path.clone(),
                })
            }
            Endpoint::Tcp { host, port } => {
                let listener = TcpListener::bind((host.as_str(), *port)).await?;
                Ok(Self::Tcp(listener))
            }
        }
    }

    /// Actual bound endpoint (resolves port 0).
    pub fn local_endpoint(&self) -> io::Result<Endpoint> {
        match self {
            Self::Unix { path, .. } => Ok(Endpoint::Unix(path.clone())),
            Self::Tcp(listener) => {
                let addr = listener.local_addr()?;
                Ok(Endpoint::Tcp {
                    host: addr.ip().to_string(),
                    port: addr.port(),
                })
            }
        }
    }

    /// Accept one connection, returning it with a printable peer label.
    pub async fn accept(&self) -> io::Result<(BoxedConnection, String)> {
        match self {
            Self::Unix { listener, path } => {
                let (stream, _) = listener.accept().await?;
                Ok((Box::new(stream), format!("unix:{}", path.display())))
            }
            Self::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok((Box::new(stream), peer.to_string()))
            }
        }
    }

    /// Remove the socket file, if any. Called on relay shutdown.
    pub fn cleanup(&self) {
        if let Self::Unix { path, .. } = self {
            if let Err(err) = std::fs::remove_file(path) {
                if err.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), "failed to remove relay socket: {err}");
                }
            }
        }
    }
}
