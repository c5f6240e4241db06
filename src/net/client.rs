//! Client-facing socket used to talk to the enrollment daemon under test.

use super::endpoint::{BoxedConnection, Endpoint};
use super::tls::TlsProfile;
use super::TransportError;
use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

/// Default receive buffer for a single response chunk.
pub const DEFAULT_READ_BUFFER: usize = 4096;

/// Connection settings for the enrollment endpoint.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub endpoint: Endpoint,
    pub tls: Option<TlsProfile>,
    /// Prefix each message with a 4 byte little-endian length and expect the
    /// same framing on responses.
    pub size_prefixed: bool,
    /// Largest response accepted. Also bounds a size-prefixed body.
    pub read_buffer: usize,
}

impl ClientSettings {
    pub fn plain(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            tls: None,
            size_prefixed: false,
            read_buffer: DEFAULT_READ_BUFFER,
        }
    }
}

/// Reopenable connection to the daemon under test.
///
/// The daemon closes the socket after answering an enrollment request, so
/// every stage calls [`open`](Self::open) again.
pub struct EnrollmentClient {
    settings: ClientSettings,
    connector: Option<TlsConnector>,
    conn: Option<BoxedConnection>,
}

impl EnrollmentClient {
    pub fn new(settings: ClientSettings) -> Result<Self, TransportError> {
        let connector = settings.tls.as_ref().map(TlsProfile::connector).transpose()?;
        Ok(Self {
            settings,
            connector,
            conn: None,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.settings.endpoint
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// (Re)connect, dropping any previous connection.
    pub async fn open(&mut self) -> Result<(), TransportError> {
        self.close().await;
        let conn: BoxedConnection = match (&self.settings.endpoint, &self.connector) {
            (endpoint, None) => endpoint.connect().await?,
            (Endpoint::Unix(_), Some(_)) => {
                return Err(TransportError::Tls(
                    "TLS is only supported on tcp endpoints".to_string(),
                ))
            }
            (Endpoint::Tcp { host, port }, Some(connector)) => {
                let stream = TcpStream::connect((host.as_str(), *port)).await?;
                stream.set_nodelay(true)?;
                let name = self
                    .settings
                    .tls
                    .as_ref()
                    .map(TlsProfile::server_name)
                    .transpose()?
                    .ok_or_else(|| TransportError::Tls("missing TLS profile".into()))?;
                let tls = connector
                    .connect(name, stream)
                    .await
                    .map_err(|err| TransportError::Tls(err.to_string()))?;
                Box::new(tls)
            }
        };
        tracing::debug!(endpoint = %self.settings.endpoint, "enrollment socket opened");
        self.conn = Some(conn);
        Ok(())
    }

    pub async fn send(&mut self, message: &[u8]) -> Result<(), TransportError> {
        let size_prefixed = self.settings.size_prefixed;
        let conn = self.conn.as_mut().ok_or(TransportError::NotConnected)?;
        if size_prefixed {
            let len = u32::try_from(message.len())
                .map_err(|_| TransportError::MessageTooLarge(message.len()))?;
            conn.write_all(&len.to_le_bytes()).await?;
        }
        conn.write_all(message).await?;
        conn.flush().await?;
        Ok(())
    }

    /// Wait up to `timeout` for a non-empty response.
    pub async fn receive(&mut self, timeout: Duration) -> Result<Bytes, TransportError> {
        let size_prefixed = self.settings.size_prefixed;
        let read_buffer = self.settings.read_buffer.max(1);
        let conn = self.conn.as_mut().ok_or(TransportError::NotConnected)?;
        tokio::time::timeout(timeout, read_response(conn, size_prefixed, read_buffer))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
    }

    pub async fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            let _ = conn.shutdown().await;
        }
    }
}

async fn read_response(
    conn: &mut BoxedConnection,
    size_prefixed: bool,
    read_buffer: usize,
) -> Result<Bytes, TransportError> {
    if size_prefixed {
        let mut len = [0u8; 4];
        read_exact_or_closed(conn, &mut len).await?;
        let declared = u32::from_le_bytes(len) as usize;
        if declared > read_buffer {
            return Err(TransportError::OversizedResponse {
                declared,
                limit: read_buffer,
                prefix: String::from_utf8_lossy(&len).into_owned(),
            });
        }
        let mut body = vec![0u8; declared];
        read_exact_or_closed(conn, &mut body).await?;
        return Ok(Bytes::from(body));
    }
    let mut buf = vec![0u8; read_buffer];
    let n = conn.read(&mut buf).await?;
    if n == 0 {
        return Err(TransportError::Closed);
    }
    buf.truncate(n);
    Ok(Bytes::from(buf))
}

async fn read_exact_or_closed(
    conn: &mut BoxedConnection,
    buf: &mut [u8],
) -> Result<(), TransportError> {
    match conn.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Err(TransportError::Closed),
        Err(err) => Err(err.into()),
    }
}
