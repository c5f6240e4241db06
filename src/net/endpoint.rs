use serde::Deserialize;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};

/// Socket address for either side of the harness.
///
/// Written as `unix:<path>` or `tcp:<host>:<port>` in config files and on
/// the command line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp { host: String, port: u16 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointParseError {
    #[error("endpoint {0:?} must start with unix: or tcp:")]
    UnknownScheme(String),
    #[error("endpoint {0:?} has an empty unix socket path")]
    EmptyPath(String),
    #[error("endpoint {0:?} must be tcp:<host>:<port>")]
    MissingPort(String),
    #[error("endpoint {0:?} has an invalid port")]
    InvalidPort(String),
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(EndpointParseError::EmptyPath(s.to_string()));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        if let Some(addr) = s.strip_prefix("tcp:") {
            let (host, port) = addr
                .rsplit_once(':')
                .ok_or_else(|| EndpointParseError::MissingPort(s.to_string()))?;
            if host.is_empty() {
                return Err(EndpointParseError::MissingPort(s.to_string()));
            }
            let port = port
                .parse()
                .map_err(|_| EndpointParseError::InvalidPort(s.to_string()))?;
            return Ok(Self::Tcp {
                host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
                port,
            });
        }
        Err(EndpointParseError::UnknownScheme(s.to_string()))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = EndpointParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl Endpoint {
    /// Dial the endpoint without TLS.
    pub async fn connect(&self) -> io::Result<BoxedConnection> {
        match self {
            Self::Unix(path) => Ok(Box::new(UnixStream::connect(path).await?)),
            Self::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port)).await?;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Tcp { host, port } if host.contains(':') => write!(f, "tcp:[{host}]:{port}"),
            Self::Tcp { host, port } => write!(f, "tcp:{host}:{port}"),
        }
    }
}

/// Byte stream over any of the supported transports.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type BoxedConnection = Box<dyn Connection>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unix_and_tcp() {
        assert_eq!(
            "unix:/var/ossec/queue/cluster/c-internal.sock"
                .parse::<Endpoint>()
                .unwrap(),
            Endpoint::Unix("/var/ossec/queue/cluster/c-internal.sock".into())
        );
        assert_eq!(
            "tcp:localhost:1515".parse::<Endpoint>().unwrap(),
            Endpoint::Tcp {
                host: "localhost".into(),
                port: 1515
            }
        );
        assert_eq!(
            "tcp:[::1]:1516".parse::<Endpoint>().unwrap().to_string(),
            "tcp:[::1]:1516"
        );
    }

    #[test]
    fn rejects_malformed() {
        assert!(matches!(
            "localhost:1515".parse::<Endpoint>(),
            Err(EndpointParseError::UnknownScheme(_))
        ));
        assert!(matches!(
            "unix:".parse::<Endpoint>(),
            Err(EndpointParseError::EmptyPath(_))
        ));
        assert!(matches!(
            "tcp:localhost".parse::<Endpoint>(),
            Err(EndpointParseError::MissingPort(_))
        ));
        assert!(matches!(
            "tcp:localhost:http".parse::<Endpoint>(),
            Err(EndpointParseError::InvalidPort(_))
        ));
    }
}
