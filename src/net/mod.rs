//! Networking: endpoint addressing, the relay listener and the
//! enrollment-side client (plain TCP, Unix or TLS).

pub mod client;
pub mod endpoint;
pub mod listener;
pub mod tls;

pub use client::{ClientSettings, EnrollmentClient};
pub use endpoint::{BoxedConnection, Connection, Endpoint, EndpointParseError};
pub use listener::RelayListener;
pub use tls::TlsProfile;

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("invalid TLS server name {0:?}")]
    InvalidServerName(String),
    #[error("socket is not open")]
    NotConnected,
    #[error("peer closed the connection before sending data")]
    Closed,
    #[error("no data received within {0:?}")]
    Timeout(Duration),
    #[error("message of {0} bytes does not fit a size prefix")]
    MessageTooLarge(usize),
    #[error("size prefix declares {declared} bytes, limit is {limit} (prefix bytes {prefix:?})")]
    OversizedResponse {
        declared: usize,
        limit: usize,
        /// The four prefix bytes as text; a daemon answering unframed shows here.
        prefix: String,
    },
}
