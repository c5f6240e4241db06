//! TLS client configuration for the enrollment endpoint.

use super::TransportError;
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, Error as TlsError, RootCertStore, ServerName};
use rustls_pemfile::certs;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_rustls::TlsConnector;

/// TLS settings for the client-facing socket.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsProfile {
    /// PEM bundle used to verify the daemon certificate.
    #[serde(default)]
    pub ca_path: Option<PathBuf>,
    /// Verify the daemon certificate. Enrollment daemons usually run with a
    /// self-signed certificate, so this is off by default.
    #[serde(default)]
    pub verify: bool,
    /// SNI / verification name.
    #[serde(default = "default_server_name")]
    pub server_name: String,
}

impl Default for TlsProfile {
    fn default() -> Self {
        Self {
            ca_path: None,
            verify: false,
            server_name: default_server_name(),
        }
    }
}

fn default_server_name() -> String {
    "localhost".to_string()
}

impl TlsProfile {
    pub fn connector(&self) -> Result<TlsConnector, TransportError> {
        Ok(TlsConnector::from(Arc::new(self.client_config()?)))
    }

    pub fn server_name(&self) -> Result<ServerName, TransportError> {
        ServerName::try_from(self.server_name.as_str())
            .map_err(|_| TransportError::InvalidServerName(self.server_name.clone()))
    }

    fn client_config(&self) -> Result<ClientConfig, TransportError> {
        let mut roots = RootCertStore::empty();
        if let Some(ca_path) = &self.ca_path {
            let added = load_roots(&mut roots, ca_path)?;
            tracing::debug!(ca = %ca_path.display(), added, "loaded enrollment CA bundle");
        } else if self.verify {
            return Err(TransportError::Tls(
                "tls.verify requires tls.ca_path".to_string(),
            ));
        }

        let mut config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth();
        if !self.verify {
            config
                .dangerous()
                .set_certificate_verifier(Arc::new(AcceptAnyServerCert));
        }
        Ok(config)
    }
}

fn load_roots(roots: &mut RootCertStore, ca_path: &Path) -> Result<usize, TransportError> {
    let file = File::open(ca_path).map_err(|err| {
        TransportError::Tls(format!("open CA bundle {}: {err}", ca_path.display()))
    })?;
    let der = certs(&mut BufReader::new(file)).map_err(|err| {
        TransportError::Tls(format!("parse CA bundle {}: {err}", ca_path.display()))
    })?;
    let (added, _) = roots.add_parsable_certificates(&der);
    if added == 0 {
        return Err(TransportError::Tls(format!(
            "no CA certificates loaded from {}",
            ca_path.display()
        )));
    }
    Ok(added)
}

struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_without_ca_is_rejected() {
        let profile = TlsProfile {
            verify: true,
            ..TlsProfile::default()
        };
        assert!(matches!(profile.connector(), Err(TransportError::Tls(_))));
    }

    #[test]
    fn default_profile_builds_connector() {
        let profile = TlsProfile::default();
        assert!(profile.connector().is_ok());
        assert!(profile.server_name().is_ok());
    }
}
