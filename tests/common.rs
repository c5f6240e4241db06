//! Common test harness utilities for integration tests.
//!
//! This module provides helpers for:
//! - Allocating socket paths in temporary directories
//! - Running a fake enrollment daemon that talks to the relay
//! - Playing the daemon side of the cluster socket directly
//! - Generating ephemeral TLS materials

// Not all test files use all helpers; silence dead_code warnings for unused exports.
#![allow(dead_code)]

use bytes::BytesMut;
use enroll_relay::net::Endpoint;
use enroll_relay::wire::{build, ClusterDecoder};
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Unix socket endpoint inside `dir`.
pub fn socket_endpoint(dir: &TempDir, name: &str) -> Endpoint {
    Endpoint::Unix(dir.path().join(name))
}

/// Payload the fake daemon forwards to the cluster for a client request.
pub fn cluster_request(port_input: &str) -> String {
    format!(r#"{{"daemon_name":"authd","message":"{port_input}"}}"#)
}

/// Client response the fake daemon derives from the cluster reply.
pub fn client_response(cluster_output: &str) -> String {
    format!("OSSEC K:'{cluster_output}'")
}

/// Send one frame to the relay and return the reply payload.
pub async fn cluster_call(relay: &Endpoint, payload: &[u8]) -> std::io::Result<String> {
    let frame = build(b"dapi", 1, payload, false, None)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?
        .frame;
    send_raw(relay, &frame).await
}

/// Write raw bytes to the relay and decode the reply frame.
pub async fn send_raw(relay: &Endpoint, bytes: &[u8]) -> std::io::Result<String> {
    let mut conn = relay.connect().await?;
    conn.write_all(bytes).await?;
    conn.flush().await?;
    let mut decoder = ClusterDecoder::new();
    let mut buf = BytesMut::new();
    loop {
        let decoded = decoder
            .decode(&mut buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if let Some((_, payload)) = decoded {
            return Ok(String::from_utf8_lossy(&payload).into_owned());
        }
        if conn.read_buf(&mut buf).await? == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
    }
}

/// How the fake daemon handles a client request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonMode {
    /// Forward to the cluster and answer with [`client_response`].
    Relaying,
    /// Read the request and never answer.
    Silent,
    /// Send a bare header to the cluster, then report the failure.
    BareHeader,
}

/// Stand-in for the enrollment daemon: a TCP client port backed by the relay.
pub struct FakeDaemon {
    pub endpoint: Endpoint,
    task: JoinHandle<()>,
}

impl Drop for FakeDaemon {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub async fn spawn_daemon(relay: Endpoint, mode: DaemonMode) -> FakeDaemon {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind daemon");
    let addr = listener.local_addr().expect("daemon addr");
    let task = tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                return;
            };
            let mut buf = vec![0u8; 4096];
            let n = sock.read(&mut buf).await.unwrap_or(0);
            if n == 0 {
                continue;
            }
            let request = String::from_utf8_lossy(&buf[..n]).into_owned();
            let response = match mode {
                DaemonMode::Silent => {
                    held.push(sock);
                    continue;
                }
                DaemonMode::Relaying => {
                    match cluster_call(&relay, cluster_request(&request).as_bytes()).await {
                        Ok(reply) => client_response(&reply),
                        Err(err) => format!("ERROR: {err}"),
                    }
                }
                DaemonMode::BareHeader => {
                    let header = build(b"dapi", 1, b"", false, None).expect("header").frame;
                    let _ = send_raw(&relay, &header).await;
                    "ERROR: Cannot comunicate with master".to_string()
                }
            };
            let _ = sock.write_all(response.as_bytes()).await;
            let _ = sock.shutdown().await;
        }
    });
    FakeDaemon {
        endpoint: Endpoint::Tcp {
            host: addr.ip().to_string(),
            port: addr.port(),
        },
        task,
    }
}

/// Give spawned tasks a moment to run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// TLS material paths returned by [`write_tls_materials`].
#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub chain: PathBuf,
    pub key: PathBuf,
    pub ca: PathBuf,
    pub chain_der: Vec<Vec<u8>>,
    pub key_der: Vec<u8>,
}

/// Generate a self-signed CA and a `localhost` leaf signed by it.
pub fn write_tls_materials(dir: &Path) -> TlsPaths {
    let ca_key = KeyPair::generate().expect("generate CA key");
    let mut ca_params = CertificateParams::default();
    ca_params
        .distinguished_name
        .push(DnType::CommonName, "test-ca");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let ca_cert = ca_params.self_signed(&ca_key).expect("self-sign CA");

    let leaf_key = KeyPair::generate().expect("generate leaf key");
    let mut leaf_params =
        CertificateParams::new(vec!["localhost".into()]).expect("leaf cert params");
    leaf_params
        .distinguished_name
        .push(DnType::CommonName, "localhost");
    let leaf_cert = leaf_params
        .signed_by(&leaf_key, &ca_cert, &ca_key)
        .expect("sign leaf cert");

    let mut chain = leaf_cert.pem();
    chain.push_str(&ca_cert.pem());

    let ca_path = dir.join("ca.pem");
    let chain_path = dir.join("chain.pem");
    let key_path = dir.join("key.pem");
    fs::write(&ca_path, ca_cert.pem()).expect("write CA");
    fs::write(&chain_path, &chain).expect("write chain");
    fs::write(&key_path, leaf_key.serialize_pem()).expect("write key");

    TlsPaths {
        chain: chain_path,
        key: key_path,
        ca: ca_path,
        chain_der: vec![leaf_cert.der().to_vec(), ca_cert.der().to_vec()],
        key_der: leaf_key.serialize_der(),
    }
}
