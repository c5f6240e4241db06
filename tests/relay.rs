//! Relay behaviour over real sockets: one reply per stage, stage ordering,
//! and malformed-frame handling.

mod common;

use common::{cluster_call, send_raw, settle, socket_endpoint};
use enroll_relay::relay::{
    spawn_cluster_relay, RelayError, RelayPhase, RelaySettings, ReplyCounter, ReplyOptions,
    StageExpectation,
};
use enroll_relay::wire::{build, parse};
use std::time::Duration;
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::test]
async fn relay_replies_once_per_stage() {
    let dir = tempdir().unwrap();
    let endpoint = socket_endpoint(&dir, "c-internal.sock");
    let (relay, mut monitor) =
        spawn_cluster_relay(&endpoint, RelaySettings::default(), ReplyOptions::default())
            .await
            .unwrap();

    relay.configure(StageExpectation::new("ping", "pong"));
    relay.restart().unwrap();

    let mut calls = Vec::new();
    for _ in 0..3 {
        let endpoint = endpoint.clone();
        calls.push(tokio::spawn(async move {
            tokio::time::timeout(Duration::from_millis(300), cluster_call(&endpoint, b"ping"))
                .await
        }));
    }
    let mut answered = 0;
    for call in calls {
        if let Ok(Ok(reply)) = call.await.unwrap() {
            assert_eq!(reply, "pong");
            answered += 1;
        }
    }
    assert_eq!(answered, 1);
    assert_eq!(relay.phase(), RelayPhase::Paused);

    let exchange = monitor
        .next_exchange(1, Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(exchange.input_text(), "ping");
    assert_eq!(monitor.drain(), 0);

    relay.shutdown().await.unwrap();
}

#[tokio::test]
async fn restart_without_new_configuration_is_rejected() {
    let dir = tempdir().unwrap();
    let endpoint = socket_endpoint(&dir, "relay.sock");
    let (relay, mut monitor) =
        spawn_cluster_relay(&endpoint, RelaySettings::default(), ReplyOptions::default())
            .await
            .unwrap();

    let first = relay.configure(StageExpectation::new("a", "first"));
    relay.restart().unwrap();
    assert_eq!(cluster_call(&endpoint, b"a").await.unwrap(), "first");
    monitor
        .next_exchange(first, Duration::from_millis(200))
        .await
        .unwrap();

    assert!(matches!(relay.restart(), Err(RelayError::NotConfigured)));
    assert_eq!(relay.phase(), RelayPhase::Paused);

    let second = relay.configure(StageExpectation::new("b", "second"));
    relay.restart().unwrap();
    assert_eq!(cluster_call(&endpoint, b"b").await.unwrap(), "second");
    let exchange = monitor
        .next_exchange(second, Duration::from_millis(200))
        .await
        .unwrap();
    assert_eq!(exchange.output_text(), "second");

    relay.shutdown().await.unwrap();
}

#[tokio::test]
async fn connection_waits_while_paused() {
    let dir = tempdir().unwrap();
    let endpoint = socket_endpoint(&dir, "relay.sock");
    let (relay, _monitor) =
        spawn_cluster_relay(&endpoint, RelaySettings::default(), ReplyOptions::default())
            .await
            .unwrap();

    let pending = {
        let endpoint = endpoint.clone();
        tokio::spawn(async move { cluster_call(&endpoint, b"early").await })
    };
    settle().await;
    assert!(!pending.is_finished());

    relay.configure(StageExpectation::new("early", "late reply"));
    relay.restart().unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reply, "late reply");

    relay.shutdown().await.unwrap();
}

#[tokio::test]
async fn bare_header_is_a_violation_and_keeps_the_stage_open() {
    let dir = tempdir().unwrap();
    let endpoint = socket_endpoint(&dir, "relay.sock");
    let (relay, mut monitor) =
        spawn_cluster_relay(&endpoint, RelaySettings::default(), ReplyOptions::default())
            .await
            .unwrap();
    let stage = relay.configure(StageExpectation::new("x", "y"));
    relay.restart().unwrap();

    let header = build(b"dapi", 1, b"", false, None).unwrap().frame;
    assert!(send_raw(&endpoint, &header).await.is_err());
    let err = monitor
        .next_exchange(stage, Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::ProtocolViolation { received: 20 }));
    assert_eq!(relay.phase(), RelayPhase::Running);

    assert_eq!(cluster_call(&endpoint, b"x").await.unwrap(), "y");
    assert_eq!(relay.phase(), RelayPhase::Paused);

    relay.shutdown().await.unwrap();
}

#[tokio::test]
async fn reply_header_follows_reply_options() {
    let dir = tempdir().unwrap();
    let endpoint = socket_endpoint(&dir, "relay.sock");
    let options = ReplyOptions {
        counter: ReplyCounter::Echo,
        ..ReplyOptions::default()
    };
    let (relay, _monitor) = spawn_cluster_relay(&endpoint, RelaySettings::default(), options)
        .await
        .unwrap();
    relay.configure(StageExpectation::new("in", "out"));
    relay.restart().unwrap();

    let mut conn = endpoint.connect().await.unwrap();
    let request = build(b"dapi", 77, b"in", false, None).unwrap().frame;
    conn.write_all(&request).await.unwrap();
    let mut reply = Vec::new();
    conn.read_to_end(&mut reply).await.unwrap();

    let (header, payload) = parse(&reply).unwrap();
    assert_eq!(header.counter, 77);
    assert_eq!(header.command_str(), "send_sync");
    assert_eq!(&payload[..], b"out");

    relay.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_removes_socket_file() {
    let dir = tempdir().unwrap();
    let endpoint = socket_endpoint(&dir, "relay.sock");
    let (relay, _monitor) =
        spawn_cluster_relay(&endpoint, RelaySettings::default(), ReplyOptions::default())
            .await
            .unwrap();
    assert!(dir.path().join("relay.sock").exists());
    relay.shutdown().await.unwrap();
    assert!(!dir.path().join("relay.sock").exists());
}
