//! End-to-end: a real gateway, a real holder process loop and HTTP over TCP.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ftrelay::{BackendState, Gateway, GatewayConfig, HolderConfig, ProtocolConfig, Session, share};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, RANGE};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

fn local_config() -> GatewayConfig {
    GatewayConfig {
        http_addr: "127.0.0.1:0".parse().unwrap(),
        control_addr: "127.0.0.1:0".parse().unwrap(),
        content_name: "digits.txt".to_string(),
        round_trip_timeout: Duration::from_secs(5),
        ..GatewayConfig::default()
    }
}

fn temp_file(name: &str, content: &[u8]) -> PathBuf {
    let path = std::env::temp_dir().join(format!("ftrelay-{}-{name}", std::process::id()));
    std::fs::write(&path, content).unwrap();
    path
}

async fn wait_for(session: &Session, wanted: BackendState) {
    for _ in 0..200 {
        if session.state() == wanted {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session never reached {wanted}");
}

/// Start a gateway; returns its HTTP base URL, control address and session.
async fn start_gateway() -> (String, String, Arc<Session>) {
    start_gateway_with(local_config()).await
}

async fn start_gateway_with(config: GatewayConfig) -> (String, String, Arc<Session>) {
    let gateway = Gateway::bind(&config).await.unwrap();
    let base = format!("http://{}", gateway.http_addr().unwrap());
    let control = gateway.control_addr().unwrap().to_string();
    let session = gateway.session();
    tokio::spawn(gateway.run());
    (base, control, session)
}

#[tokio::test]
async fn test_range_download_through_holder() {
    let (base, control, session) = start_gateway().await;
    let path = temp_file("range", b"0123456789");

    let holder = tokio::spawn(async move {
        share(&HolderConfig {
            gateway_addr: control,
            path,
            protocol: ProtocolConfig::default(),
        })
        .await
    });
    wait_for(&session, BackendState::Connected).await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("{base}/digits.txt"))
        .header(RANGE, "bytes=2-5")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[CONTENT_RANGE], "bytes 2-5/10");
    assert_eq!(&response.bytes().await.unwrap()[..], b"2345");

    let response = client.get(&base).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(&response.bytes().await.unwrap()[..], b"0123456789");

    let response = client.get(&base).header(RANGE, "bytes=20-").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(response.headers()[CONTENT_RANGE], "bytes */10");

    assert_eq!(session.bytes_received(), 14);
    assert!(!holder.is_finished());
}

#[tokio::test]
async fn test_concurrent_ranges_stay_consistent() {
    let (base, control, session) = start_gateway().await;
    let content: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    let path = temp_file("concurrent", &content);

    tokio::spawn(async move {
        share(&HolderConfig {
            gateway_addr: control,
            path,
            protocol: ProtocolConfig::default(),
        })
        .await
    });
    wait_for(&session, BackendState::Connected).await;

    let client = reqwest::Client::new();
    let requests = (0..16usize).map(|i| {
        let client = client.clone();
        let url = base.clone();
        let start = i * 200;
        let end = start + 299;
        async move {
            let response = client
                .get(url)
                .header(RANGE, format!("bytes={start}-{end}"))
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
            (start, end, response.bytes().await.unwrap())
        }
    });

    let handles: Vec<_> = requests.map(tokio::spawn).collect();
    for handle in handles {
        let (start, end, body) = handle.await.unwrap();
        assert_eq!(&body[..], &content[start..=end]);
    }
}

#[tokio::test]
async fn test_without_holder_requests_fail_fast() {
    let (base, _control, _session) = start_gateway().await;

    let response = tokio::time::timeout(Duration::from_secs(2), reqwest::get(&base))
        .await
        .expect("request should not wait for a holder")
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_holder_exit_is_reported() {
    let (base, control, session) = start_gateway().await;

    let stream = TcpStream::connect(&control).await.unwrap();
    wait_for(&session, BackendState::Connected).await;
    drop(stream);

    let response = reqwest::get(&base).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(session.state(), BackendState::Lost);
}

fn reconnecting_config() -> GatewayConfig {
    GatewayConfig {
        allow_reconnect: true,
        ..local_config()
    }
}

#[tokio::test]
async fn test_new_holder_accepted_after_idle_exit() {
    let (_base, control, session) = start_gateway_with(reconnecting_config()).await;

    let first = TcpStream::connect(&control).await.unwrap();
    wait_for(&session, BackendState::Connected).await;
    drop(first);
    tokio::time::sleep(Duration::from_millis(200)).await;

    // A refused holder would see its stream closed right away.
    let mut second = TcpStream::connect(&control).await.unwrap();
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_millis(300), second.read(&mut buf)).await;
    assert!(read.is_err(), "second holder was disconnected: {read:?}");
    assert_eq!(session.state(), BackendState::Connected);
}

#[tokio::test]
async fn test_health_reports_idle_exit_and_restart() {
    let (base, control, session) = start_gateway_with(reconnecting_config()).await;
    let client = reqwest::Client::new();
    let health = format!("{base}/health");

    let first = TcpStream::connect(&control).await.unwrap();
    wait_for(&session, BackendState::Connected).await;
    drop(first);

    let mut status = StatusCode::OK;
    for _ in 0..200 {
        status = client.get(&health).send().await.unwrap().status();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(session.state(), BackendState::Lost);

    let path = temp_file("restart", b"0123456789");
    let holder = tokio::spawn(async move {
        share(&HolderConfig {
            gateway_addr: control,
            path,
            protocol: ProtocolConfig::default(),
        })
        .await
    });
    wait_for(&session, BackendState::Connected).await;

    let response = client.get(&base).header(RANGE, "bytes=2-5").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(&response.bytes().await.unwrap()[..], b"2345");

    let response = client.get(&health).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!holder.is_finished());
}
