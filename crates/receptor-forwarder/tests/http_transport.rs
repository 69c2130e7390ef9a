//! HttpTransport against a local axum receiver.

use std::collections::{HashMap, VecDeque};
use std::io::Read;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use flate2::read::GzDecoder;
use receptor_forwarder::{HttpTransport, HttpTransportConfig, Transport, TransportError};

#[derive(Debug, Clone)]
struct Received {
    query: HashMap<String, String>,
    headers: HeaderMap,
    body: Vec<u8>,
}

#[derive(Default)]
struct Receiver {
    /// Status codes to answer with, in order. Empty means 200.
    statuses: Mutex<VecDeque<u16>>,
    received: Mutex<Vec<Received>>,
}

async fn intake(
    State(receiver): State<Arc<Receiver>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    receiver.received.lock().unwrap().push(Received {
        query,
        headers,
        body: body.to_vec(),
    });
    let code = receiver.statuses.lock().unwrap().pop_front().unwrap_or(200);
    StatusCode::from_u16(code).unwrap()
}

async fn spawn_receiver(statuses: &[u16]) -> (SocketAddr, Arc<Receiver>) {
    let receiver = Arc::new(Receiver::default());
    receiver
        .statuses
        .lock()
        .unwrap()
        .extend(statuses.iter().copied());

    let router = Router::new()
        .route("/stsAgent/intake", post(intake))
        .with_state(receiver.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr, receiver)
}

fn transport(addr: SocketAddr, gzip: bool) -> HttpTransport {
    let mut config = HttpTransportConfig::new(format!("http://{addr}"), "secret-key");
    config.hostname = "agent-host".to_string();
    config.gzip = gzip;
    config.retry_min = Duration::from_millis(10);
    config.retry_max = Duration::from_millis(40);
    config.max_retries = 3;
    HttpTransport::new(config).unwrap()
}

#[tokio::test]
async fn posts_gzipped_json_with_agent_headers() {
    let (addr, receiver) = spawn_receiver(&[]).await;
    let body = br#"{"internalHostname":"agent-host"}"#.to_vec();

    transport(addr, true)
        .post("stsAgent/intake", body.clone())
        .await
        .unwrap();

    let received = receiver.received.lock().unwrap().clone();
    assert_eq!(received.len(), 1);
    let request = &received[0];
    assert_eq!(request.query.get("api_key").map(String::as_str), Some("secret-key"));
    assert_eq!(request.headers["sts-api-key"], "secret-key");
    assert_eq!(request.headers["sts-hostname"], "agent-host");
    assert_eq!(request.headers["content-type"], "application/json");
    assert_eq!(request.headers["content-encoding"], "gzip");

    let mut decoded = Vec::new();
    GzDecoder::new(request.body.as_slice())
        .read_to_end(&mut decoded)
        .unwrap();
    assert_eq!(decoded, body);
}

#[tokio::test]
async fn plain_body_without_gzip() {
    let (addr, receiver) = spawn_receiver(&[]).await;
    transport(addr, false)
        .post("stsAgent/intake", b"{}".to_vec())
        .await
        .unwrap();

    let received = receiver.received.lock().unwrap().clone();
    assert_eq!(received[0].body, b"{}");
    assert!(received[0].headers.get("content-encoding").is_none());
}

#[tokio::test]
async fn server_errors_are_retried_until_success() {
    let (addr, receiver) = spawn_receiver(&[500, 503]).await;
    transport(addr, true)
        .post("stsAgent/intake", b"{}".to_vec())
        .await
        .unwrap();
    assert_eq!(receiver.received.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn retries_give_up_after_ceiling() {
    let (addr, receiver) = spawn_receiver(&[500, 500, 500, 500, 500, 500]).await;
    let err = transport(addr, true)
        .post("stsAgent/intake", b"{}".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Status { code: 500 }));
    // One attempt plus three retries.
    assert_eq!(receiver.received.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn client_errors_fail_immediately() {
    let (addr, receiver) = spawn_receiver(&[400]).await;
    let err = transport(addr, true)
        .post("stsAgent/intake", b"{}".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Status { code: 400 }));
    assert_eq!(receiver.received.lock().unwrap().len(), 1);
}
