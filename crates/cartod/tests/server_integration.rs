//! End-to-end tests: real listener, real WebSocket clients.
//!
//! Each test binds `127.0.0.1:0`, serves the sync router on it and talks to
//! it with `tokio-tungstenite`.
//!
//! Tests may use `.unwrap()` and `.expect()`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use carto_core::PROJECT_ID;
use carto_protocol::{Envelope, Event, EventKind};
use cartod::config::Config;
use cartod::hub::{spawn_hub, HubHandle};
use cartod::server::{HealthResponse, OriginPolicy, SyncServer};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for a frame or a state change
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between condition checks
const POLL_INTERVAL: Duration = Duration::from_millis(10);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// Test Server
// ============================================================================

struct TestServer {
    addr: SocketAddr,
    hub: HubHandle,
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_with(Config::default()).await
    }

    async fn start_with(config: Config) -> Self {
        Self::start_with_policy(config, None).await
    }

    async fn start_with_policy(config: Config, policy: Option<Arc<dyn OriginPolicy>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hub = spawn_hub(&config.hub);
        let cancel_token = CancellationToken::new();
        let mut server = SyncServer::new(config, hub.clone(), cancel_token.clone());
        if let Some(policy) = policy {
            server = server.with_origin_policy(policy);
        }

        let task = tokio::spawn(async move {
            server.serve(listener).await.unwrap();
        });

        Self {
            addr,
            hub,
            cancel_token,
            task,
        }
    }

    fn url(&self, query: &str) -> String {
        format!("ws://{}/ws{}", self.addr, query)
    }

    async fn connect_from(&self, origin: &'static str) -> Result<Client, WsError> {
        let mut request = self.url("").into_client_request().unwrap();
        request
            .headers_mut()
            .insert("Origin", HeaderValue::from_static(origin));
        connect_async(request).await.map(|(client, _)| client)
    }

    async fn connect(&self, query: &str) -> Client {
        let (client, _) = connect_async(self.url(query)).await.unwrap();
        client
    }

    async fn wait_for_clients(&self, expected: usize) {
        let start = Instant::now();
        while self.hub.client_count() != expected {
            assert!(
                start.elapsed() < WAIT_TIMEOUT,
                "expected {expected} clients, have {}",
                self.hub.client_count()
            );
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn stop(self) {
        self.cancel_token.cancel();
        timeout(WAIT_TIMEOUT, self.task)
            .await
            .expect("server did not stop")
            .unwrap();
    }
}

/// Next envelope lines from a text frame. Queued frames may arrive
/// newline-joined in one WebSocket message.
async fn next_envelopes(client: &mut Client) -> Vec<Envelope> {
    loop {
        let message = timeout(WAIT_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .expect("read error");
        match message {
            Message::Text(text) => {
                return text
                    .as_str()
                    .lines()
                    .map(|line| Envelope::from_json(line).unwrap())
                    .collect();
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

/// Reads until a close frame arrives and returns its code.
async fn next_close_code(client: &mut Client) -> Option<CloseCode> {
    loop {
        let message = timeout(WAIT_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for close")?;
        match message {
            Ok(Message::Close(frame)) => return frame.map(|f| f.code),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

fn task_id(envelope: &Envelope) -> String {
    match envelope.decode().unwrap() {
        Event::TaskCreated(e) | Event::TaskUpdated(e) | Event::TaskDeleted(e) => e.task_id,
        other => panic!("expected a task event, got {other:?}"),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_json_ping_gets_pong() {
    let server = TestServer::start().await;
    let mut client = server.connect("").await;
    server.wait_for_clients(1).await;

    client
        .send(Message::text(r#"{"type":"ping"}"#.to_string()))
        .await
        .unwrap();

    let envelopes = next_envelopes(&mut client).await;
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0].kind(), EventKind::Pong);

    server.stop().await;
}

#[tokio::test]
async fn test_invalid_json_gets_error_envelope() {
    let server = TestServer::start().await;
    let mut client = server.connect("").await;
    server.wait_for_clients(1).await;

    client
        .send(Message::text("not json".to_string()))
        .await
        .unwrap();

    let envelopes = next_envelopes(&mut client).await;
    assert_eq!(envelopes[0].kind(), EventKind::Error);
    assert!(envelopes[0].error_message().is_some());
    // The session survives a bad frame.
    assert_eq!(server.hub.client_count(), 1);

    server.stop().await;
}

#[tokio::test]
async fn test_scoped_broadcast_over_socket() {
    let server = TestServer::start().await;
    let mut p1 = server.connect("?project_id=p1").await;
    let mut p2 = server.connect("?project_id=p2").await;
    server.wait_for_clients(2).await;

    let scoped = Envelope::task_deleted("scoped", "b1").unwrap();
    server
        .hub
        .broadcast_filtered(&scoped, PROJECT_ID, "p1")
        .unwrap();
    server.hub.broadcast_task_deleted("marker", "b1").unwrap();

    let mut seen = Vec::new();
    while seen.len() < 2 {
        seen.extend(next_envelopes(&mut p1).await.iter().map(task_id));
    }
    assert_eq!(seen, vec!["scoped", "marker"]);

    let first = next_envelopes(&mut p2).await;
    assert_eq!(task_id(&first[0]), "marker");

    server.stop().await;
}

#[tokio::test]
async fn test_disallowed_origin_is_forbidden() {
    let mut config = Config::default();
    config.server.allowed_origins = vec!["http://board.example".to_string()];
    let server = TestServer::start_with(config).await;

    match server.connect_from("http://evil.example").await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), StatusCode::FORBIDDEN),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("upgrade should have been refused"),
    }
    assert_eq!(server.hub.client_count(), 0);

    let _client = server.connect_from("http://board.example").await.unwrap();
    server.wait_for_clients(1).await;

    server.stop().await;
}

/// Admits only local development front-ends.
#[derive(Debug)]
struct LocalhostOnly;

impl OriginPolicy for LocalhostOnly {
    fn allows(&self, origin: Option<&str>) -> bool {
        origin.map_or(true, |o| o.starts_with("http://localhost:"))
    }
}

#[tokio::test]
async fn test_custom_origin_policy_is_consulted() {
    let policy: Arc<dyn OriginPolicy> = Arc::new(LocalhostOnly);
    let server = TestServer::start_with_policy(Config::default(), Some(policy)).await;

    match server.connect_from("http://board.example").await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), StatusCode::FORBIDDEN),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("upgrade should have been refused"),
    }

    let _local = server.connect_from("http://localhost:5173").await.unwrap();
    let _no_origin = server.connect("").await;
    server.wait_for_clients(2).await;

    server.stop().await;
}

#[tokio::test]
async fn test_oversized_frame_ends_session() {
    let mut config = Config::default();
    config.session.max_message_size = 1024;
    let server = TestServer::start_with(config).await;

    let mut client = server.connect("").await;
    server.wait_for_clients(1).await;

    let padding = "x".repeat(4096);
    let frame = format!(r#"{{"type":"ping","padding":"{padding}"}}"#);
    client.send(Message::text(frame)).await.unwrap();

    server.wait_for_clients(0).await;

    server.stop().await;
}

#[tokio::test]
async fn test_full_registry_rejects_with_try_again() {
    let mut config = Config::default();
    config.hub.max_sessions = 1;
    let server = TestServer::start_with(config).await;

    let _first = server.connect("").await;
    server.wait_for_clients(1).await;

    let mut second = server.connect("").await;
    assert_eq!(next_close_code(&mut second).await, Some(CloseCode::Again));
    assert_eq!(server.hub.client_count(), 1);

    server.stop().await;
}

#[tokio::test]
async fn test_client_disconnect_unregisters() {
    let server = TestServer::start().await;
    let mut client = server.connect("").await;
    server.wait_for_clients(1).await;

    client.close(None).await.unwrap();
    server.wait_for_clients(0).await;

    server.stop().await;
}

#[tokio::test]
async fn test_silent_client_is_dropped() {
    let mut config = Config::default();
    config.session.ping_period_ms = 100;
    config.session.pong_wait_ms = 300;
    let server = TestServer::start_with(config).await;

    // Never polled, so control pings go unanswered.
    let _client = server.connect("").await;
    server.wait_for_clients(1).await;

    server.wait_for_clients(0).await;

    server.stop().await;
}

#[tokio::test]
async fn test_responsive_client_stays_connected() {
    let mut config = Config::default();
    config.session.ping_period_ms = 100;
    config.session.pong_wait_ms = 500;
    let server = TestServer::start_with(config).await;

    let mut client = server.connect("").await;
    server.wait_for_clients(1).await;

    // Reading lets the client answer pings.
    let reader = tokio::spawn(async move { while client.next().await.is_some() {} });

    sleep(Duration::from_millis(1_200)).await;
    assert_eq!(server.hub.client_count(), 1);

    server.stop().await;
    reader.abort();
}

#[tokio::test]
async fn test_shutdown_sends_going_away() {
    let server = TestServer::start().await;
    let mut client = server.connect("?project_id=p1").await;
    server.wait_for_clients(1).await;

    let hub = server.hub.clone();
    server.cancel_token.cancel();

    assert_eq!(next_close_code(&mut client).await, Some(CloseCode::Away));

    timeout(WAIT_TIMEOUT, server.task)
        .await
        .expect("server did not stop")
        .unwrap();
    assert_eq!(hub.client_count(), 0);
    assert!(!hub.is_running());
}

#[tokio::test]
async fn test_health_over_http() {
    let server = TestServer::start().await;
    let _client = server.connect("").await;
    server.wait_for_clients(1).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    let request = format!(
        "GET /health HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        server.addr
    );
    tokio::io::AsyncWriteExt::write_all(&mut stream, request.as_bytes())
        .await
        .unwrap();
    let mut raw = String::new();
    tokio::io::AsyncReadExt::read_to_string(&mut stream, &mut raw)
        .await
        .unwrap();

    assert!(raw.starts_with("HTTP/1.1 200"));
    let body = raw.split("\r\n\r\n").nth(1).unwrap();
    let health: HealthResponse = serde_json::from_str(body).unwrap();
    assert_eq!(health.clients, 1);

    server.stop().await;
}
