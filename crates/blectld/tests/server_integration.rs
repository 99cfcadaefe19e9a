//! Integration tests for the HTTP server.
//!
//! These tests run the full daemon (context, both workers and the axum
//! router) on an ephemeral port and talk to it over raw TCP, the way a
//! browser would: plain requests for commands and a long-lived chunked
//! response for the event stream.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use blectl_core::{DeviceAddress, Discovery};
use blectld::radio::SimulatedRadio;
use blectld::server::DaemonServer;
use blectld::{AppContext, DaemonConfig, WorkerHandles, Workers};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for one event-stream frame
const FRAME_TIMEOUT: Duration = Duration::from_secs(3);

/// Scan length used by the daemon under test
const SCAN_DURATION: Duration = Duration::from_millis(150);

/// Grace period for server shutdown
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(3);

// ============================================================================
// Test Helpers
// ============================================================================

fn test_config() -> DaemonConfig {
    DaemonConfig {
        listen: SocketAddr::from(([127, 0, 0, 1], 0)),
        scan_duration: SCAN_DURATION,
        connect_timeout: Duration::from_secs(1),
        write_timeout: Duration::from_secs(1),
        ..DaemonConfig::default()
    }
}

fn band() -> Discovery {
    Discovery::new(DeviceAddress::parse("AA:01").unwrap(), Some("Band".into()))
}

fn test_radio(advertised: Vec<Discovery>) -> SimulatedRadio {
    SimulatedRadio::new(advertised)
        .with_discovery_interval(Duration::from_millis(10))
        .with_connect_latency(Duration::from_millis(10))
}

/// Test server context that manages server lifecycle.
struct TestServer {
    addr: SocketAddr,
    cancel_token: CancellationToken,
    ctx: Arc<AppContext<SimulatedRadio>>,
    server: JoinHandle<()>,
    workers: Option<WorkerHandles>,
    /// Built but never spawned; keeps the queues open
    _parked: Option<Workers<SimulatedRadio>>,
}

impl TestServer {
    /// Spawns a fully running daemon.
    async fn spawn(config: DaemonConfig, radio: SimulatedRadio) -> Self {
        let cancel_token = CancellationToken::new();
        let (ctx, workers) = AppContext::start(config, radio, cancel_token.clone())
            .await
            .expect("daemon starts");
        let mut server = Self::serve(ctx, cancel_token).await;
        server.workers = Some(workers);
        server
    }

    /// Spawns the HTTP server without the workers, so queued commands are
    /// never drained.
    async fn spawn_idle(config: DaemonConfig) -> Self {
        let cancel_token = CancellationToken::new();
        let (ctx, workers) = AppContext::new(
            config,
            Arc::new(test_radio(Vec::new())),
            cancel_token.clone(),
        );
        let mut server = Self::serve(ctx, cancel_token).await;
        server._parked = Some(workers);
        server
    }

    async fn serve(
        ctx: Arc<AppContext<SimulatedRadio>>,
        cancel_token: CancellationToken,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let server = DaemonServer::new(Arc::clone(&ctx), cancel_token.clone());
        let server = tokio::spawn(async move {
            server.serve(listener).await.expect("server runs");
        });

        Self {
            addr,
            cancel_token,
            ctx,
            server,
            workers: None,
            _parked: None,
        }
    }

    /// Sends one request and returns the status code and body.
    async fn request(&self, method: &str, path: &str) -> (u16, String) {
        let mut stream = TcpStream::connect(self.addr).await.expect("connect");
        let req = format!(
            "{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\nContent-Length: 0\r\n\r\n"
        );
        stream.write_all(req.as_bytes()).await.unwrap();

        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();

        let status = raw
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .expect("status line");
        let body = raw
            .split_once("\r\n\r\n")
            .map(|(_, body)| body.to_string())
            .unwrap_or_default();
        (status, body)
    }

    async fn status(&self, method: &str, path: &str) -> u16 {
        self.request(method, path).await.0
    }

    /// Opens an event stream.
    async fn subscribe(&self) -> EventClient {
        EventClient::open(self.addr).await
    }

    /// Shuts down the server gracefully and waits for everything to stop.
    async fn shutdown(self) {
        self.cancel_token.cancel();
        timeout(SHUTDOWN_GRACE_PERIOD, self.server)
            .await
            .expect("server stops")
            .unwrap();
        if let Some(workers) = self.workers {
            timeout(SHUTDOWN_GRACE_PERIOD, workers.join())
                .await
                .expect("workers stop");
        }
    }
}

/// Client of `GET /events` that decodes the chunked body into frames.
struct EventClient {
    reader: BufReader<TcpStream>,
    headers: String,
    pending: String,
}

impl EventClient {
    async fn open(addr: SocketAddr) -> Self {
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        stream
            .write_all(b"GET /events HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();

        let mut reader = BufReader::new(stream);
        let mut headers = String::new();
        loop {
            let mut line = String::new();
            let n = reader.read_line(&mut line).await.unwrap();
            if n == 0 || line == "\r\n" {
                break;
            }
            headers.push_str(&line.to_ascii_lowercase());
        }

        Self {
            reader,
            headers,
            pending: String::new(),
        }
    }

    fn status(&self) -> u16 {
        self.headers
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .expect("status line")
    }

    fn has_header(&self, name: &str, value: &str) -> bool {
        self.headers
            .lines()
            .any(|line| line.trim_end() == format!("{name}: {value}"))
    }

    async fn read_chunk(&mut self) -> Option<String> {
        let mut size_line = String::new();
        if self.reader.read_line(&mut size_line).await.ok()? == 0 {
            return None;
        }
        let size = usize::from_str_radix(size_line.trim(), 16).ok()?;
        if size == 0 {
            return None;
        }
        let mut buf = vec![0; size + 2];
        self.reader.read_exact(&mut buf).await.ok()?;
        buf.truncate(size);
        String::from_utf8(buf).ok()
    }

    /// Next complete frame, or `None` once the stream ended.
    async fn next_frame(&mut self) -> Option<String> {
        loop {
            if let Some(end) = self.pending.find("\n\n") {
                let frame: String = self.pending.drain(..end + 2).collect();
                return Some(frame);
            }
            let chunk = self.read_chunk().await?;
            self.pending.push_str(&chunk);
        }
    }

    async fn expect_frame(&mut self) -> String {
        timeout(FRAME_TIMEOUT, self.next_frame())
            .await
            .expect("frame within timeout")
            .expect("stream still open")
    }
}

fn info(message: &str) -> String {
    format!("event: INFO\ndata: \"{message}\"\n\n")
}

fn error(message: &str) -> String {
    format!("event: ERROR\ndata: \"{message}\"\n\n")
}

fn device(payload: &str) -> String {
    format!("event: DEVICE\ndata: \"{payload}\"\n\n")
}

// ============================================================================
// Command Endpoint Tests
// ============================================================================

#[tokio::test]
async fn test_command_endpoints_accept_get_and_post() {
    let server = TestServer::spawn(test_config(), test_radio(Vec::new())).await;

    for method in ["GET", "POST"] {
        assert_eq!(server.status(method, "/stop").await, 200);
        assert_eq!(server.status(method, "/disconnect").await, 200);
        assert_eq!(server.status(method, "/connect/AA:01").await, 200);
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_invalid_address_rejected() {
    let server = TestServer::spawn(test_config(), test_radio(Vec::new())).await;

    let (status, body) = server.request("GET", "/connect/AA%3BBB").await;
    assert_eq!(status, 400);
    assert!(body.contains("invalid request"), "body: {body}");

    server.shutdown().await;
}

#[tokio::test]
async fn test_unknown_path_not_found_without_ui() {
    let server = TestServer::spawn(test_config(), test_radio(Vec::new())).await;
    assert_eq!(server.status("GET", "/index.html").await, 404);
    server.shutdown().await;
}

#[tokio::test]
async fn test_static_ui_served() {
    let ui = tempfile::tempdir().unwrap();
    std::fs::write(ui.path().join("index.html"), "<h1>blectl</h1>").unwrap();

    let config = DaemonConfig {
        ui_dir: Some(ui.path().to_path_buf()),
        ..test_config()
    };
    let server = TestServer::spawn(config, test_radio(Vec::new())).await;

    let (status, body) = server.request("GET", "/index.html").await;
    assert_eq!(status, 200);
    assert!(body.contains("<h1>blectl</h1>"));

    // Routes still win over the fallback.
    assert_eq!(server.status("POST", "/stop").await, 200);

    server.shutdown().await;
}

#[tokio::test]
async fn test_full_queue_returns_503() {
    let config = DaemonConfig {
        command_capacity: 2,
        ..test_config()
    };
    let server = TestServer::spawn_idle(config).await;

    assert_eq!(server.status("POST", "/scan").await, 200);
    assert_eq!(server.status("POST", "/scan").await, 200);
    assert_eq!(server.status("POST", "/scan").await, 503);

    server.shutdown().await;
}

// ============================================================================
// Event Stream Tests
// ============================================================================

#[tokio::test]
async fn test_event_stream_headers() {
    let server = TestServer::spawn(test_config(), test_radio(Vec::new())).await;
    let client = server.subscribe().await;

    assert_eq!(client.status(), 200);
    assert!(client.has_header("content-type", "text/event-stream"));
    assert!(client.has_header("cache-control", "no-cache"));

    drop(client);
    server.shutdown().await;
}

#[tokio::test]
async fn test_command_errors_reach_stream() {
    let server = TestServer::spawn(test_config(), test_radio(Vec::new())).await;
    let mut client = server.subscribe().await;

    assert_eq!(server.status("GET", "/disconnect").await, 200);
    assert_eq!(
        client.expect_frame().await,
        error("Currently not connected to any device.")
    );

    assert_eq!(server.status("GET", "/connect/AA:BB").await, 200);
    assert_eq!(client.expect_frame().await, error("Device not found: AA:BB"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_two_subscribers_see_identical_sequences() {
    let server = TestServer::spawn(test_config(), test_radio(vec![band()])).await;
    let mut first = server.subscribe().await;
    let mut second = server.subscribe().await;
    assert_eq!(server.ctx.clients().len(), 2);

    assert_eq!(server.status("POST", "/scan").await, 200);

    let expected = vec![info("Scanning..."), device("AA:01;Band"), info("Stopped Scanning.")];
    for client in [&mut first, &mut second] {
        let mut seen = Vec::new();
        for _ in 0..expected.len() {
            seen.push(client.expect_frame().await);
        }
        assert_eq!(seen, expected);
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_scan_connect_disconnect_flow() {
    let server = TestServer::spawn(test_config(), test_radio(vec![band()])).await;
    let mut client = server.subscribe().await;

    server.status("POST", "/scan").await;
    assert_eq!(client.expect_frame().await, info("Scanning..."));
    assert_eq!(client.expect_frame().await, device("AA:01;Band"));
    assert_eq!(client.expect_frame().await, info("Stopped Scanning."));

    server.status("POST", "/connect/AA:01").await;
    assert_eq!(client.expect_frame().await, info("Connected to Band"));

    server.status("POST", "/connect/AA:01").await;
    assert_eq!(client.expect_frame().await, error("You're already connected."));

    server.status("POST", "/disconnect").await;
    assert_eq!(client.expect_frame().await, info("Disconnected."));
    assert!(!server.ctx.adapter().status().await.connected);

    server.shutdown().await;
}

#[tokio::test]
async fn test_new_stream_replays_known_devices() {
    let server = TestServer::spawn(test_config(), test_radio(vec![band()])).await;
    let mut first = server.subscribe().await;

    server.status("POST", "/scan").await;
    assert_eq!(first.expect_frame().await, info("Scanning..."));
    assert_eq!(first.expect_frame().await, device("AA:01;Band"));
    assert_eq!(first.expect_frame().await, info("Stopped Scanning."));

    // The replay goes out on the shared stream, so both clients see it.
    let mut second = server.subscribe().await;
    assert_eq!(second.expect_frame().await, device("AA:01;Band"));
    assert_eq!(first.expect_frame().await, device("AA:01;Band"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_closed_stream_unregisters() {
    let server = TestServer::spawn(test_config(), test_radio(Vec::new())).await;
    let client = server.subscribe().await;
    assert_eq!(server.ctx.clients().len(), 1);

    drop(client);

    // The closed socket is only noticed when frames are written to it.
    let start = tokio::time::Instant::now();
    while !server.ctx.clients().is_empty() && start.elapsed() < FRAME_TIMEOUT {
        server.status("GET", "/disconnect").await;
        sleep(Duration::from_millis(50)).await;
    }
    assert!(server.ctx.clients().is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn test_max_subscribers_returns_503() {
    let config = DaemonConfig {
        max_subscribers: Some(1),
        ..test_config()
    };
    let server = TestServer::spawn(config, test_radio(Vec::new())).await;

    let first = server.subscribe().await;
    assert_eq!(first.status(), 200);
    let second = server.subscribe().await;
    assert_eq!(second.status(), 503);

    drop(first);
    drop(second);
    server.shutdown().await;
}

#[tokio::test]
async fn test_rejected_stream_leaves_queue_intact() {
    let config = DaemonConfig {
        command_capacity: 2,
        max_subscribers: Some(1),
        ..test_config()
    };
    let server = TestServer::spawn_idle(config).await;

    let first = server.subscribe().await;
    assert_eq!(first.status(), 200);
    assert_eq!(server.status("POST", "/scan").await, 200);
    assert_eq!(server.status("POST", "/disconnect").await, 200);

    let second = server.subscribe().await;
    assert_eq!(second.status(), 503);

    // Both commands are still queued, so the queue is still full.
    assert_eq!(server.status("POST", "/stop").await, 503);

    drop(first);
    drop(second);
    server.shutdown().await;
}

#[tokio::test]
async fn test_stream_outlives_request_timeout() {
    let config = DaemonConfig {
        request_timeout: Duration::from_millis(100),
        ..test_config()
    };
    let server = TestServer::spawn(config, test_radio(Vec::new())).await;
    let mut client = server.subscribe().await;

    sleep(Duration::from_millis(300)).await;

    assert_eq!(server.status("POST", "/disconnect").await, 200);
    assert_eq!(
        client.expect_frame().await,
        error("Currently not connected to any device.")
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_ends_open_streams() {
    let server = TestServer::spawn(test_config(), test_radio(Vec::new())).await;
    let mut client = server.subscribe().await;

    let cancel = server.cancel_token.clone();
    cancel.cancel();

    let end = timeout(FRAME_TIMEOUT, client.next_frame())
        .await
        .expect("stream ends after shutdown");
    assert_eq!(end, None);

    server.shutdown().await;
}
