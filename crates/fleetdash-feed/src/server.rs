//! [`FleetFeedServer`] – HTTP + WebSocket server over the fleet view.
//!
//! Listens on `0.0.0.0:8765` (configurable via [`FleetFeedServer::with_port`]).
//!
//! * Regular HTTP requests → JSON snapshot of the [`FleetStateStore`].
//! * WebSocket upgrades → snapshot frame, then the [`EventBus`] stream.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use fleetdash_middleware::{EventBus, FleetStateStore};
use fleetdash_types::AgvSnapshot;
use percent_encoding::percent_decode_str;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Default TCP port for the feed.
pub const DEFAULT_PORT: u16 = 8765;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("bind error on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("I/O error with {peer}: {source}")]
    Io {
        peer: SocketAddr,
        source: std::io::Error,
    },
    #[error("WebSocket handshake from {peer}: {reason}")]
    Handshake { peer: SocketAddr, reason: String },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// FleetFeedServer
// ---------------------------------------------------------------------------

pub struct FleetFeedServer {
    store: Arc<FleetStateStore>,
    bus: Arc<EventBus>,
    port: u16,
}

impl FleetFeedServer {
    /// Create a server over `store` and `bus` on the [`DEFAULT_PORT`].
    pub fn new(store: Arc<FleetStateStore>, bus: Arc<EventBus>) -> Self {
        Self {
            store,
            bus,
            port: DEFAULT_PORT,
        }
    }

    /// Override the listening port (builder-style).  `0` picks a free port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bind the configured port.
    pub async fn bind(&self) -> Result<TcpListener, FeedError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        TcpListener::bind(addr)
            .await
            .map_err(|source| FeedError::Bind { addr, source })
    }

    /// Bind and serve until the task is cancelled.
    pub async fn run(self) -> Result<(), FeedError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound `listener`.
    pub async fn serve(self, listener: TcpListener) -> Result<(), FeedError> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "fleet feed listening");
        }

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let store = Arc::clone(&self.store);
                    let bus = Arc::clone(&self.bus);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, store, bus).await {
                            warn!(%peer, error = %e, "feed client error");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "feed accept error");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-connection handler
// ---------------------------------------------------------------------------

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    store: Arc<FleetStateStore>,
    bus: Arc<EventBus>,
) -> Result<(), FeedError> {
    // `peek` leaves the request in the socket so tungstenite's handshaker
    // still sees all of it.
    let mut buf = [0u8; 1024];
    let n = stream
        .peek(&mut buf)
        .await
        .map_err(|source| FeedError::Io { peer, source })?;

    let head = String::from_utf8_lossy(&buf[..n]);
    if is_ws_upgrade(&head) {
        handle_ws(stream, peer, store, bus).await
    } else {
        serve_http(stream, peer, &head, n, &store).await
    }
}

fn is_ws_upgrade(head: &str) -> bool {
    head.lines().any(|line| {
        let line = line.to_ascii_lowercase();
        line.starts_with("upgrade:") && line.contains("websocket")
    })
}

// ---------------------------------------------------------------------------
// Plain HTTP: JSON snapshot
// ---------------------------------------------------------------------------

/// Status line and JSON body for a request head.
fn http_response(head: &str, store: &FleetStateStore) -> Result<(&'static str, String), FeedError> {
    let mut request_line = head.lines().next().unwrap_or("").split_whitespace();
    let method = request_line.next().unwrap_or("");
    let path = request_line.next().unwrap_or("/");
    let path = path.split('?').next().unwrap_or(path).trim_end_matches('/');

    if method != "GET" {
        return Ok(("405 Method Not Allowed", r#"{"error":"method not allowed"}"#.to_string()));
    }

    match path {
        "" | "/fleet" => Ok(("200 OK", serde_json::to_string(&store.all())?)),
        _ => match path.strip_prefix("/fleet/") {
            Some(serial) if !serial.is_empty() => {
                let Ok(serial) = percent_decode_str(serial).decode_utf8() else {
                    return Ok(("400 Bad Request", r#"{"error":"serial is not valid UTF-8"}"#.to_string()));
                };
                match store.get(&serial) {
                    Some(snapshot) => Ok(("200 OK", serde_json::to_string(&snapshot)?)),
                    None => Ok(("404 Not Found", r#"{"error":"unknown vehicle"}"#.to_string())),
                }
            }
            _ => Ok(("404 Not Found", r#"{"error":"not found"}"#.to_string())),
        },
    }
}

async fn serve_http(
    mut stream: TcpStream,
    peer: SocketAddr,
    head: &str,
    peeked: usize,
    store: &FleetStateStore,
) -> Result<(), FeedError> {
    // Consume what was peeked so closing the socket does not reset it.
    let mut request = vec![0u8; peeked];
    stream
        .read_exact(&mut request)
        .await
        .map_err(|source| FeedError::Io { peer, source })?;

    let (status, body) = http_response(head, store)?;
    let response = format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        body.len()
    );
    stream
        .write_all(response.as_bytes())
        .await
        .map_err(|source| FeedError::Io { peer, source })?;
    let _ = stream.shutdown().await;
    debug!(%peer, status, "served fleet snapshot over HTTP");
    Ok(())
}

// ---------------------------------------------------------------------------
// WebSocket: snapshot + event stream
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct SnapshotFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    data: &'a [AgvSnapshot],
}

fn snapshot_frame(store: &FleetStateStore) -> Result<String, FeedError> {
    let fleet = store.all();
    Ok(serde_json::to_string(&SnapshotFrame {
        kind: "snapshot",
        data: &fleet,
    })?)
}

async fn handle_ws(
    stream: TcpStream,
    peer: SocketAddr,
    store: Arc<FleetStateStore>,
    bus: Arc<EventBus>,
) -> Result<(), FeedError> {
    let ws_stream = accept_async(stream).await.map_err(|e| FeedError::Handshake {
        peer,
        reason: e.to_string(),
    })?;

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let mut bus_rx = bus.subscribe();
    info!(%peer, "feed client connected");

    if ws_tx
        .send(Message::Text(snapshot_frame(&store)?.into()))
        .await
        .is_err()
    {
        return Ok(());
    }

    loop {
        tokio::select! {
            // ── Downstream: EventBus → client ──────────────────────────────
            event = bus_rx.recv() => {
                let Some(event) = event else { break };
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "event serialization error"),
                }
            }
            // ── Upstream: client requests ──────────────────────────────────
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if wants_snapshot(text.as_str())
                            && ws_tx
                                .send(Message::Text(snapshot_frame(&store)?.into()))
                                .await
                                .is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    info!(%peer, "feed client disconnected");
    Ok(())
}

/// `true` for `{"op":"snapshot"}`.  Anything else is ignored.
pub(crate) fn wants_snapshot(text: &str) -> bool {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|json| json.get("op").and_then(Value::as_str).map(|op| op == "snapshot"))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use fleetdash_middleware::Topic;
    use fleetdash_types::{Event, FleetEvent};
    use tokio_tungstenite::connect_async;

    fn make_store() -> Arc<FleetStateStore> {
        let store = Arc::new(FleetStateStore::new());
        store.upsert("V1", |s| {
            s.manufacturer = "Acme".to_string();
            s.battery_percent = 80.0;
        });
        store
    }

    // ── Constructor ───────────────────────────────────────────────────────────

    #[test]
    fn default_port() {
        let server = FleetFeedServer::new(make_store(), Arc::new(EventBus::default()));
        assert_eq!(server.port(), DEFAULT_PORT);
        assert_eq!(server.with_port(9999).port(), 9999);
    }

    // ── Request classification ────────────────────────────────────────────────

    #[test]
    fn detects_websocket_upgrade() {
        assert!(is_ws_upgrade("GET / HTTP/1.1\r\nUpgrade: websocket\r\n\r\n"));
        assert!(!is_ws_upgrade("GET / HTTP/1.1\r\nHost: x\r\n\r\n"));
    }

    #[test]
    fn http_routes() {
        let store = make_store();

        let (status, body) = http_response("GET / HTTP/1.1\r\n", &store).unwrap();
        assert_eq!(status, "200 OK");
        let fleet: Vec<Value> = serde_json::from_str(&body).unwrap();
        assert_eq!(fleet[0]["serial"], "V1");
        assert_eq!(fleet[0]["batteryPercent"], 80.0);

        let (status, body) = http_response("GET /fleet/V1 HTTP/1.1\r\n", &store).unwrap();
        assert_eq!(status, "200 OK");
        assert!(body.contains("\"manufacturer\":\"Acme\""));

        let (status, _) = http_response("GET /fleet/ghost HTTP/1.1\r\n", &store).unwrap();
        assert_eq!(status, "404 Not Found");

        let (status, _) = http_response("GET /elsewhere HTTP/1.1\r\n", &store).unwrap();
        assert_eq!(status, "404 Not Found");

        let (status, _) = http_response("POST /fleet HTTP/1.1\r\n", &store).unwrap();
        assert_eq!(status, "405 Method Not Allowed");
    }

    #[test]
    fn serial_in_path_is_percent_decoded() {
        let store = make_store();
        store.upsert("AGV 7/B", |s| s.manufacturer = "Acme".to_string());

        let (status, body) = http_response("GET /fleet/AGV%207%2FB HTTP/1.1\r\n", &store).unwrap();
        assert_eq!(status, "200 OK");
        assert!(body.contains("\"serial\":\"AGV 7/B\""));

        let (status, _) = http_response("GET /fleet/%FF HTTP/1.1\r\n", &store).unwrap();
        assert_eq!(status, "400 Bad Request");
    }

    #[test]
    fn snapshot_request_parsing() {
        assert!(wants_snapshot(r#"{"op":"snapshot"}"#));
        assert!(!wants_snapshot(r#"{"op":"subscribe"}"#));
        assert!(!wants_snapshot("not json at all"));
    }

    #[test]
    fn snapshot_frame_shape() {
        let frame: Value = serde_json::from_str(&snapshot_frame(&make_store()).unwrap()).unwrap();
        assert_eq!(frame["type"], "snapshot");
        assert_eq!(frame["data"][0]["serial"], "V1");
    }

    // ── Live server ───────────────────────────────────────────────────────────

    async fn start(store: Arc<FleetStateStore>, bus: Arc<EventBus>) -> SocketAddr {
        let server = FleetFeedServer::new(store, bus).with_port(0);
        let listener = server.bind().await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(server.serve(listener));
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn http_client_gets_snapshot() {
        let addr = start(make_store(), Arc::new(EventBus::default())).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /fleet HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("application/json"));
        assert!(response.contains("\"serial\":\"V1\""));
    }

    #[tokio::test]
    async fn websocket_client_gets_snapshot_then_events() {
        let store = make_store();
        let bus = Arc::new(EventBus::default());
        let addr = start(Arc::clone(&store), Arc::clone(&bus)).await;

        let (mut ws, _) = connect_async(format!("ws://{addr}/")).await.unwrap();

        let first = ws.next().await.unwrap().unwrap();
        let frame: Value = serde_json::from_str(first.to_text().unwrap()).unwrap();
        assert_eq!(frame["type"], "snapshot");

        bus.publish(Topic::Fleet, Event::new("test", FleetEvent::FleetCleared));
        let second = ws.next().await.unwrap().unwrap();
        let event: Value = serde_json::from_str(second.to_text().unwrap()).unwrap();
        assert_eq!(event["payload"]["type"], "fleetCleared");

        store.upsert("V2", |_| {});
        ws.send(Message::Text(r#"{"op":"snapshot"}"#.into())).await.unwrap();
        let third = ws.next().await.unwrap().unwrap();
        let frame: Value = serde_json::from_str(third.to_text().unwrap()).unwrap();
        assert_eq!(frame["data"].as_array().unwrap().len(), 2);
    }
}
