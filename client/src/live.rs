//! Networked live-sync backend: a [`StoreAdapter`] over the sync server's websocket.
//!
//! DESIGN
//! ======
//! The adapter is synchronous; the socket is not. [`LiveStore`] owns an
//! unbounded command queue feeding one background task that holds the
//! websocket. Adapter calls encode a request frame and enqueue it, so they
//! never block the view's tick. The task forwards server pushes
//! (`chunk:snapshot`, `cursor:snapshot`) to the sink registered for the
//! pushed path, which queues them on the owning view's inbox.
//!
//! ```text
//! EngineCore ──subscribe/append/set_latest──▶ cmd queue ──▶ socket task ──▶ server
//!     ▲                                                          │
//!     └──────────── inbox ◀── sink lookup ◀── chunk:snapshot ◀───┘
//! ```
//!
//! ERROR HANDLING
//! ==============
//! Connecting is the only fatal step ([`BackendInitError`]). Once the socket
//! drops, every later call fails with `Unreachable`; writes are logged by
//! their callers and subscription changes are retried by the cache. Error
//! replies from the server are logged here. Writes are fire-and-forget, but a
//! refused subscribe is matched to its request by `parent_id`: the path loses
//! its sink and is reported through [`StoreAdapter::take_refused`], so the
//! cache subscribes it again.

#[cfg(test)]
#[path = "live_test.rs"]
mod live_test;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use canvas::store::{
    BackendInitError, CURSORS_ROOT, Namespace, Snapshot, SnapshotSink, StoreAdapter, SubscriptionError, WriteError,
};
use frames::{Frame, Status};
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PathKey = (Namespace, String);
type Shared = Arc<Mutex<Routes>>;

/// Where server frames go. Shared by the adapter and the socket task.
#[derive(Default)]
struct Routes {
    sinks: HashMap<PathKey, SnapshotSink>,
    /// Subscribe requests still waiting for a reply, by request frame id.
    pending: HashMap<String, PathKey>,
    refused: Vec<PathKey>,
}

fn lock(routes: &Shared) -> MutexGuard<'_, Routes> {
    routes.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Command {
    Send(Frame),
    /// Acknowledged once every earlier command has been written to the socket.
    Flush(oneshot::Sender<()>),
}

pub struct LiveStore {
    commands: mpsc::UnboundedSender<Command>,
    routes: Shared,
    connected: Arc<AtomicBool>,
    participant: String,
}

impl LiveStore {
    /// Open a session on the sync server at `base_url` (`http(s)://` or `ws(s)://`).
    ///
    /// # Errors
    ///
    /// Returns [`BackendInitError`] when the server cannot be reached within
    /// `timeout` or does not open the session.
    pub async fn connect(base_url: &str, participant: &str, timeout: Duration) -> Result<Self, BackendInitError> {
        let url = ws_url(base_url, participant)?;
        let after_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let timed_out = || BackendInitError::Timeout { url: url.clone(), after_ms };

        let (mut socket, _) = tokio::time::timeout(timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| timed_out())?
            .map_err(|e| BackendInitError::Connect { url: url.clone(), reason: e.to_string() })?;

        let welcome = tokio::time::timeout(timeout, next_frame(&mut socket))
            .await
            .map_err(|_| timed_out())??;
        if welcome.syscall != "session:connected" {
            return Err(BackendInitError::Handshake(format!("expected session:connected, got {}", welcome.syscall)));
        }
        let participant = welcome.str_field("participant").unwrap_or(participant).to_owned();
        info!(%url, %participant, "live store connected");

        let (commands, rx) = mpsc::unbounded_channel();
        let routes = Shared::default();
        let connected = Arc::new(AtomicBool::new(true));
        tokio::spawn(run_socket(socket, rx, Arc::clone(&routes), Arc::clone(&connected)));

        Ok(Self { commands, routes, connected, participant })
    }

    /// Participant id the server assigned to this session.
    #[must_use]
    pub fn participant(&self) -> &str {
        &self.participant
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Wait until every request issued so far has been handed to the socket.
    /// Returns `false` if the connection is gone.
    pub async fn flush(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Flush(tx)).is_err() {
            return false;
        }
        rx.await.is_ok()
    }

    fn routes(&self) -> MutexGuard<'_, Routes> {
        lock(&self.routes)
    }

    fn send(&self, syscall: &str, data: Value) -> Result<(), String> {
        self.send_frame(Frame::request(syscall, data))
    }

    fn send_frame(&self, frame: Frame) -> Result<(), String> {
        if !self.is_connected() {
            return Err("connection closed".into());
        }
        self.commands
            .send(Command::Send(frame))
            .map_err(|_| "connection closed".to_owned())
    }
}

impl StoreAdapter for LiveStore {
    fn subscribe(&self, namespace: Namespace, key: &str, sink: SnapshotSink) -> Result<(), SubscriptionError> {
        let path = (namespace, path_key(namespace, key));
        let request = match namespace {
            Namespace::Cursors => Frame::request("cursor:subscribe", json!({})),
            _ => Frame::request("chunk:subscribe", json!({ "namespace": namespace.as_str(), "key": key })),
        };
        let id = request.id.clone();
        {
            let mut routes = self.routes();
            routes.sinks.insert(path.clone(), sink);
            routes.pending.insert(id.clone(), path.clone());
        }
        self.send_frame(request).map_err(|reason| {
            let mut routes = self.routes();
            routes.sinks.remove(&path);
            routes.pending.remove(&id);
            SubscriptionError::Unreachable(reason)
        })
    }

    fn unsubscribe(&self, namespace: Namespace, key: &str) -> Result<(), SubscriptionError> {
        if self.routes().sinks.remove(&(namespace, path_key(namespace, key))).is_none() {
            return Ok(());
        }
        match namespace {
            Namespace::Cursors => self.send("cursor:unsubscribe", json!({})),
            _ => self.send("chunk:unsubscribe", json!({ "namespace": namespace.as_str(), "key": key })),
        }
        .map_err(SubscriptionError::Unreachable)
    }

    fn append(&self, namespace: Namespace, key: &str, record: Value) -> Result<(), WriteError> {
        if !namespace.is_chunked() {
            return Err(WriteError::Unsupported { namespace, op: "append" });
        }
        self.send("chunk:append", json!({ "namespace": namespace.as_str(), "key": key, "record": record }))
            .map_err(WriteError::Unreachable)
    }

    /// The server keys cursors by the session's participant; `key` is not sent.
    fn set_latest(&self, namespace: Namespace, _key: &str, record: Value) -> Result<(), WriteError> {
        if namespace.is_chunked() {
            return Err(WriteError::Unsupported { namespace, op: "set_latest" });
        }
        self.send("cursor:set", json!({ "record": record }))
            .map_err(WriteError::Unreachable)
    }

    fn take_refused(&self) -> Vec<(Namespace, String)> {
        std::mem::take(&mut self.routes().refused)
    }
}

fn path_key(namespace: Namespace, key: &str) -> String {
    if namespace.is_chunked() { key.to_owned() } else { CURSORS_ROOT.to_owned() }
}

// =============================================================================
// SOCKET TASK
// =============================================================================

async fn run_socket(
    mut socket: Socket,
    mut commands: mpsc::UnboundedReceiver<Command>,
    routes: Shared,
    connected: Arc<AtomicBool>,
) {
    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(Command::Send(frame)) => {
                        if let Err(e) = socket.send(Message::Binary(frames::encode_frame(&frame).into())).await {
                            warn!(error = %e, syscall = %frame.syscall, "live store: send failed");
                            break;
                        }
                    }
                    Some(Command::Flush(ack)) => {
                        if ack.send(()).is_err() {
                            debug!("live store: flush waiter went away");
                        }
                    }
                    None => {
                        if let Err(e) = socket.close(None).await {
                            debug!(error = %e, "live store: close failed");
                        }
                        break;
                    }
                }
            }
            msg = socket.next() => {
                match msg {
                    Some(Ok(Message::Binary(bytes))) => match frames::decode_frame(&bytes) {
                        Ok(frame) => route(&routes, frame),
                        Err(e) => warn!(error = %e, "live store: undecodable frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "live store: socket error");
                        break;
                    }
                }
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
    warn!("live store: connection lost");
}

/// Deliver a server push to the sink of its path, or settle the request a
/// reply answers.
fn route(routes: &Shared, frame: Frame) {
    match frame.syscall.as_str() {
        "chunk:snapshot" | "cursor:snapshot" => {}
        "gateway:error" => {
            warn!(message = frame.error_message(), "live store: server refused a frame");
            return;
        }
        _ => {
            settle(routes, &frame);
            return;
        }
    }

    let Some(namespace) = frame.str_field("namespace").and_then(|ns| ns.parse::<Namespace>().ok()) else {
        warn!(syscall = %frame.syscall, "live store: snapshot without a known namespace");
        return;
    };
    let key = path_key(namespace, frame.str_field("key").unwrap_or_default());
    let value = frame.data.get("value").cloned().unwrap_or(Value::Null);

    let mut routes = lock(routes);
    let path = (namespace, key);
    let Some(sink) = routes.sinks.get(&path) else {
        debug!(%namespace, key = %path.1, "live store: snapshot for unsubscribed path");
        return;
    };
    let snapshot = Snapshot { namespace, key: path.1.clone(), value };
    if sink.send(snapshot).is_err() {
        routes.sinks.remove(&path);
    }
}

/// Close out the request `reply` answers. A refused subscribe drops its
/// path's sink and queues the path for [`StoreAdapter::take_refused`].
fn settle(routes: &Shared, reply: &Frame) {
    let mut routes = lock(routes);
    let subscribed = reply.parent_id.as_ref().and_then(|id| routes.pending.remove(id));
    if reply.status != Status::Error {
        debug!(syscall = %reply.syscall, status = ?reply.status, "live store: reply");
        return;
    }
    let code = reply.str_field(frames::FRAME_CODE).unwrap_or("-");
    warn!(syscall = %reply.syscall, code, message = reply.error_message(), "live store: request failed");

    let Some(path) = subscribed else { return };
    if routes.sinks.remove(&path).is_some() {
        warn!(namespace = %path.0, key = %path.1, "live store: subscription refused");
        routes.refused.push(path);
    }
}

/// Read frames until a binary one arrives.
async fn next_frame(socket: &mut Socket) -> Result<Frame, BackendInitError> {
    loop {
        match socket.next().await {
            Some(Ok(Message::Binary(bytes))) => {
                return frames::decode_frame(&bytes).map_err(|e| BackendInitError::Handshake(e.to_string()));
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(BackendInitError::Handshake("socket closed before session opened".into()));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(BackendInitError::Handshake(e.to_string())),
        }
    }
}

// =============================================================================
// URLS
// =============================================================================

/// Websocket endpoint for `base_url`, carrying the participant id.
///
/// # Errors
///
/// Returns [`BackendInitError::Connect`] for an unparsable URL or a scheme
/// other than http(s) or ws(s).
pub fn ws_url(base_url: &str, participant: &str) -> Result<String, BackendInitError> {
    let invalid = |reason: String| BackendInitError::Connect { url: base_url.to_owned(), reason };
    let mut url = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(invalid("expected an http(s):// or ws(s):// URL".into())),
    };
    url.set_scheme(scheme).map_err(|()| invalid(format!("cannot switch to {scheme}")))?;
    let path = format!("{}/api/ws", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.query_pairs_mut().clear().append_pair("participant", participant);
    Ok(url.into())
}
