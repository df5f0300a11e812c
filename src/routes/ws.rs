//! WebSocket handler: binary frame relay for chunk and cursor sync.
//!
//! DESIGN
//! ======
//! On upgrade, generates a client ID and enters a `select!` loop:
//! - Incoming client frames → decode + dispatch by syscall prefix
//! - Pushed snapshots from the services → forward to client
//!
//! Handlers validate, call a service and return an `Outcome`; the dispatch
//! layer turns that into the reply frame. Later snapshot pushes never pass
//! through here: services queue them on the per-connection channel directly.
//! The first snapshot of a subscription is the exception. It comes back from
//! the service and is sent just ahead of the done reply, after everything
//! already queued, so a full queue cannot swallow it.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `client_id` and `participant`
//! 2. `chunk:subscribe` / `cursor:subscribe` → snapshot pushes begin
//! 3. `chunk:append` / `cursor:set` → every subscriber gets the new value
//! 4. Close → every subscription this connection holds is released

#[cfg(test)]
#[path = "ws_test.rs"]
mod ws_test;

use std::collections::{HashMap, HashSet};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use frames::{Frame, Status};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::services::{chunk, cursor};
use crate::state::{AppState, ChunkPath};

const PARTICIPANT_MAX_LEN: usize = 64;

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. Handlers never send frames directly.
#[derive(Debug)]
enum Outcome {
    /// Send done+data to sender.
    Reply(Value),
    /// Send empty done to sender.
    Done,
    /// Send the first snapshot of a new subscription, then empty done.
    Subscribed(Frame),
    /// No reply. Used for cursor updates.
    Silent,
}

// =============================================================================
// SESSION
// =============================================================================

/// Per-connection state: identity, outbound queue and held subscriptions.
struct Session {
    client_id: Uuid,
    participant: String,
    tx: mpsc::Sender<Frame>,
    chunks: HashSet<ChunkPath>,
    cursors: bool,
}

impl Session {
    fn new(participant: String, tx: mpsc::Sender<Frame>) -> Self {
        Self { client_id: Uuid::new_v4(), participant, tx, chunks: HashSet::new(), cursors: false }
    }

    /// Drop every subscription this connection holds.
    async fn release(&mut self, state: &AppState) {
        for path in self.chunks.drain() {
            chunk::unsubscribe(state, path, self.client_id).await;
        }
        if std::mem::take(&mut self.cursors) {
            cursor::unsubscribe(state, self.client_id).await;
        }
    }
}

// =============================================================================
// UPGRADE
// =============================================================================

/// `GET /api/ws?participant=<id>`. Without a usable participant id, one is generated.
pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let participant = participant_from(params.get("participant").map(String::as_str));
    ws.on_upgrade(move |socket| run_ws(socket, state, participant))
}

fn participant_from(raw: Option<&str>) -> String {
    raw.map(str::trim)
        .filter(|p| !p.is_empty() && p.len() <= PARTICIPANT_MAX_LEN)
        .map_or_else(|| Uuid::new_v4().to_string(), ToOwned::to_owned)
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, participant: String) {
    // Per-connection channel for snapshot pushes from the services.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(state.ws_channel_capacity);
    let mut session = Session::new(participant, client_tx);
    let client_id = session.client_id;

    let welcome = Frame::push(
        "session:connected",
        json!({ "client_id": client_id.to_string(), "participant": session.participant }),
    );
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }

    info!(%client_id, participant = %session.participant, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Binary(bytes) => {
                        if drain_pushes(&mut socket, &mut client_rx).await.is_err() {
                            break;
                        }
                        if dispatch_frame(&state, &mut socket, &mut session, &bytes).await.is_err() {
                            break;
                        }
                    }
                    Message::Text(_) => {
                        let err = Frame::push("gateway:error", json!({ "message": "binary frames only" }));
                        if send_frame(&mut socket, &err).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    session.release(&state).await;
    info!(%client_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Send every push already queued, so a reply never overtakes an older push.
async fn drain_pushes(socket: &mut WebSocket, client_rx: &mut mpsc::Receiver<Frame>) -> Result<(), ()> {
    while let Ok(frame) = client_rx.try_recv() {
        send_frame(socket, &frame).await?;
    }
    Ok(())
}

async fn dispatch_frame(state: &AppState, socket: &mut WebSocket, session: &mut Session, bytes: &[u8]) -> Result<(), ()> {
    for frame in process_inbound_bytes(state, session, bytes).await {
        send_frame(socket, &frame).await?;
    }
    Ok(())
}

/// Decode and process one inbound binary frame; returns frames for the sender.
///
/// Kept apart from the socket so tests can drive dispatch directly.
async fn process_inbound_bytes(state: &AppState, session: &mut Session, bytes: &[u8]) -> Vec<Frame> {
    let mut req = match frames::decode_frame(bytes) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(client_id = %session.client_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::push("gateway:error", json!({ "message": format!("invalid frame: {e}") }));
            return vec![err];
        }
    };
    if req.status != Status::Request {
        debug!(client_id = %session.client_id, syscall = %req.syscall, status = ?req.status, "ws: ignoring non-request frame");
        return Vec::new();
    }

    // Stamp the connection's participant as `from`.
    req.from = Some(session.participant.clone());

    let is_cursor = req.prefix() == "cursor";
    if !is_cursor {
        info!(client_id = %session.client_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");
    }

    let result = match req.prefix() {
        "chunk" => handle_chunk(state, session, &req).await,
        "cursor" => handle_cursor(state, session, &req).await,
        prefix => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Ok(Outcome::Subscribed(snapshot)) => vec![snapshot, req.done()],
        Ok(Outcome::Silent) => Vec::new(),
        Err(err_frame) => vec![err_frame],
    }
}

// =============================================================================
// CHUNK HANDLERS
// =============================================================================

async fn handle_chunk(state: &AppState, session: &mut Session, req: &Frame) -> Result<Outcome, Frame> {
    let (Some(namespace), Some(key)) = (req.str_field("namespace"), req.str_field("key")) else {
        return Err(req.error("namespace and key required"));
    };
    let path = chunk::parse_path(namespace, key).map_err(|e| req.error_from(&e))?;

    match req.op() {
        "subscribe" => {
            let snapshot = chunk::subscribe(state, path, session.client_id, &session.tx)
                .await
                .map_err(|e| req.error_from(&e))?;
            session.chunks.insert(path);
            Ok(Outcome::Subscribed(snapshot))
        }
        "unsubscribe" => {
            chunk::unsubscribe(state, path, session.client_id).await;
            session.chunks.remove(&path);
            Ok(Outcome::Done)
        }
        "append" => {
            let Some(record) = req.data.get("record").cloned() else {
                return Err(req.error("record required"));
            };
            let stored = chunk::append(state, path, record, Some(&session.participant))
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(json!({ "id": stored.get("id").cloned().unwrap_or(Value::Null), "record": stored })))
        }
        op => Err(req.error(format!("unknown chunk op: {op}"))),
    }
}

// =============================================================================
// CURSOR HANDLERS
// =============================================================================

async fn handle_cursor(state: &AppState, session: &mut Session, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "subscribe" => {
            let snapshot = cursor::subscribe(state, session.client_id, &session.tx).await;
            session.cursors = true;
            Ok(Outcome::Subscribed(snapshot))
        }
        "unsubscribe" => {
            cursor::unsubscribe(state, session.client_id).await;
            session.cursors = false;
            Ok(Outcome::Done)
        }
        "set" => {
            let Some(record) = req.data.get("record").cloned() else {
                return Err(req.error("record required"));
            };
            cursor::set(state, &session.participant, record)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Silent)
        }
        op => Err(req.error(format!("unknown cursor op: {op}"))),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    if !frame.syscall.starts_with("cursor:") {
        if frame.status == Status::Error {
            let code = frame.str_field(frames::FRAME_CODE).unwrap_or("-");
            warn!(id = %frame.id, syscall = %frame.syscall, code, message = frame.error_message(), "ws: send frame status=Error");
        } else if frame.parent_id.is_some() {
            info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
        } else {
            debug!(id = %frame.id, syscall = %frame.syscall, "ws: push frame");
        }
    }
    socket
        .send(Message::Binary(frames::encode_frame(frame).into()))
        .await
        .map_err(|_| ())
}
