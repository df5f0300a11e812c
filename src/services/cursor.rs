//! Cursor service: latest-value-wins pointer positions.
//!
//! DESIGN
//! ======
//! Cursors are one global, unchunked collection keyed by participant id. Every
//! `set` overwrites that participant's entry and pushes the whole collection
//! to every cursor subscriber, the sender included. Entries are never
//! deleted; readers drop stale ones by `lastUpdate`. Nothing here touches the
//! database, and nothing here logs per message.

#[cfg(test)]
#[path = "cursor_test.rs"]
mod cursor_test;

use canvas::doc::Cursor;
use canvas::store::{CURSORS_ROOT, Namespace};
use frames::{ErrorCode, Frame};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    #[error("invalid cursor: {0}")]
    Invalid(String),
}

impl ErrorCode for CursorError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Invalid(_) => "E_INVALID_CURSOR",
        }
    }
}

/// Register `client_id` for cursor pushes. Returns the current collection as
/// the first `cursor:snapshot` frame for the caller to deliver.
pub async fn subscribe(state: &AppState, client_id: Uuid, tx: &mpsc::Sender<Frame>) -> Frame {
    let mut board = state.cursors.write().await;
    board.subscribers.insert(client_id, tx.clone());
    debug!(%client_id, subscribers = board.subscribers.len(), "cursor: subscribed");
    snapshot_frame(board.snapshot())
}

/// Idempotent.
pub async fn unsubscribe(state: &AppState, client_id: Uuid) {
    let mut board = state.cursors.write().await;
    if board.subscribers.remove(&client_id).is_some() {
        debug!(%client_id, subscribers = board.subscribers.len(), "cursor: unsubscribed");
    }
}

/// Overwrite `participant`'s cursor and push the collection. The server's
/// clock stamps `lastUpdate`, so staleness is judged on one timeline.
///
/// # Errors
///
/// Returns [`CursorError::Invalid`] if `record` is not a cursor.
pub async fn set(state: &AppState, participant: &str, record: Value) -> Result<usize, CursorError> {
    let mut cursor: Cursor = serde_json::from_value(with_defaults(record, participant))
        .map_err(|e| CursorError::Invalid(e.to_string()))?;
    cursor.id = participant.to_owned();
    cursor.last_update = frames::now_ms();
    let value = serde_json::to_value(&cursor).map_err(|e| CursorError::Invalid(e.to_string()))?;

    let mut board = state.cursors.write().await;
    board.latest.insert(cursor.id, value);

    let frame = snapshot_frame(board.snapshot());
    let dropped = board
        .subscribers
        .values()
        .filter(|tx| tx.try_send(frame.clone()).is_err())
        .count();
    Ok(dropped)
}

/// Fill the fields the server overwrites anyway, so clients may omit them.
fn with_defaults(mut record: Value, participant: &str) -> Value {
    if let Some(obj) = record.as_object_mut() {
        obj.entry("id").or_insert_with(|| json!(participant));
        obj.entry("lastUpdate").or_insert_with(|| json!(0));
    }
    record
}

#[must_use]
pub fn snapshot_frame(value: Value) -> Frame {
    Frame::push(
        "cursor:snapshot",
        json!({
            "namespace": Namespace::Cursors.as_str(),
            "key": CURSORS_ROOT,
            "value": value,
        }),
    )
}
