//! Chunk service: subscribe, append, snapshot fan-out and hydration.
//!
//! DESIGN
//! ======
//! Each `chunks/<namespace>/<cx>_<cy>` path lives in [`AppState::chunks`]
//! while it has subscribers or unflushed records. The first touch hydrates it
//! from Postgres (outside the lock); every append pushes the full collection to
//! every subscriber as a `chunk:snapshot` frame. A new subscriber's first
//! snapshot is taken under the same lock that registers it and handed back to
//! the caller, which sends it ahead of anything queued later, so it can never
//! observe an older value after a newer one.
//!
//! The server is authoritative for record identity: it assigns `id` and
//! `timestamp`, stamps the author on notes, and rejects records whose position
//! belongs to a different chunk.
//!
//! ERROR HANDLING
//! ==============
//! The first snapshot is never queued, so it cannot be lost. After that, a
//! full or closed subscriber queue drops that one push with a warning; the
//! next append resends the whole collection. Database failures surface to the
//! requesting client as retryable `E_DATABASE` errors.

#[cfg(test)]
#[path = "chunk_test.rs"]
mod chunk_test;

use std::collections::HashMap;

use canvas::camera::Point;
use canvas::chunk::{ChunkKey, ChunkKeyParseError, chunk_key_of};
use canvas::consts::NOTE_TEXT_MAX;
use canvas::doc::{Note, Stamp};
use canvas::store::{Namespace, UnknownNamespace};
use frames::{ErrorCode, Frame};
use serde_json::{Map, Value, json};
use sqlx::PgPool;
use tokio::sync::{RwLockWriteGuard, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state::{AppState, ChunkPath, ChunkState};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error(transparent)]
    UnknownNamespace(#[from] UnknownNamespace),
    #[error("namespace {0} is not chunked")]
    NotChunked(Namespace),
    #[error(transparent)]
    InvalidKey(#[from] ChunkKeyParseError),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("record at chunk {home} cannot be written to chunk {key}")]
    WrongChunk { home: ChunkKey, key: ChunkKey },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for ChunkError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownNamespace(_) => "E_UNKNOWN_NAMESPACE",
            Self::NotChunked(_) => "E_NOT_CHUNKED",
            Self::InvalidKey(_) => "E_INVALID_KEY",
            Self::InvalidRecord(_) => "E_INVALID_RECORD",
            Self::WrongChunk { .. } => "E_WRONG_CHUNK",
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

/// One unflushed record, cloned out of the lock for writing.
#[derive(Debug, Clone)]
pub struct DirtyRecord {
    pub path: ChunkPath,
    pub id: String,
    pub record: Value,
}

type ChunkMap = HashMap<ChunkPath, ChunkState>;

// =============================================================================
// PATHS
// =============================================================================

/// Parse a wire `namespace` + `key` pair into a chunk path.
///
/// # Errors
///
/// Returns an error for an unknown namespace, the unchunked `cursors`
/// namespace, or a key that is not `<cx>_<cy>`.
pub fn parse_path(namespace: &str, key: &str) -> Result<ChunkPath, ChunkError> {
    let namespace: Namespace = namespace.parse()?;
    if !namespace.is_chunked() {
        return Err(ChunkError::NotChunked(namespace));
    }
    Ok(ChunkPath { namespace, key: key.parse()? })
}

// =============================================================================
// SUBSCRIBE / UNSUBSCRIBE
// =============================================================================

/// Register `client_id` on a chunk. Later changes are queued to `tx`; the
/// current value is returned as the first `chunk:snapshot` frame for the
/// caller to deliver.
///
/// # Errors
///
/// Returns a database error if hydration fails.
pub async fn subscribe(
    state: &AppState,
    path: ChunkPath,
    client_id: Uuid,
    tx: &mpsc::Sender<Frame>,
) -> Result<Frame, ChunkError> {
    let mut chunks = lock_loaded(state, path).await?;
    let chunk = chunks.entry(path).or_default();
    chunk.subscribers.insert(client_id, tx.clone());
    debug!(%client_id, %path, subscribers = chunk.subscribers.len(), "chunk: subscribed");
    Ok(snapshot_frame(path, chunk.snapshot()))
}

/// Drop `client_id` from a chunk. Idempotent. An unwatched chunk is evicted
/// once nothing would be lost: when it is clean and a database backs it, or
/// when it is empty on a memory-only server.
pub async fn unsubscribe(state: &AppState, path: ChunkPath, client_id: Uuid) {
    let mut chunks = state.chunks.write().await;
    let Some(chunk) = chunks.get_mut(&path) else {
        return;
    };
    if chunk.subscribers.remove(&client_id).is_none() {
        return;
    }
    debug!(%client_id, %path, remaining = chunk.subscribers.len(), "chunk: unsubscribed");

    if chunk.is_idle() && (state.pool.is_some() || chunk.records.is_empty()) {
        chunks.remove(&path);
        debug!(%path, "chunk: evicted from memory");
    }
}

// =============================================================================
// APPEND
// =============================================================================

/// Validate and store one record, then push the new collection to every
/// subscriber. Returns the record as stored.
///
/// # Errors
///
/// Returns [`ChunkError::InvalidRecord`] or [`ChunkError::WrongChunk`] for a
/// bad record, and a database error if hydration fails.
pub async fn append(
    state: &AppState,
    path: ChunkPath,
    record: Value,
    author: Option<&str>,
) -> Result<Value, ChunkError> {
    let record = normalize(path, record, author, frames::now_ms())?;
    let id = record_id(&record);

    let mut chunks = lock_loaded(state, path).await?;
    let chunk = chunks.entry(path).or_default();
    chunk.records.insert(id.clone(), record.clone());
    if state.pool.is_some() {
        chunk.dirty.insert(id.clone());
    }

    let frame = snapshot_frame(path, chunk.snapshot());
    for (client_id, tx) in &chunk.subscribers {
        push(tx, *client_id, frame.clone());
    }
    info!(%path, %id, records = chunk.records.len(), subscribers = chunk.subscribers.len(), "chunk: record appended");
    Ok(record)
}

/// Assign identity, check the shape against the record type, and confirm the
/// record's position belongs to `path`.
fn normalize(path: ChunkPath, mut record: Value, author: Option<&str>, now_ms: i64) -> Result<Value, ChunkError> {
    let Some(obj) = record.as_object_mut() else {
        return Err(ChunkError::InvalidRecord("record must be a JSON object".into()));
    };
    obj.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
    obj.insert("timestamp".into(), json!(now_ms));

    let invalid = |e: serde_json::Error| ChunkError::InvalidRecord(e.to_string());
    let (at, canonical) = match path.namespace {
        Namespace::Notes => {
            if let Some(author) = author {
                obj.insert("authorId".into(), Value::String(author.to_owned()));
            }
            let mut note: Note = serde_json::from_value(record).map_err(invalid)?;
            note.text = note.text.trim().to_owned();
            let len = note.text.chars().count();
            if len == 0 {
                return Err(ChunkError::InvalidRecord("note text is empty".into()));
            }
            if len > NOTE_TEXT_MAX {
                return Err(ChunkError::InvalidRecord(format!("note text is {len} characters, max {NOTE_TEXT_MAX}")));
            }
            (Point::new(note.x, note.y), serde_json::to_value(&note).map_err(invalid)?)
        }
        Namespace::Stamps => {
            let stamp: Stamp = serde_json::from_value(record).map_err(invalid)?;
            if stamp.emoji.is_empty() {
                return Err(ChunkError::InvalidRecord("stamp emoji is empty".into()));
            }
            (Point::new(stamp.x, stamp.y), serde_json::to_value(&stamp).map_err(invalid)?)
        }
        Namespace::Cursors => return Err(ChunkError::NotChunked(path.namespace)),
    };

    let home = chunk_key_of(at);
    if home != path.key {
        return Err(ChunkError::WrongChunk { home, key: path.key });
    }
    Ok(canonical)
}

fn record_id(record: &Value) -> String {
    record.get("id").and_then(Value::as_str).unwrap_or_default().to_owned()
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Current value of a chunk without subscribing to it.
///
/// # Errors
///
/// Returns a database error if the chunk is not in memory and loading fails.
pub async fn snapshot(state: &AppState, path: ChunkPath) -> Result<Value, ChunkError> {
    if let Some(chunk) = state.chunks.read().await.get(&path) {
        return Ok(chunk.snapshot());
    }
    let Some(pool) = &state.pool else {
        return Ok(Value::Null);
    };
    Ok(ChunkState::hydrated(hydrate_chunk(pool, path).await?).snapshot())
}

/// Push frame carrying the full value of one chunk.
#[must_use]
pub fn snapshot_frame(path: ChunkPath, value: Value) -> Frame {
    Frame::push(
        "chunk:snapshot",
        json!({
            "namespace": path.namespace.as_str(),
            "key": path.key.to_string(),
            "value": value,
        }),
    )
}

// =============================================================================
// HELPERS
// =============================================================================

/// Write-lock the chunk map with `path` present, hydrating it first if needed.
///
/// Hydration runs outside the lock. If the chunk is evicted between the load
/// and the lock, the load is repeated.
async fn lock_loaded(state: &AppState, path: ChunkPath) -> Result<RwLockWriteGuard<'_, ChunkMap>, ChunkError> {
    loop {
        let present = state.chunks.read().await.contains_key(&path);
        let hydrated = match &state.pool {
            Some(pool) if !present => Some(hydrate_chunk(pool, path).await?),
            _ => None,
        };

        let mut chunks = state.chunks.write().await;
        if !chunks.contains_key(&path) {
            match hydrated {
                Some(records) => {
                    info!(%path, count = records.len(), "chunk: hydrated from database");
                    chunks.insert(path, ChunkState::hydrated(records));
                }
                None if state.pool.is_some() => continue,
                None => {
                    chunks.insert(path, ChunkState::default());
                }
            }
        }
        return Ok(chunks);
    }
}

/// Best-effort queue of one frame to one client.
fn push(tx: &mpsc::Sender<Frame>, client_id: Uuid, frame: Frame) {
    if let Err(e) = tx.try_send(frame) {
        warn!(%client_id, error = %e, "chunk: snapshot push dropped");
    }
}

async fn hydrate_chunk(pool: &PgPool, path: ChunkPath) -> Result<Map<String, Value>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (String, Value)>(
        "SELECT record_id, record FROM chunk_records WHERE namespace = $1 AND chunk_key = $2",
    )
    .bind(path.namespace.as_str())
    .bind(path.key.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().collect())
}

/// Upsert records in one transaction. Records are immutable, so a repeated
/// write of the same id is harmless.
///
/// # Errors
///
/// Returns a database error if any write or the commit fails.
pub async fn flush_records(pool: &PgPool, records: &[DirtyRecord]) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for dirty in records {
        sqlx::query(
            "INSERT INTO chunk_records (namespace, chunk_key, record_id, record) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (namespace, chunk_key, record_id) DO NOTHING",
        )
        .bind(dirty.path.namespace.as_str())
        .bind(dirty.path.key.to_string())
        .bind(&dirty.id)
        .bind(&dirty.record)
        .execute(tx.as_mut())
        .await?;
    }
    tx.commit().await?;
    Ok(())
}
