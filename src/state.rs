//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the optional database pool, the live chunk map and the cursor board.
//! A chunk is in memory while anyone subscribes to it or while it has records
//! not yet flushed. Without a pool, memory is the only storage and chunks are
//! never evicted.

#[cfg(test)]
#[path = "state_test.rs"]
mod state_test;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use canvas::chunk::ChunkKey;
use canvas::store::Namespace;
use frames::Frame;
use serde_json::{Map, Value};
use sqlx::PgPool;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::config::ServerConfig;

// =============================================================================
// CHUNK STATE
// =============================================================================

/// One chunked store path: `chunks/<namespace>/<cx>_<cy>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkPath {
    pub namespace: Namespace,
    pub key: ChunkKey,
}

impl fmt::Display for ChunkPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.key)
    }
}

/// Live state for one chunk path.
#[derive(Default)]
pub struct ChunkState {
    /// Record id -> record.
    pub records: Map<String, Value>,
    /// Subscribed connections: `client_id` -> sender for outgoing frames.
    pub subscribers: HashMap<Uuid, mpsc::Sender<Frame>>,
    /// Record ids appended since the last successful flush.
    pub dirty: HashSet<String>,
}

impl ChunkState {
    #[must_use]
    pub fn hydrated(records: Map<String, Value>) -> Self {
        Self { records, ..Self::default() }
    }

    /// Full value as pushed to subscribers: `Null` when empty.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        collection_value(&self.records)
    }

    /// Safe to drop from memory.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.subscribers.is_empty() && self.dirty.is_empty()
    }
}

// =============================================================================
// CURSOR BOARD
// =============================================================================

/// Latest cursor per participant plus everyone watching them.
#[derive(Default)]
pub struct CursorBoard {
    pub latest: Map<String, Value>,
    pub subscribers: HashMap<Uuid, mpsc::Sender<Frame>>,
}

impl CursorBoard {
    #[must_use]
    pub fn snapshot(&self) -> Value {
        collection_value(&self.latest)
    }
}

fn collection_value(map: &Map<String, Value>) -> Value {
    if map.is_empty() { Value::Null } else { Value::Object(map.clone()) }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state. Clone is required by Axum; all inner fields are
/// Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub pool: Option<PgPool>,
    pub chunks: Arc<RwLock<HashMap<ChunkPath, ChunkState>>>,
    pub cursors: Arc<RwLock<CursorBoard>>,
    pub ws_channel_capacity: usize,
}

impl AppState {
    #[must_use]
    pub fn new(pool: Option<PgPool>, config: &ServerConfig) -> Self {
        Self {
            pool,
            chunks: Arc::new(RwLock::new(HashMap::new())),
            cursors: Arc::new(RwLock::new(CursorBoard::default())),
            ws_channel_capacity: config.ws_channel_capacity,
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
