//! Persistence service: debounced background flush of appended records.
//!
//! DESIGN
//! ======
//! Appends only mark record ids dirty; a background task wakes every
//! `FLUSH_INTERVAL_MS`, clones the dirty records out under the lock, writes
//! them in one transaction outside it, then clears the flushed ids. Chunks
//! that end a cycle clean and unwatched are evicted.
//!
//! ERROR HANDLING
//! ==============
//! Dirty flags are cleared only after a successful commit. A failed flush
//! keeps every flag for the next cycle: repeated inserts are harmless,
//! silent loss is not.

#[cfg(test)]
#[path = "persistence_test.rs"]
mod persistence_test;

use std::time::Duration;

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::services::chunk::{DirtyRecord, flush_records};
use crate::state::AppState;

/// Spawn the flush loop. Returns `None` for a memory-only server.
#[must_use]
pub fn spawn_persistence_task(state: AppState, flush_interval_ms: u64) -> Option<JoinHandle<()>> {
    let pool = state.pool.clone()?;
    info!(flush_interval_ms, "chunk persistence flush configured");
    Some(tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(flush_interval_ms)).await;
            flush_all_dirty(&state, &pool).await;
        }
    }))
}

/// One flush cycle. Returns how many records were written.
pub(crate) async fn flush_all_dirty(state: &AppState, pool: &PgPool) -> usize {
    // PHASE: SNAPSHOT DIRTY RECORDS
    // WHY: collect clones under lock, then perform I/O lock-free.
    let batch = collect_dirty(state).await;

    if !batch.is_empty() {
        match flush_records(pool, &batch).await {
            Ok(()) => clear_flushed(state, &batch).await,
            Err(e) => {
                error!(error = %e, count = batch.len(), "persistence flush failed; keeping dirty records");
                return 0;
            }
        }
    }

    evict_idle(state).await;
    batch.len()
}

async fn collect_dirty(state: &AppState) -> Vec<DirtyRecord> {
    let chunks = state.chunks.read().await;
    let mut batch = Vec::new();
    for (path, chunk) in chunks.iter() {
        for id in &chunk.dirty {
            if let Some(record) = chunk.records.get(id) {
                batch.push(DirtyRecord { path: *path, id: id.clone(), record: record.clone() });
            }
        }
    }
    batch
}

async fn clear_flushed(state: &AppState, flushed: &[DirtyRecord]) {
    let mut chunks = state.chunks.write().await;
    for dirty in flushed {
        if let Some(chunk) = chunks.get_mut(&dirty.path) {
            chunk.dirty.remove(&dirty.id);
        }
    }
    debug!(count = flushed.len(), "persistence flush complete");
}

async fn evict_idle(state: &AppState) {
    let mut chunks = state.chunks.write().await;
    let before = chunks.len();
    chunks.retain(|_, chunk| !chunk.is_idle());
    let evicted = before - chunks.len();
    if evicted > 0 {
        debug!(evicted, remaining = chunks.len(), "evicted idle chunks");
    }
}
