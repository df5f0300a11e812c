//! Chunk cache and subscription manager.
//!
//! DESIGN
//! ======
//! The cache tracks which chunks the viewport needs, which of those it holds a
//! live subscription for, and the latest notes/stamps snapshot of each loaded
//! chunk. [`ChunkCache::recompute`] diffs the needed set against the
//! subscribed set and issues exactly the subscribe/unsubscribe calls that close
//! the gap; [`ChunkCache::apply`] folds delivered snapshots back in.
//!
//! Each snapshot replaces a chunk's list wholesale. A chunk that is subscribed
//! but has no list yet is "loading"; an empty list means "loaded, empty".
//!
//! ERROR HANDLING
//! ==============
//! Store failures never escape. A chunk whose subscription fails stays out of
//! the subscribed set and the range memo is left unset, so the very next
//! recompute retries it even if the viewport has not moved. A refusal the
//! store reports after the fact (see [`StoreAdapter::take_refused`]) is
//! handled the same way at the start of the next recompute. Snapshots for
//! chunks that are no longer needed are ignored.

#[cfg(test)]
#[path = "cache_test.rs"]
mod cache_test;

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::camera::Viewport;
use crate::chunk::{ChunkKey, ChunkRange, chunk_bounds};
use crate::consts::{CHUNK_BUFFER, MAX_NEEDED_CHUNKS};
use crate::doc::{Note, Parsed, Record, Stamp, parse_collection};
use crate::store::{Namespace, Snapshot, SnapshotSink, StoreAdapter};

/// Tunables for [`ChunkCache`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheConfig {
    /// World units added around the visible rect before picking chunks.
    pub buffer: f64,
    /// Ranges larger than this are refused instead of subscribed.
    pub max_chunks: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { buffer: CHUNK_BUFFER, max_chunks: MAX_NEEDED_CHUNKS }
    }
}

/// What one recompute did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recompute {
    /// Same range as last time; no store calls were made.
    Unchanged,
    /// The range was too large to subscribe.
    Refused { chunks: u64 },
    Updated { subscribed: usize, unsubscribed: usize, failed: usize },
}

pub struct ChunkCache {
    config: CacheConfig,
    sink: SnapshotSink,
    needed: HashSet<ChunkKey>,
    subscribed: HashSet<ChunkKey>,
    notes: HashMap<ChunkKey, Vec<Note>>,
    stamps: HashMap<ChunkKey, Vec<Stamp>>,
    last_range: Option<ChunkRange>,
    refused: Option<ChunkRange>,
    dirty: bool,
}

impl ChunkCache {
    /// A cache whose subscriptions deliver into `sink`.
    #[must_use]
    pub fn new(config: CacheConfig, sink: SnapshotSink) -> Self {
        Self {
            config,
            sink,
            needed: HashSet::new(),
            subscribed: HashSet::new(),
            notes: HashMap::new(),
            stamps: HashMap::new(),
            last_range: None,
            refused: None,
            dirty: false,
        }
    }

    // =========================================================================
    // RECOMPUTE
    // =========================================================================

    /// Bring subscriptions in line with the chunks around `viewport`.
    pub fn recompute(&mut self, store: &dyn StoreAdapter, viewport: &Viewport, width: f64, height: f64) -> Recompute {
        self.forget_refused(store);
        let range = chunk_bounds(viewport.visible_rect(width, height), self.config.buffer);
        if self.last_range == Some(range) {
            return Recompute::Unchanged;
        }
        if range.len() > self.config.max_chunks {
            if self.refused != Some(range) {
                warn!(chunks = range.len(), max = self.config.max_chunks, "chunk cache: needed range refused");
                self.refused = Some(range);
            }
            return Recompute::Refused { chunks: range.len() };
        }
        self.refused = None;

        self.needed = range.keys().collect();

        let mut unsubscribed = 0;
        let mut stuck = 0;
        let stale: Vec<ChunkKey> = self.subscribed.difference(&self.needed).copied().collect();
        for key in stale {
            if self.release(store, key) {
                unsubscribed += 1;
            } else {
                stuck += 1;
            }
        }

        let mut subscribed = 0;
        let mut failed = 0;
        let missing: Vec<ChunkKey> = self.needed.difference(&self.subscribed).copied().collect();
        for key in missing {
            if self.acquire(store, key) {
                subscribed += 1;
            } else {
                failed += 1;
            }
        }

        // Failed keys are retried next time, so the memo must not short-circuit it.
        self.last_range = if failed == 0 && stuck == 0 { Some(range) } else { None };

        Recompute::Updated { subscribed, unsubscribed, failed }
    }

    /// Subscribe both namespaces for `key`. On partial failure rolls back.
    fn acquire(&mut self, store: &dyn StoreAdapter, key: ChunkKey) -> bool {
        let text = key.to_string();
        if let Err(e) = store.subscribe(Namespace::Notes, &text, self.sink.clone()) {
            warn!(%key, namespace = "notes", error = %e, "chunk cache: subscribe failed");
            return false;
        }
        if let Err(e) = store.subscribe(Namespace::Stamps, &text, self.sink.clone()) {
            warn!(%key, namespace = "stamps", error = %e, "chunk cache: subscribe failed");
            if let Err(e) = store.unsubscribe(Namespace::Notes, &text) {
                warn!(%key, error = %e, "chunk cache: rollback unsubscribe failed");
            }
            return false;
        }
        debug!(%key, "chunk cache: subscribed");
        self.subscribed.insert(key);
        true
    }

    /// Drop chunks whose subscription the store refused after accepting it, so
    /// the diff below subscribes them again.
    fn forget_refused(&mut self, store: &dyn StoreAdapter) {
        for (namespace, text) in store.take_refused() {
            if !namespace.is_chunked() {
                continue;
            }
            let Ok(key) = text.parse::<ChunkKey>() else {
                warn!(%namespace, key = %text, "chunk cache: refusal for a path outside the chunk grid");
                continue;
            };
            if !self.subscribed.remove(&key) {
                continue;
            }
            warn!(%key, %namespace, "chunk cache: subscription refused, will retry");
            self.notes.remove(&key);
            self.stamps.remove(&key);
            self.last_range = None;
            self.dirty = true;
        }
    }

    /// Unsubscribe both namespaces for `key` and forget its lists.
    fn release(&mut self, store: &dyn StoreAdapter, key: ChunkKey) -> bool {
        let text = key.to_string();
        let mut ok = true;
        for namespace in [Namespace::Notes, Namespace::Stamps] {
            if let Err(e) = store.unsubscribe(namespace, &text) {
                warn!(%key, %namespace, error = %e, "chunk cache: unsubscribe failed");
                ok = false;
            }
        }
        self.notes.remove(&key);
        self.stamps.remove(&key);
        self.dirty = true;
        if ok {
            self.subscribed.remove(&key);
            debug!(%key, "chunk cache: unsubscribed");
        }
        ok
    }

    // =========================================================================
    // SNAPSHOTS
    // =========================================================================

    /// Fold one delivered snapshot into the cache. Returns whether it was applied.
    pub fn apply(&mut self, snapshot: &Snapshot) -> bool {
        let Ok(key) = snapshot.key.parse::<ChunkKey>() else {
            return false;
        };
        if !self.needed.contains(&key) || !self.subscribed.contains(&key) {
            return false;
        }
        match snapshot.namespace {
            Namespace::Notes => {
                let notes = records(snapshot, key);
                self.notes.insert(key, notes);
            }
            Namespace::Stamps => {
                let stamps = records(snapshot, key);
                self.stamps.insert(key, stamps);
            }
            Namespace::Cursors => return false,
        }
        self.dirty = true;
        true
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Notes of a loaded chunk, or `None` while it is not loaded.
    #[must_use]
    pub fn notes(&self, key: ChunkKey) -> Option<&[Note]> {
        self.notes.get(&key).map(Vec::as_slice)
    }

    /// Stamps of a loaded chunk, or `None` while it is not loaded.
    #[must_use]
    pub fn stamps(&self, key: ChunkKey) -> Option<&[Stamp]> {
        self.stamps.get(&key).map(Vec::as_slice)
    }

    #[must_use]
    pub fn is_needed(&self, key: ChunkKey) -> bool {
        self.needed.contains(&key)
    }

    #[must_use]
    pub fn is_subscribed(&self, key: ChunkKey) -> bool {
        self.subscribed.contains(&key)
    }

    #[must_use]
    pub fn subscribed_count(&self) -> usize {
        self.subscribed.len()
    }

    /// Chunks with both lists delivered.
    #[must_use]
    pub fn loaded_count(&self) -> usize {
        self.notes.keys().filter(|k| self.stamps.contains_key(k)).count()
    }

    #[must_use]
    pub fn last_range(&self) -> Option<ChunkRange> {
        self.last_range
    }

    /// Whether anything changed since the last [`Self::take_dirty`].
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}

fn records<T: Record>(snapshot: &Snapshot, key: ChunkKey) -> Vec<T> {
    let Parsed { records, dropped } = parse_collection::<T>(&snapshot.value);
    for reason in dropped {
        warn!(%key, namespace = %snapshot.namespace, error = %reason, "chunk cache: dropped malformed record");
    }
    records
}
