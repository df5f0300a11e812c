//! Local persisted backend: synchronous storage with in-process fan-out.
//!
//! DESIGN
//! ======
//! All views opened from one [`LocalStore`] share a bus: the collections that
//! have been touched so far and, per path, the sink of every subscribed view.
//! Writes update the shared collection, persist it, then push the new full
//! value to each subscriber of the path, so several views in one process stay
//! consistent without a server.
//!
//! Chunk collections are optionally backed by one JSON file per chunk under
//! `<root>/chunks/<namespace>/<cx>_<cy>.json`, loaded lazily on first access
//! and rewritten atomically (temp file + rename) on every append. Cursors are
//! ephemeral and never touch disk.
//!
//! A collection stays in memory only while some view listens to it, unless it
//! is the sole copy: non-empty collections of a memory-only store are kept.
//!
//! Records keep the id and timestamp their author gave them. A record without
//! an `id` gets a fresh UUID.

#[cfg(test)]
#[path = "local_test.rs"]
mod local_test;

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::{BackendInitError, CURSORS_ROOT, Namespace, Snapshot, SnapshotSink, StoreAdapter, SubscriptionError, WriteError};
use crate::chunk::ChunkKey;

type PathKey = (Namespace, String);

struct Shared {
    root: Option<PathBuf>,
    next_view: AtomicU64,
    bus: Mutex<Bus>,
}

#[derive(Default)]
struct Bus {
    collections: HashMap<PathKey, Map<String, Value>>,
    listeners: HashMap<PathKey, HashMap<u64, SnapshotSink>>,
}

/// One view's handle onto a shared local store.
pub struct LocalStore {
    shared: Arc<Shared>,
    view: u64,
}

impl LocalStore {
    /// A store that lives only as long as the process.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_root(None)
    }

    /// A store persisted under `root`, created if missing.
    ///
    /// # Errors
    ///
    /// Returns [`BackendInitError::Storage`] if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BackendInitError> {
        let root = root.into();
        let chunks = root.join("chunks");
        fs::create_dir_all(&chunks).map_err(|source| BackendInitError::Storage { path: chunks, source })?;
        info!(root = %root.display(), "local store opened");
        Ok(Self::with_root(Some(root)))
    }

    fn with_root(root: Option<PathBuf>) -> Self {
        let shared = Shared { root, next_view: AtomicU64::new(1), bus: Mutex::new(Bus::default()) };
        Self { shared: Arc::new(shared), view: 0 }
    }

    /// Another view over the same storage and bus, with its own subscriptions.
    #[must_use]
    pub fn open_view(&self) -> Self {
        let view = self.shared.next_view.fetch_add(1, Ordering::Relaxed);
        Self { shared: Arc::clone(&self.shared), view }
    }

    /// Storage directory, or `None` for a memory-only store.
    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        self.shared.root.as_deref()
    }

    fn bus(&self) -> MutexGuard<'_, Bus> {
        self.shared.bus.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn file_for(&self, namespace: Namespace, key: &str) -> io::Result<Option<PathBuf>> {
        let Some(root) = &self.shared.root else {
            return Ok(None);
        };
        if !namespace.is_chunked() {
            return Ok(None);
        }
        // Only well-formed chunk keys become file names.
        let chunk: ChunkKey = key.parse().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        Ok(Some(root.join("chunks").join(namespace.as_str()).join(format!("{chunk}.json"))))
    }

    /// The collection at `path`, loading it from disk on first access.
    fn load<'a>(&self, bus: &'a mut Bus, namespace: Namespace, key: &str) -> io::Result<&'a mut Map<String, Value>> {
        let path = (namespace, key.to_owned());
        if !bus.collections.contains_key(&path) {
            let loaded = match self.file_for(namespace, key)? {
                Some(file) => read_collection(&file)?,
                None => Map::new(),
            };
            bus.collections.insert(path.clone(), loaded);
        }
        Ok(bus.collections.entry(path).or_default())
    }

    /// Write `record` under `entry` of `namespace/key`, persist, then fan out.
    fn write(&self, namespace: Namespace, key: &str, entry: String, record: Value) -> Result<(), WriteError> {
        let file = self.file_for(namespace, key)?;
        let mut bus = self.bus();
        let collection = self.load(&mut bus, namespace, key)?;

        if let Some(file) = file {
            let mut next = collection.clone();
            next.insert(entry.clone(), record.clone());
            write_collection(&file, &next)?;
        }
        collection.insert(entry, record);

        let value = Value::Object(collection.clone());
        fan_out(&mut bus, namespace, key, &value);
        self.release_if_idle(&mut bus, namespace, key);
        Ok(())
    }

    /// Drop the cached collection of an unwatched path when disk holds it or
    /// it is empty.
    fn release_if_idle(&self, bus: &mut Bus, namespace: Namespace, key: &str) {
        let path = (namespace, key.to_owned());
        if bus.listeners.contains_key(&path) {
            return;
        }
        let persisted = self.shared.root.is_some() && namespace.is_chunked();
        if persisted || bus.collections.get(&path).is_some_and(Map::is_empty) {
            bus.collections.remove(&path);
        }
    }
}

impl StoreAdapter for LocalStore {
    fn subscribe(&self, namespace: Namespace, key: &str, sink: SnapshotSink) -> Result<(), SubscriptionError> {
        let mut bus = self.bus();
        let collection = self.load(&mut bus, namespace, key)?;
        let value = if collection.is_empty() { Value::Null } else { Value::Object(collection.clone()) };

        let snapshot = Snapshot { namespace, key: key.to_owned(), value };
        if sink.send(snapshot).is_err() {
            debug!(%namespace, key, "local store: subscriber gone before first snapshot");
            self.release_if_idle(&mut bus, namespace, key);
            return Ok(());
        }
        bus.listeners
            .entry((namespace, key.to_owned()))
            .or_default()
            .insert(self.view, sink);
        Ok(())
    }

    fn unsubscribe(&self, namespace: Namespace, key: &str) -> Result<(), SubscriptionError> {
        let mut bus = self.bus();
        let path = (namespace, key.to_owned());
        if let Some(listeners) = bus.listeners.get_mut(&path) {
            listeners.remove(&self.view);
            if listeners.is_empty() {
                bus.listeners.remove(&path);
            }
        }
        self.release_if_idle(&mut bus, namespace, key);
        Ok(())
    }

    fn append(&self, namespace: Namespace, key: &str, mut record: Value) -> Result<(), WriteError> {
        if !namespace.is_chunked() {
            return Err(WriteError::Unsupported { namespace, op: "append" });
        }
        let Some(obj) = record.as_object_mut() else {
            return Err(WriteError::Encode(serde::de::Error::custom("record must be a JSON object")));
        };
        let id = match obj.get("id").and_then(Value::as_str) {
            Some(id) => id.to_owned(),
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                obj.insert("id".into(), Value::String(id.clone()));
                id
            }
        };
        self.write(namespace, key, id, record)
    }

    fn set_latest(&self, namespace: Namespace, key: &str, record: Value) -> Result<(), WriteError> {
        if namespace.is_chunked() {
            return Err(WriteError::Unsupported { namespace, op: "set_latest" });
        }
        self.write(namespace, CURSORS_ROOT, key.to_owned(), record)
    }
}

/// Push the current value to every live listener of a path, pruning closed sinks.
fn fan_out(bus: &mut Bus, namespace: Namespace, key: &str, value: &Value) {
    let path = (namespace, key.to_owned());
    let Some(listeners) = bus.listeners.get_mut(&path) else {
        return;
    };
    listeners.retain(|view, sink| {
        let snapshot = Snapshot { namespace, key: key.to_owned(), value: value.clone() };
        let alive = sink.send(snapshot).is_ok();
        if !alive {
            debug!(%namespace, key, view, "local store: dropping closed subscriber");
        }
        alive
    });
    if listeners.is_empty() {
        bus.listeners.remove(&path);
    }
}

fn read_collection(file: &Path) -> io::Result<Map<String, Value>> {
    let bytes = match fs::read(file) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Map::new()),
        Err(e) => return Err(e),
    };
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(_) | Err(_) => {
            warn!(file = %file.display(), "local store: unreadable chunk file treated as empty");
            Ok(Map::new())
        }
    }
}

fn write_collection(file: &Path, collection: &Map<String, Value>) -> io::Result<()> {
    if let Some(dir) = file.parent() {
        fs::create_dir_all(dir)?;
    }
    let bytes = serde_json::to_vec(collection).map_err(io::Error::other)?;
    let tmp = file.with_extension("json.tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, file)
}
