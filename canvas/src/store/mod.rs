//! Remote store contract shared by every backend.
//!
//! DESIGN
//! ======
//! The store is a tree of collections: `chunks/<namespace>/<cx>_<cy>` for notes
//! and stamps, and one flat `cursors` collection keyed by participant id.
//! Subscribers hand the store a [`SnapshotSink`]; every change to a path sends
//! the path's full current value into that sink, starting with one delivery
//! right after `subscribe` (an empty collection if nothing exists yet).
//!
//! Sinks are channel senders, so delivery is always queued for the owning view
//! to drain on its own tick. A store never calls back into the subscriber.
//!
//! A store instance belongs to one view: it holds at most one sink per path.
//! Backends that fan out to several views in one process expose a way to open
//! another instance over shared state (see [`LocalStore::open_view`]).

pub mod local;


use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde_json::Value;
use tokio::sync::mpsc;

pub use local::LocalStore;

/// Key of the single cursor collection.
pub const CURSORS_ROOT: &str = "";

// =============================================================================
// NAMESPACES & SNAPSHOTS
// =============================================================================

/// Top-level collection family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    Notes,
    Stamps,
    Cursors,
}

impl Namespace {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Notes => "notes",
            Self::Stamps => "stamps",
            Self::Cursors => "cursors",
        }
    }

    /// Chunked namespaces are partitioned by chunk key and append-only.
    #[must_use]
    pub fn is_chunked(self) -> bool {
        matches!(self, Self::Notes | Self::Stamps)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown namespace: {0}")]
pub struct UnknownNamespace(pub String);

impl FromStr for Namespace {
    type Err = UnknownNamespace;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "notes" => Ok(Self::Notes),
            "stamps" => Ok(Self::Stamps),
            "cursors" => Ok(Self::Cursors),
            other => Err(UnknownNamespace(other.to_owned())),
        }
    }
}

/// Full value of one store path at some instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub namespace: Namespace,
    pub key: String,
    /// Map of record id to record, or `Null` for an empty path.
    pub value: Value,
}

pub type SnapshotSink = mpsc::UnboundedSender<Snapshot>;

/// Receiving end of a view's snapshot queue.
pub struct Inbox {
    tx: SnapshotSink,
    rx: mpsc::UnboundedReceiver<Snapshot>,
}

impl Default for Inbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Inbox {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// A sender that delivers into this inbox.
    #[must_use]
    pub fn sink(&self) -> SnapshotSink {
        self.tx.clone()
    }

    /// Take every snapshot queued so far without waiting.
    pub fn drain(&mut self) -> Vec<Snapshot> {
        let mut out = Vec::new();
        while let Ok(snapshot) = self.rx.try_recv() {
            out.push(snapshot);
        }
        out
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// The backend could not be brought up. Fatal at startup only.
#[derive(Debug, thiserror::Error)]
pub enum BackendInitError {
    #[error("cannot reach sync server at {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("sync server at {url} did not answer within {after_ms}ms")]
    Timeout { url: String, after_ms: u64 },
    #[error("sync server handshake failed: {0}")]
    Handshake(String),
    #[error("cannot open local store at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A write did not reach the store.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("store unreachable: {0}")]
    Unreachable(String),
    #[error("local storage write failed: {0}")]
    Storage(#[from] std::io::Error),
    #[error("record encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("{op} is not supported on {namespace}")]
    Unsupported { namespace: Namespace, op: &'static str },
}

/// A subscription change did not reach the store. Retried by the caller.
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("store unreachable: {0}")]
    Unreachable(String),
    #[error("local storage read failed: {0}")]
    Storage(#[from] std::io::Error),
}

// =============================================================================
// ADAPTER
// =============================================================================

/// Per-path append / set-latest / subscribe / unsubscribe.
pub trait StoreAdapter: Send + Sync {
    /// Start delivering full snapshots of `namespace/key` into `sink`,
    /// beginning with the current value. Replaces any earlier sink for the path.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError`] when the backend cannot register the listener.
    fn subscribe(&self, namespace: Namespace, key: &str, sink: SnapshotSink) -> Result<(), SubscriptionError>;

    /// Stop deliveries for `namespace/key`. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError`] when the backend cannot release the listener.
    fn unsubscribe(&self, namespace: Namespace, key: &str) -> Result<(), SubscriptionError>;

    /// Paths whose subscription was accepted by [`Self::subscribe`] but later
    /// refused by the backend. Each refusal is reported once; the path is no
    /// longer delivered to and must be subscribed again.
    fn take_refused(&self) -> Vec<(Namespace, String)> {
        Vec::new()
    }

    /// Add one record under `namespace/key`.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError`] when the record cannot be written.
    fn append(&self, namespace: Namespace, key: &str, record: Value) -> Result<(), WriteError>;

    /// Overwrite the entry `key` of an ephemeral collection (last writer wins).
    ///
    /// # Errors
    ///
    /// Returns [`WriteError`] when the record cannot be written.
    fn set_latest(&self, namespace: Namespace, key: &str, record: Value) -> Result<(), WriteError>;
}
