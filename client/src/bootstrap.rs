//! Backend selection at startup.
//!
//! `auto` tries the sync server first and falls back to the local persisted
//! backend when it cannot be reached. The choice is made once: a process
//! that fell back stays local for its whole lifetime.

#[cfg(test)]
#[path = "bootstrap_test.rs"]
mod bootstrap_test;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use canvas::store::{BackendInitError, LocalStore, StoreAdapter};
use clap::ValueEnum;
use tracing::{info, warn};

use crate::live::LiveStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Mode {
    /// Live if the server answers, otherwise local.
    #[default]
    Auto,
    Live,
    Local,
}

#[derive(Debug, Clone)]
pub struct BackendOptions {
    pub mode: Mode,
    pub server_url: String,
    pub participant: String,
    pub connect_timeout: Duration,
    /// Local storage root; `None` keeps the local backend in memory.
    pub data_dir: Option<PathBuf>,
}

/// The backend this process runs on.
pub enum Backend {
    Live(Arc<LiveStore>),
    Local(LocalStore),
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

impl Backend {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Live(_) => "live",
            Self::Local(_) => "local",
        }
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// A store handle for one more view. Local views share the in-process bus;
    /// the live backend has a single session, so every view shares it.
    #[must_use]
    pub fn open_view(&self) -> Arc<dyn StoreAdapter> {
        match self {
            Self::Live(store) => Arc::clone(store) as Arc<dyn StoreAdapter>,
            Self::Local(store) => Arc::new(store.open_view()),
        }
    }

    /// Wait for queued writes to leave the process.
    pub async fn flush(&self) {
        if let Self::Live(store) = self {
            if !store.flush().await {
                warn!("live store closed before queued writes were sent");
            }
        }
    }
}

/// Bring up the backend `opts.mode` asks for.
///
/// # Errors
///
/// Returns [`BackendInitError`] when the requested backend cannot start. In
/// `auto` mode only a local storage failure is returned.
pub async fn open_backend(opts: &BackendOptions) -> Result<Backend, BackendInitError> {
    match opts.mode {
        Mode::Live => connect_live(opts).await,
        Mode::Local => open_local(opts),
        Mode::Auto => match connect_live(opts).await {
            Ok(backend) => Ok(backend),
            Err(e) => {
                warn!(error = %e, "sync server unavailable; falling back to local store for this session");
                open_local(opts)
            }
        },
    }
}

async fn connect_live(opts: &BackendOptions) -> Result<Backend, BackendInitError> {
    let store = LiveStore::connect(&opts.server_url, &opts.participant, opts.connect_timeout).await?;
    Ok(Backend::Live(Arc::new(store)))
}

fn open_local(opts: &BackendOptions) -> Result<Backend, BackendInitError> {
    let store = match &opts.data_dir {
        Some(dir) => LocalStore::open(dir)?,
        None => LocalStore::in_memory(),
    };
    info!(persisted = opts.data_dir.is_some(), "local store ready");
    Ok(Backend::Local(store))
}
