//! Subcommand implementations.

#[cfg(test)]
#[path = "commands_test.rs"]
mod commands_test;

use canvas::camera::Point;
use canvas::compose::{ComposeError, Composer, NoteDraft};
use canvas::doc::{Note, Stamp};
use canvas::engine::{EngineConfig, EngineCore, Participant};
use canvas::store::BackendInitError;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::Value;
use tracing::{info, warn};

use crate::bootstrap::{Backend, BackendOptions, open_backend};
use crate::bots::{BotConfig, BotSwarm, spawn_bots};
use crate::config::{NoteArgs, StampArgs, ViewArgs};
use crate::session::{self, SessionConfig, SessionReport};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Backend(#[from] BackendInitError),
    #[error("not created: {0}")]
    Compose(#[from] ComposeError),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned HTTP {status}: {message}")]
    ServerError { status: u16, message: String },
}

/// Fresh seed for tilt and placement jitter.
fn seed() -> u64 {
    uuid::Uuid::new_v4().as_u64_pair().0
}

// =============================================================================
// VIEW
// =============================================================================

/// Run a headless viewer, with bots on the local backend if asked.
///
/// # Errors
///
/// Returns [`ClientError::Backend`] when no backend can be opened.
pub async fn view(opts: &BackendOptions, args: &ViewArgs) -> Result<SessionReport, ClientError> {
    let backend = open_backend(opts).await?;
    info!(backend = backend.kind(), participant = %opts.participant, "viewer starting");

    let bots = match (args.bots, &backend) {
        (0, _) => None,
        (count, Backend::Local(_)) => {
            let config = BotConfig { count, ..BotConfig::default() };
            Some(spawn_bots(BotSwarm::new(config, seed()), backend.open_view()))
        }
        (_, Backend::Live(_)) => {
            warn!("bots only run on the local backend; ignoring --bots");
            None
        }
    };

    let participant = Participant { id: opts.participant.clone(), color: args.color.clone() };
    let config = EngineConfig { motion: args.motion.to_config(), ..EngineConfig::default() };
    let mut core = EngineCore::new(backend.open_view(), participant, config, seed());
    let session = SessionConfig {
        width: args.width,
        height: args.height,
        frame: args.frame_interval(),
        frames: args.frames,
        pan: args.pan,
        report_every: u64::from(args.fps.max(1)) * 5,
    };
    let report = session::run(&mut core, session).await;

    if let Some(bots) = bots {
        bots.abort();
    }
    backend.flush().await;
    Ok(report)
}

// =============================================================================
// CREATE
// =============================================================================

/// Write one note as `opts.participant`.
///
/// # Errors
///
/// Returns [`ClientError::Compose`] for invalid text or a failed write.
pub async fn note(opts: &BackendOptions, args: &NoteArgs) -> Result<Note, ClientError> {
    let backend = open_backend(opts).await?;
    let draft = NoteDraft {
        text: args.text.clone(),
        color: args.color,
        at: args.x.zip(args.y).map(|(x, y)| Point::new(x, y)),
    };
    let store = backend.open_view();
    let note = Composer::new().note_at(
        store.as_ref(),
        &mut StdRng::seed_from_u64(seed()),
        &opts.participant,
        &draft,
        Point::default(),
        frames::now_ms(),
    )?;
    backend.flush().await;
    Ok(note)
}

/// Drop one stamp as `opts.participant`.
///
/// # Errors
///
/// Returns [`ClientError::Compose`] when the write fails.
pub async fn stamp(opts: &BackendOptions, args: &StampArgs) -> Result<Stamp, ClientError> {
    let backend = open_backend(opts).await?;
    let store = backend.open_view();
    let stamp = Composer::new().stamp_at(
        store.as_ref(),
        &mut StdRng::seed_from_u64(seed()),
        &opts.participant,
        &args.emoji,
        Point::new(args.x, args.y),
        frames::now_ms(),
    )?;
    backend.flush().await;
    Ok(stamp)
}

// =============================================================================
// REST
// =============================================================================

/// `GET /healthz`.
///
/// # Errors
///
/// Returns an error if the request fails or the server is unhealthy.
pub async fn ping(base_url: &str) -> Result<(), ClientError> {
    let url = format!("{}/healthz", base_url.trim_end_matches('/'));
    let response = reqwest::get(url).await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ClientError::ServerError { status: status.as_u16(), message: "health check failed".into() });
    }
    Ok(())
}

/// `GET /api/chunks/{namespace}/{key}`: the chunk's current value.
///
/// # Errors
///
/// Returns an error if the request fails or the server rejects the path.
pub async fn chunk(base_url: &str, namespace: &str, key: &str) -> Result<Value, ClientError> {
    let url = format!("{}/api/chunks/{namespace}/{key}", base_url.trim_end_matches('/'));
    let response = reqwest::get(url).await?;
    let status = response.status();
    let body: Value = response.json().await?;
    if !status.is_success() {
        let message = body.get("message").and_then(Value::as_str).unwrap_or("request failed").to_owned();
        return Err(ClientError::ServerError { status: status.as_u16(), message });
    }
    Ok(body.get("value").cloned().unwrap_or(Value::Null))
}
