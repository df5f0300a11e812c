//! Command-line and environment configuration.
//!
//! Every flag has an environment fallback, so a `.env`-style shell setup and
//! explicit flags configure the same knobs. Motion defaults come from
//! `canvas::consts`.

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

use std::path::PathBuf;
use std::time::Duration;

use canvas::consts::{FRICTION, KEY_PAN_SPEED, STOP_THRESHOLD, ZOOM_INTENSITY};
use canvas::doc::NoteColor;
use canvas::motion::MotionConfig;
use clap::{Args, Parser, Subcommand};

use crate::bootstrap::{BackendOptions, Mode};
use crate::session::PanDirection;

#[derive(Parser, Debug)]
#[command(name = "sticky", about = "Stickyboard viewer and tools")]
pub struct Cli {
    #[command(flatten)]
    pub backend: BackendArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct BackendArgs {
    /// Sync server base URL.
    #[arg(long, global = true, env = "STICKY_SERVER_URL", default_value = "http://127.0.0.1:3000")]
    pub server_url: String,

    #[arg(long, global = true, env = "STICKY_MODE", value_enum, default_value_t = Mode::Auto)]
    pub mode: Mode,

    /// Where the local backend keeps chunk files. Memory only when unset.
    #[arg(long, global = true, env = "STICKY_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Participant id; a random one is generated when unset.
    #[arg(long, global = true, env = "STICKY_PARTICIPANT")]
    pub participant: Option<String>,

    #[arg(long, global = true, env = "STICKY_CONNECT_TIMEOUT_MS", default_value_t = 3_000)]
    pub connect_timeout_ms: u64,
}

impl BackendArgs {
    #[must_use]
    pub fn options(&self) -> BackendOptions {
        BackendOptions {
            mode: self.mode,
            server_url: self.server_url.clone(),
            participant: self.participant.clone().unwrap_or_else(random_participant),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            data_dir: self.data_dir.clone(),
        }
    }
}

fn random_participant() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("viewer-{}", &id[..8])
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a headless viewer session.
    View(ViewArgs),
    /// Create one note.
    Note(NoteArgs),
    /// Drop one stamp.
    Stamp(StampArgs),
    /// Check the sync server is up.
    Ping,
    /// Print one chunk's current value from the sync server.
    Chunk {
        namespace: String,
        #[arg(allow_hyphen_values = true)]
        key: String,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ViewArgs {
    /// Simulated participants. Bots only run on the local backend.
    #[arg(long, env = "STICKY_BOTS", default_value_t = 0)]
    pub bots: usize,

    #[arg(long, env = "STICKY_FPS", default_value_t = 60)]
    pub fps: u32,

    #[arg(long, env = "STICKY_WIDTH", default_value_t = 1280.0)]
    pub width: f64,

    #[arg(long, env = "STICKY_HEIGHT", default_value_t = 800.0)]
    pub height: f64,

    /// Stop after this many frames.
    #[arg(long)]
    pub frames: Option<u64>,

    /// Hold a pan key for the whole session.
    #[arg(long, value_enum)]
    pub pan: Option<PanDirection>,

    /// Cursor color for this viewer.
    #[arg(long, default_value = "#60a5fa")]
    pub color: String,

    #[command(flatten)]
    pub motion: MotionArgs,
}

impl ViewArgs {
    /// Time between frames; a zero rate is treated as 1 fps.
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }
}

#[derive(Args, Debug, Clone, Copy)]
pub struct MotionArgs {
    #[arg(long, default_value_t = FRICTION)]
    pub friction: f64,

    #[arg(long, default_value_t = STOP_THRESHOLD)]
    pub stop_threshold: f64,

    #[arg(long, default_value_t = KEY_PAN_SPEED)]
    pub key_pan_speed: f64,

    #[arg(long, default_value_t = ZOOM_INTENSITY)]
    pub zoom_intensity: f64,
}

impl MotionArgs {
    #[must_use]
    pub fn to_config(&self) -> MotionConfig {
        MotionConfig {
            friction: self.friction,
            stop_threshold: self.stop_threshold,
            key_pan_speed: self.key_pan_speed,
            zoom_intensity: self.zoom_intensity,
            ..MotionConfig::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct NoteArgs {
    #[arg(long)]
    pub text: String,

    /// `yellow`, `blue`, `green`, `pink`, `orange` or a hex fill.
    #[arg(long, default_value = "yellow")]
    pub color: NoteColor,

    /// World position; the origin (with jitter) when omitted.
    #[arg(long, allow_hyphen_values = true, requires = "y")]
    pub x: Option<f64>,

    #[arg(long, allow_hyphen_values = true, requires = "x")]
    pub y: Option<f64>,
}

#[derive(Args, Debug, Clone)]
pub struct StampArgs {
    #[arg(long, default_value = "❤️")]
    pub emoji: String,

    #[arg(long, allow_hyphen_values = true)]
    pub x: f64,

    #[arg(long, allow_hyphen_values = true)]
    pub y: f64,
}
