//! Headless viewer: drives an [`EngineCore`] at a fixed frame rate without a
//! canvas, optionally holding a pan key, and reports what it saw.

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

use std::time::Duration;

use canvas::cache::Recompute;
use canvas::camera::Point;
use canvas::engine::{EngineCore, TickStats};
use clap::ValueEnum;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PanDirection {
    Up,
    Down,
    Left,
    Right,
}

impl PanDirection {
    /// The key a person would hold for this direction.
    #[must_use]
    pub fn key_code(self) -> &'static str {
        match self {
            Self::Up => "ArrowUp",
            Self::Down => "ArrowDown",
            Self::Left => "ArrowLeft",
            Self::Right => "ArrowRight",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    pub width: f64,
    pub height: f64,
    pub frame: Duration,
    /// Stop after this many frames; `None` runs until interrupted.
    pub frames: Option<u64>,
    pub pan: Option<PanDirection>,
    /// Log a summary every this many frames.
    pub report_every: u64,
}

/// What the viewer saw over a session, as of the last frame.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct SessionReport {
    pub frames: u64,
    pub renders: u64,
    pub recomputes: u64,
    pub subscribed_chunks: usize,
    pub notes: usize,
    pub stamps: usize,
    pub cursors: usize,
    pub viewport: Point,
}

/// Size the view, park the pointer at its center and start the pan key.
pub fn prepare(core: &mut EngineCore, config: &SessionConfig, now_ms: i64) {
    core.set_viewport(config.width, config.height, 1.0);
    // A parked pointer makes this viewer's cursor visible to others.
    core.on_pointer_move(Point::new(config.width / 2.0, config.height / 2.0), now_ms);
    if let Some(dir) = config.pan {
        core.on_key_down(dir.key_code());
    }
}

/// Advance one frame and fold it into `report`.
pub fn step(core: &mut EngineCore, report: &mut SessionReport, now_ms: i64) -> TickStats {
    let stats = core.tick(now_ms);
    report.frames += 1;
    if stats.render {
        report.renders += 1;
    }
    if matches!(stats.recompute, Recompute::Updated { .. }) {
        report.recomputes += 1;
    }

    let scene = core.scene(now_ms);
    report.notes = scene.notes.len();
    report.stamps = scene.stamps.len();
    report.cursors = scene.cursors.len();
    report.subscribed_chunks = core.cache.subscribed_count();
    report.viewport = Point::new(core.viewport.x, core.viewport.y);
    stats
}

/// Run the session loop until the frame budget is spent.
pub async fn run(core: &mut EngineCore, config: SessionConfig) -> SessionReport {
    prepare(core, &config, frames::now_ms());
    let mut report = SessionReport::default();
    let mut ticker = tokio::time::interval(config.frame);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!(width = config.width, height = config.height, pan = ?config.pan, "viewer session started");
    while config.frames.is_none_or(|limit| report.frames < limit) {
        ticker.tick().await;
        let stats = step(core, &mut report, frames::now_ms());
        if stats.applied > 0 {
            debug!(applied = stats.applied, "viewer applied snapshots");
        }
        if config.report_every > 0 && report.frames % config.report_every == 0 {
            info!(
                frames = report.frames,
                chunks = report.subscribed_chunks,
                notes = report.notes,
                stamps = report.stamps,
                cursors = report.cursors,
                "viewer"
            );
        }
    }
    report
}
