//! Shared numeric constants for the canvas crate.

// ── Spatial partitioning ────────────────────────────────────────

/// Side length of one chunk in world units.
pub const CHUNK_SIZE: f64 = 500.0;

/// Default subscription buffer around the visible rect, in world units.
pub const CHUNK_BUFFER: f64 = CHUNK_SIZE;

/// Extra chunks painted on each side of the visible chunk range.
pub const RENDER_CHUNK_MARGIN: i64 = 1;

/// Largest screen the cache is sized for, in CSS pixels (8K UHD).
pub const MAX_SCREEN_WIDTH: f64 = 7680.0;
pub const MAX_SCREEN_HEIGHT: f64 = 4320.0;

/// Upper bound on chunks the cache will subscribe at once: everything a
/// [`MAX_SCREEN_WIDTH`] x [`MAX_SCREEN_HEIGHT`] screen needs at [`MIN_SCALE`].
pub const MAX_NEEDED_CHUNKS: u64 = chunks_across(MAX_SCREEN_WIDTH) * chunks_across(MAX_SCREEN_HEIGHT);

/// Most chunk columns a `px`-wide screen can touch at [`MIN_SCALE`] with the
/// default buffer; `+ 2` covers both partially overlapped edge chunks.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
const fn chunks_across(px: f64) -> u64 {
    ((px / MIN_SCALE + 2.0 * CHUNK_BUFFER) / CHUNK_SIZE) as u64 + 2
}

// ── Viewport ────────────────────────────────────────────────────

/// Minimum zoom scale.
pub const MIN_SCALE: f64 = 0.05;

/// Maximum zoom scale.
pub const MAX_SCALE: f64 = 8.0;

/// Multiplicative factor applied by the zoom in / zoom out buttons.
pub const ZOOM_STEP: f64 = 1.2;

// ── Motion ──────────────────────────────────────────────────────

/// Velocity multiplier applied once per inertial tick.
pub const FRICTION: f64 = 0.95;

/// Speed below which inertia stops, per axis, in screen pixels per tick.
pub const STOP_THRESHOLD: f64 = 0.01;

/// Screen pixels panned per tick for each held direction key.
pub const KEY_PAN_SPEED: f64 = 15.0;

/// Scale change per wheel delta unit.
pub const ZOOM_INTENSITY: f64 = 0.001;

// ── Records ─────────────────────────────────────────────────────

/// Cursors older than this are hidden.
pub const CURSOR_STALE_MS: i64 = 30_000;

/// Maximum note text length in characters.
pub const NOTE_TEXT_MAX: usize = 200;

/// Minimum gap between two creations by the same actor.
pub const CREATE_GAP_MS: i64 = 1_000;

/// Notes placed at the viewport center are offset by up to this many units.
pub const NOTE_CENTER_JITTER: f64 = 20.0;

/// Notes are tilted uniformly within ± this many degrees.
pub const NOTE_ROTATION_RANGE: f64 = 3.0;

/// Stamps are tilted uniformly within ± this many degrees.
pub const STAMP_ROTATION_RANGE: f64 = 15.0;

/// Minimum interval between two publishes of the viewer's own cursor.
pub const CURSOR_PUBLISH_INTERVAL_MS: i64 = 100;

// ── Drawing ─────────────────────────────────────────────────────

/// Note side length in world units.
pub const NOTE_SIZE: f64 = 240.0;

/// Size of the folded corner on a note.
pub const NOTE_FOLD: f64 = 20.0;

/// Spacing of the background dot grid in world units.
pub const GRID_SPACING: f64 = 40.0;

/// Grid dot radius in screen pixels.
pub const GRID_DOT_RADIUS_PX: f64 = 1.5;
