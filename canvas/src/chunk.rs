//! Spatial key codec: world coordinates to chunk keys and back.
//!
//! The plane is cut into square cells of [`CHUNK_SIZE`] world units. A cell is
//! addressed by `(cx, cy) = (floor(x / S), floor(y / S))`, so points on a cell
//! boundary belong to the upper cell and negative coordinates round toward
//! negative infinity. Every function here is total: NaN maps to cell 0 and
//! infinities saturate to the `i64` extremes.
//!
//! The text form `"<cx>_<cy>"` is the store path segment for a chunk.

#[cfg(test)]
#[path = "chunk_test.rs"]
mod chunk_test;

use std::fmt;
use std::str::FromStr;

use crate::camera::{Point, Rect};
use crate::consts::CHUNK_SIZE;

/// Integer address of one chunk cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
    pub cx: i64,
    pub cy: i64,
}

impl ChunkKey {
    #[must_use]
    pub fn new(cx: i64, cy: i64) -> Self {
        Self { cx, cy }
    }

    /// World-space origin (top-left corner) of this chunk.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn origin(&self) -> Point {
        Point::new(self.cx as f64 * CHUNK_SIZE, self.cy as f64 * CHUNK_SIZE)
    }
}

/// The chunk containing `point`.
#[must_use]
pub fn chunk_key_of(point: Point) -> ChunkKey {
    ChunkKey { cx: cell(point.x), cy: cell(point.y) }
}

/// Inclusive chunk index range covering `rect` grown by `buffer` world units.
#[must_use]
pub fn chunk_bounds(rect: Rect, buffer: f64) -> ChunkRange {
    let grown = rect.expand(buffer);
    ChunkRange {
        min_cx: cell(grown.left),
        max_cx: cell(grown.right),
        min_cy: cell(grown.top),
        max_cy: cell(grown.bottom),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn cell(v: f64) -> i64 {
    let c = (v / CHUNK_SIZE).floor();
    if c.is_nan() {
        return 0;
    }
    // `as` saturates at the i64 bounds for out-of-range and infinite values.
    c as i64
}

// =============================================================================
// RANGE
// =============================================================================

/// Inclusive rectangle of chunk keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub min_cx: i64,
    pub max_cx: i64,
    pub min_cy: i64,
    pub max_cy: i64,
}

impl ChunkRange {
    #[must_use]
    pub fn contains(&self, key: ChunkKey) -> bool {
        (self.min_cx..=self.max_cx).contains(&key.cx) && (self.min_cy..=self.max_cy).contains(&key.cy)
    }

    /// Number of keys in the range, saturating on overflow.
    #[must_use]
    pub fn len(&self) -> u64 {
        span(self.min_cx, self.max_cx).saturating_mul(span(self.min_cy, self.max_cy))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grow the range by `margin` chunks on every side.
    #[must_use]
    pub fn grow(self, margin: i64) -> Self {
        Self {
            min_cx: self.min_cx.saturating_sub(margin),
            max_cx: self.max_cx.saturating_add(margin),
            min_cy: self.min_cy.saturating_sub(margin),
            max_cy: self.max_cy.saturating_add(margin),
        }
    }

    /// Every key in the range, row by row.
    pub fn keys(&self) -> impl Iterator<Item = ChunkKey> + use<> {
        let (min_cx, max_cx) = (self.min_cx, self.max_cx);
        (self.min_cy..=self.max_cy).flat_map(move |cy| (min_cx..=max_cx).map(move |cx| ChunkKey { cx, cy }))
    }
}

fn span(min: i64, max: i64) -> u64 {
    if max < min {
        return 0;
    }
    max.abs_diff(min).saturating_add(1)
}

// =============================================================================
// TEXT FORM
// =============================================================================

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.cx, self.cy)
    }
}

/// Error returned when a chunk key's text form cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid chunk key: {0:?}")]
pub struct ChunkKeyParseError(pub String);

impl FromStr for ChunkKey {
    type Err = ChunkKeyParseError;

    /// Parse `"<cx>_<cy>"`, e.g. `"-1_-2"` is `(-1, -2)`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ChunkKeyParseError(s.to_owned());
        let (cx, cy) = s.split_once('_').ok_or_else(invalid)?;
        let cx = cx.parse::<i64>().map_err(|_| invalid())?;
        let cy = cy.parse::<i64>().map_err(|_| invalid())?;
        Ok(Self { cx, cy })
    }
}
