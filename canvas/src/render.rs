//! Rendering: builds the per-frame scene and paints it to a 2D context.
//!
//! [`build_scene`] is pure: it picks what is visible from the cache and the
//! presence set and fixes the paint order. [`paint`] is the only code that
//! touches [`web_sys::CanvasRenderingContext2d`]; it reads the scene and
//! produces pixels without mutating any application state.
//!
//! Paint order, bottom to top: dot grid, stamps, notes, preview note, cursors.
//!
//! All fallible `Canvas2D` calls propagate errors via `Result<(), JsValue>`.
//! The top-level caller ([`crate::engine::Engine::render`]) handles the result.

#[cfg(test)]
#[path = "render_test.rs"]
mod render_test;

use std::f64::consts::PI;

use wasm_bindgen::JsValue;
use web_sys::CanvasRenderingContext2d;

use crate::cache::ChunkCache;
use crate::camera::{Point, Rect, Viewport};
use crate::chunk::{ChunkRange, chunk_bounds};
use crate::consts::{GRID_DOT_RADIUS_PX, GRID_SPACING, NOTE_FOLD, NOTE_SIZE, RENDER_CHUNK_MARGIN};
use crate::doc::{Cursor, Note, Stamp};
use crate::presence::Presence;

const BACKGROUND: &str = "#f8fafc";
const GRID_COLOR: &str = "#cbd5e1";
const NOTE_FONT: &str = "30px Caveat, cursive";
const NOTE_TEXT_COLOR: &str = "#1e293b";
const NOTE_PADDING: f64 = 20.0;
const NOTE_LINE_HEIGHT: f64 = 36.0;
const STAMP_FONT: &str = "40px sans-serif";
const PREVIEW_ALPHA: f64 = 0.8;
const PREVIEW_OUTLINE: &str = "#64748b";
const LABEL_FONT: &str = "12px sans-serif";
/// Below this on-screen dot spacing the grid is skipped.
const GRID_MIN_SCREEN_SPACING: f64 = 8.0;

/// Cursor arrow outline in screen pixels, tip at the origin.
const CURSOR_ARROW: [(f64, f64); 7] =
    [(0.0, 0.0), (8.0, 24.0), (12.0, 18.0), (22.0, 28.0), (26.0, 24.0), (16.0, 14.0), (24.0, 12.0)];

/// Everything one frame paints, in paint order.
#[derive(Debug)]
pub struct Scene<'a> {
    pub viewport: Viewport,
    pub width: f64,
    pub height: f64,
    /// World rect on screen, used for the grid.
    pub visible: Rect,
    /// Chunks whose records are painted.
    pub chunks: ChunkRange,
    pub stamps: Vec<&'a Stamp>,
    pub notes: Vec<&'a Note>,
    pub preview: Option<&'a Note>,
    pub cursors: Vec<&'a Cursor>,
}

/// Inputs to [`build_scene`] beyond the cache and presence.
#[derive(Debug, Clone, Copy)]
pub struct SceneInput<'a> {
    pub viewport: Viewport,
    pub width: f64,
    pub height: f64,
    /// The viewer's participant id; its own cursor is not painted.
    pub participant: &'a str,
    pub now_ms: i64,
}

/// Collect the visible records. Only chunks within one chunk of the visible
/// range are considered, whatever else the cache holds.
#[must_use]
pub fn build_scene<'a>(
    cache: &'a ChunkCache,
    presence: &'a Presence,
    preview: Option<&'a Note>,
    frame: SceneInput<'a>,
) -> Scene<'a> {
    let visible = frame.viewport.visible_rect(frame.width, frame.height);
    let chunks = chunk_bounds(visible, 0.0).grow(RENDER_CHUNK_MARGIN);

    let mut stamps = Vec::new();
    let mut notes = Vec::new();
    for key in chunks.keys() {
        stamps.extend(cache.stamps(key).unwrap_or_default());
        notes.extend(cache.notes(key).unwrap_or_default());
    }

    let mut cursors: Vec<&Cursor> = presence.others(frame.participant, frame.now_ms).collect();
    cursors.sort_by(|a, b| a.id.cmp(&b.id));

    Scene {
        viewport: frame.viewport,
        width: frame.width,
        height: frame.height,
        visible,
        chunks,
        stamps,
        notes,
        preview,
        cursors,
    }
}

/// World coordinates of the grid dots covering `visible`.
pub fn grid_points(visible: Rect) -> impl Iterator<Item = (f64, f64)> {
    let start_x = (visible.left / GRID_SPACING).floor() * GRID_SPACING;
    let start_y = (visible.top / GRID_SPACING).floor() * GRID_SPACING;
    let cols = steps(start_x, visible.right);
    let rows = steps(start_y, visible.bottom);
    (0..rows).flat_map(move |row| {
        (0..cols).map(move |col| (start_x + f64::from(col) * GRID_SPACING, start_y + f64::from(row) * GRID_SPACING))
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn steps(start: f64, end: f64) -> u32 {
    let n = ((end - start) / GRID_SPACING).floor() + 1.0;
    if n.is_finite() && n > 0.0 { n.min(f64::from(u32::MAX)) as u32 } else { 0 }
}

/// Greedy word wrap. `measure` returns the drawn width of a candidate line.
///
/// # Errors
///
/// Propagates the first error from `measure`.
pub fn wrap_text<E>(text: &str, max_width: f64, mut measure: impl FnMut(&str) -> Result<f64, E>) -> Result<Vec<String>, E> {
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if line.is_empty() { word.to_owned() } else { format!("{line} {word}") };
            if !line.is_empty() && measure(&candidate)? > max_width {
                lines.push(std::mem::replace(&mut line, word.to_owned()));
            } else {
                line = candidate;
            }
        }
        lines.push(line);
    }
    Ok(lines)
}

// =============================================================
// Painting
// =============================================================

/// Paint a scene. `dpr` is the device pixel ratio.
///
/// # Errors
///
/// Returns `Err` if any `Canvas2D` call fails (e.g. invalid context state).
pub fn paint(ctx: &CanvasRenderingContext2d, scene: &Scene<'_>, dpr: f64) -> Result<(), JsValue> {
    let vp = scene.viewport;

    // Layer 1: clear in screen space.
    ctx.set_transform(dpr, 0.0, 0.0, dpr, 0.0, 0.0)?;
    ctx.set_fill_style_str(BACKGROUND);
    ctx.fill_rect(0.0, 0.0, scene.width, scene.height);

    // Layer 2: world content.
    ctx.save();
    ctx.translate(vp.x, vp.y)?;
    ctx.scale(vp.scale, vp.scale)?;

    draw_grid(ctx, scene.visible, vp.scale)?;
    for stamp in &scene.stamps {
        draw_stamp(ctx, stamp)?;
    }
    for note in &scene.notes {
        draw_note(ctx, note)?;
    }
    if let Some(preview) = scene.preview {
        ctx.set_global_alpha(PREVIEW_ALPHA);
        draw_note(ctx, preview)?;
        ctx.set_global_alpha(1.0);
        draw_preview_outline(ctx, preview, vp.scale)?;
    }
    ctx.restore();

    // Layer 3: cursors at constant screen size.
    for cursor in &scene.cursors {
        let at = vp.world_to_screen(Point::new(cursor.x, cursor.y));
        draw_cursor(ctx, cursor, at.x, at.y)?;
    }

    Ok(())
}

fn draw_grid(ctx: &CanvasRenderingContext2d, visible: Rect, scale: f64) -> Result<(), JsValue> {
    if GRID_SPACING * scale < GRID_MIN_SCREEN_SPACING {
        return Ok(());
    }
    let radius = GRID_DOT_RADIUS_PX / scale;
    ctx.set_fill_style_str(GRID_COLOR);
    ctx.begin_path();
    for (x, y) in grid_points(visible) {
        ctx.move_to(x + radius, y);
        ctx.arc(x, y, radius, 0.0, 2.0 * PI)?;
    }
    ctx.fill();
    Ok(())
}

fn draw_stamp(ctx: &CanvasRenderingContext2d, stamp: &Stamp) -> Result<(), JsValue> {
    ctx.save();
    ctx.translate(stamp.x, stamp.y)?;
    ctx.rotate(stamp.rotation.to_radians())?;
    ctx.set_font(STAMP_FONT);
    ctx.set_text_align("center");
    ctx.set_text_baseline("middle");
    ctx.fill_text(&stamp.emoji, 0.0, 0.0)?;
    ctx.restore();
    Ok(())
}

fn draw_note(ctx: &CanvasRenderingContext2d, note: &Note) -> Result<(), JsValue> {
    let half = NOTE_SIZE / 2.0;
    ctx.save();
    ctx.translate(note.x, note.y)?;
    ctx.rotate(note.rotation.to_radians())?;

    // Body with the bottom-right corner folded.
    ctx.set_shadow_color("rgba(0, 0, 0, 0.15)");
    ctx.set_shadow_blur(8.0);
    ctx.set_shadow_offset_y(4.0);
    ctx.set_fill_style_str(note.color.hex());
    ctx.begin_path();
    ctx.move_to(-half, -half);
    ctx.line_to(half, -half);
    ctx.line_to(half, half - NOTE_FOLD);
    ctx.line_to(half - NOTE_FOLD, half);
    ctx.line_to(-half, half);
    ctx.close_path();
    ctx.fill();
    ctx.set_shadow_color("transparent");

    ctx.set_fill_style_str("rgba(0, 0, 0, 0.1)");
    ctx.begin_path();
    ctx.move_to(half, half - NOTE_FOLD);
    ctx.line_to(half - NOTE_FOLD, half - NOTE_FOLD);
    ctx.line_to(half - NOTE_FOLD, half);
    ctx.close_path();
    ctx.fill();

    ctx.set_fill_style_str(NOTE_TEXT_COLOR);
    ctx.set_font(NOTE_FONT);
    ctx.set_text_align("left");
    ctx.set_text_baseline("top");
    let max_width = NOTE_SIZE - 2.0 * NOTE_PADDING;
    let lines = wrap_text(&note.text, max_width, |line| ctx.measure_text(line).map(|m| m.width()))?;
    let mut y = -half + NOTE_PADDING;
    for line in lines {
        if y + NOTE_LINE_HEIGHT > half {
            break;
        }
        ctx.fill_text(&line, -half + NOTE_PADDING, y)?;
        y += NOTE_LINE_HEIGHT;
    }

    ctx.restore();
    Ok(())
}

/// Dashed frame around the draft note, kept at a constant on-screen width.
fn draw_preview_outline(ctx: &CanvasRenderingContext2d, note: &Note, scale: f64) -> Result<(), JsValue> {
    let half = NOTE_SIZE / 2.0 + 6.0 / scale;
    ctx.save();
    ctx.translate(note.x, note.y)?;
    ctx.rotate(note.rotation.to_radians())?;

    let dash = js_sys::Array::new();
    dash.push(&JsValue::from_f64(6.0 / scale));
    dash.push(&JsValue::from_f64(4.0 / scale));
    ctx.set_line_dash(&dash)?;
    ctx.set_stroke_style_str(PREVIEW_OUTLINE);
    ctx.set_line_width(1.5 / scale);
    ctx.stroke_rect(-half, -half, 2.0 * half, 2.0 * half);
    ctx.set_line_dash(&js_sys::Array::new())?;

    ctx.restore();
    Ok(())
}

fn draw_cursor(ctx: &CanvasRenderingContext2d, cursor: &Cursor, x: f64, y: f64) -> Result<(), JsValue> {
    ctx.save();
    ctx.translate(x, y)?;

    ctx.begin_path();
    for (i, (px, py)) in CURSOR_ARROW.iter().enumerate() {
        if i == 0 {
            ctx.move_to(*px, *py);
        } else {
            ctx.line_to(*px, *py);
        }
    }
    ctx.close_path();
    ctx.set_fill_style_str(&cursor.color);
    ctx.fill();
    ctx.set_stroke_style_str("#ffffff");
    ctx.set_line_width(1.5);
    ctx.stroke();

    let label: String = cursor.id.chars().take(6).collect();
    ctx.set_font(LABEL_FONT);
    ctx.set_text_align("left");
    ctx.set_text_baseline("top");
    ctx.set_fill_style_str(&cursor.color);
    ctx.fill_text(&label, 14.0, 30.0)?;

    ctx.restore();
    Ok(())
}
