//! Viewport motion controller: drag with inertia, keyboard pan, anchored zoom.
//!
//! DESIGN
//! ======
//! Every input modality mutates one shared [`Viewport`] in place; whichever
//! writes last in a frame wins. The controller itself only keeps gesture
//! state between events:
//!
//! ```text
//! Idle ──pointer_down──▶ Dragging ──pointer_up──▶ Inertial ──tick*──▶ Idle
//!                                  └─(slow)──────────────────────────▶ Idle
//! ```
//!
//! Held direction keys start a key loop that pans on every [`MotionController::tick`]
//! until the last key is released. Diagonals add both deltas unnormalized.
//! Wheel zoom, zoom buttons, reset and key panning all cancel inertia.

#[cfg(test)]
#[path = "motion_test.rs"]
mod motion_test;

use std::collections::HashSet;

use crate::camera::{Point, Viewport};
use crate::consts::{FRICTION, KEY_PAN_SPEED, MAX_SCALE, MIN_SCALE, STOP_THRESHOLD, ZOOM_INTENSITY, ZOOM_STEP};

/// Tunables for [`MotionController`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionConfig {
    pub friction: f64,
    pub stop_threshold: f64,
    pub key_pan_speed: f64,
    pub zoom_intensity: f64,
    pub zoom_step: f64,
    pub min_scale: f64,
    pub max_scale: f64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            friction: FRICTION,
            stop_threshold: STOP_THRESHOLD,
            key_pan_speed: KEY_PAN_SPEED,
            zoom_intensity: ZOOM_INTENSITY,
            zoom_step: ZOOM_STEP,
            min_scale: MIN_SCALE,
            max_scale: MAX_SCALE,
        }
    }
}

impl MotionConfig {
    #[must_use]
    pub fn clamp_scale(&self, scale: f64) -> f64 {
        if scale.is_nan() {
            return 1.0_f64.clamp(self.min_scale, self.max_scale);
        }
        scale.clamp(self.min_scale, self.max_scale)
    }
}

/// Pointer gesture state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum DragState {
    #[default]
    Idle,
    Dragging {
        /// Screen position of the previous pointer event.
        last: Point,
    },
    /// Coasting on the release velocity.
    Inertial,
}

/// A direction key. Arrow keys and WASD map to the same four directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PanKey {
    Up,
    Down,
    Left,
    Right,
}

impl PanKey {
    /// Map a DOM `KeyboardEvent.code` to a direction.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "ArrowUp" | "KeyW" => Some(Self::Up),
            "ArrowDown" | "KeyS" => Some(Self::Down),
            "ArrowLeft" | "KeyA" => Some(Self::Left),
            "ArrowRight" | "KeyD" => Some(Self::Right),
            _ => None,
        }
    }

    /// Offset applied to the viewport per tick. Up moves the world down.
    fn delta(self, speed: f64) -> Point {
        match self {
            Self::Up => Point::new(0.0, speed),
            Self::Down => Point::new(0.0, -speed),
            Self::Left => Point::new(speed, 0.0),
            Self::Right => Point::new(-speed, 0.0),
        }
    }
}

/// Running key-pan loop. Present only while at least one direction is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyLoop {
    pub ticks: u64,
}

#[derive(Debug, Default)]
pub struct MotionController {
    config: MotionConfig,
    state: DragState,
    velocity: Point,
    held: HashSet<PanKey>,
    key_loop: Option<KeyLoop>,
}

impl MotionController {
    #[must_use]
    pub fn new(config: MotionConfig) -> Self {
        Self { config, ..Self::default() }
    }

    #[must_use]
    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> DragState {
        self.state
    }

    #[must_use]
    pub fn velocity(&self) -> Point {
        self.velocity
    }

    #[must_use]
    pub fn key_loop(&self) -> Option<KeyLoop> {
        self.key_loop
    }

    /// Whether the next tick may move the viewport.
    #[must_use]
    pub fn is_animating(&self) -> bool {
        self.key_loop.is_some() || self.state == DragState::Inertial
    }

    fn cancel_inertia(&mut self) {
        if self.state == DragState::Inertial {
            self.state = DragState::Idle;
        }
        self.velocity = Point::default();
    }

    // --- Drag ---

    pub fn pointer_down(&mut self, screen: Point) {
        self.velocity = Point::default();
        self.state = DragState::Dragging { last: screen };
    }

    /// Apply the pointer delta while dragging. Returns whether the viewport moved.
    pub fn pointer_move(&mut self, screen: Point, viewport: &mut Viewport) -> bool {
        let DragState::Dragging { last } = self.state else {
            return false;
        };
        let delta = Point::new(screen.x - last.x, screen.y - last.y);
        viewport.x += delta.x;
        viewport.y += delta.y;
        self.velocity = delta;
        self.state = DragState::Dragging { last: screen };
        true
    }

    pub fn pointer_up(&mut self) {
        if !matches!(self.state, DragState::Dragging { .. }) {
            return;
        }
        let threshold = self.config.stop_threshold;
        if self.velocity.x.abs() > threshold || self.velocity.y.abs() > threshold {
            self.state = DragState::Inertial;
        } else {
            self.state = DragState::Idle;
            self.velocity = Point::default();
        }
    }

    // --- Keys ---

    /// Press a key by DOM code. Returns whether it is a pan key.
    pub fn key_down(&mut self, code: &str) -> bool {
        let Some(key) = PanKey::from_code(code) else {
            return false;
        };
        self.held.insert(key);
        if self.key_loop.is_none() {
            self.key_loop = Some(KeyLoop::default());
        }
        true
    }

    /// Release a key by DOM code. The key loop stops with the last release.
    pub fn key_up(&mut self, code: &str) -> bool {
        let Some(key) = PanKey::from_code(code) else {
            return false;
        };
        self.held.remove(&key);
        if self.held.is_empty() {
            self.key_loop = None;
        }
        true
    }

    /// Forget every held key, e.g. when the window loses focus.
    pub fn release_keys(&mut self) {
        self.held.clear();
        self.key_loop = None;
    }

    // --- Zoom ---

    /// Wheel zoom anchored at `pointer`. Positive `delta_y` zooms out.
    pub fn wheel(&mut self, pointer: Point, delta_y: f64, viewport: &mut Viewport) {
        let scale = self.config.clamp_scale(viewport.scale + delta_y * -self.config.zoom_intensity);
        viewport.zoom_at(pointer, scale);
        self.cancel_inertia();
    }

    /// Multiply the scale by `zoom_step` around `anchor`.
    pub fn zoom_in(&mut self, anchor: Point, viewport: &mut Viewport) {
        self.zoom_by(self.config.zoom_step, anchor, viewport);
    }

    /// Divide the scale by `zoom_step` around `anchor`.
    pub fn zoom_out(&mut self, anchor: Point, viewport: &mut Viewport) {
        self.zoom_by(1.0 / self.config.zoom_step, anchor, viewport);
    }

    fn zoom_by(&mut self, factor: f64, anchor: Point, viewport: &mut Viewport) {
        let scale = self.config.clamp_scale(viewport.scale * factor);
        viewport.zoom_at(anchor, scale);
        self.cancel_inertia();
    }

    /// Recenter the world origin on a `width` x `height` screen at scale 1.
    pub fn reset(&mut self, viewport: &mut Viewport, width: f64, height: f64) {
        *viewport = Viewport::centered(width, height);
        self.cancel_inertia();
    }

    // --- Frame ---

    /// Advance one frame. Returns whether the viewport moved.
    pub fn tick(&mut self, viewport: &mut Viewport) -> bool {
        let mut moved = false;

        if let Some(key_loop) = self.key_loop.as_mut() {
            key_loop.ticks += 1;
            let speed = self.config.key_pan_speed;
            let (dx, dy) = self
                .held
                .iter()
                .map(|k| k.delta(speed))
                .fold((0.0, 0.0), |(x, y), d| (x + d.x, y + d.y));
            viewport.x += dx;
            viewport.y += dy;
            moved = dx.abs() > 0.0 || dy.abs() > 0.0;
            self.cancel_inertia();
        }

        if self.state == DragState::Inertial {
            self.velocity.x *= self.config.friction;
            self.velocity.y *= self.config.friction;
            let threshold = self.config.stop_threshold;
            if self.velocity.x.abs() < threshold && self.velocity.y.abs() < threshold {
                self.velocity = Point::default();
                self.state = DragState::Idle;
            } else {
                viewport.x += self.velocity.x;
                viewport.y += self.velocity.y;
                moved = true;
            }
        }

        moved
    }
}
