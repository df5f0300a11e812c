//! Viewport state and screen/world coordinate conversions.
//!
//! `Viewport.x` / `Viewport.y` are the screen position of the world origin in
//! CSS pixels; `scale` multiplies world units into screen pixels.

#[cfg(test)]
#[path = "camera_test.rs"]
mod camera_test;

/// A point in either screen or world space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle in world units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Rect {
    /// Grow the rect by `by` on every side.
    #[must_use]
    pub fn expand(self, by: f64) -> Self {
        Self {
            left: self.left - by,
            top: self.top - by,
            right: self.right + by,
            bottom: self.bottom + by,
        }
    }

    #[must_use]
    pub fn center(&self) -> Point {
        Point::new((self.left + self.right) * 0.5, (self.top + self.bottom) * 0.5)
    }
}

/// Pan/zoom state shared by every input modality.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub scale: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, scale: 1.0 }
    }
}

impl Viewport {
    /// World origin at the center of a `width` x `height` screen, scale 1.
    #[must_use]
    pub fn centered(width: f64, height: f64) -> Self {
        Self { x: width / 2.0, y: height / 2.0, scale: 1.0 }
    }

    /// Convert a screen-space point (CSS pixels) to world coordinates.
    #[must_use]
    pub fn screen_to_world(&self, screen: Point) -> Point {
        Point {
            x: (screen.x - self.x) / self.scale,
            y: (screen.y - self.y) / self.scale,
        }
    }

    /// Convert a world-space point to screen coordinates (CSS pixels).
    #[must_use]
    pub fn world_to_screen(&self, world: Point) -> Point {
        Point {
            x: world.x * self.scale + self.x,
            y: world.y * self.scale + self.y,
        }
    }

    /// The world-space rect covered by a `width` x `height` screen.
    #[must_use]
    pub fn visible_rect(&self, width: f64, height: f64) -> Rect {
        Rect {
            left: -self.x / self.scale,
            top: -self.y / self.scale,
            right: (width - self.x) / self.scale,
            bottom: (height - self.y) / self.scale,
        }
    }

    /// Set a new scale while keeping the world point under `anchor` fixed on screen.
    pub fn zoom_at(&mut self, anchor: Point, new_scale: f64) {
        let world = self.screen_to_world(anchor);
        self.scale = new_scale;
        self.x = anchor.x - world.x * new_scale;
        self.y = anchor.y - world.y * new_scale;
    }
}
