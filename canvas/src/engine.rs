//! Engine: wires store, cache, presence, motion and composer into one view.
//!
//! [`EngineCore`] holds all per-view logic and has no browser dependencies, so
//! it runs headless in the native client and under `cargo test`. [`Engine`]
//! adds the canvas element and paints through [`crate::render`].
//!
//! One view is single-threaded: input handlers and [`EngineCore::tick`] run on
//! the same thread, and snapshots reach the cache only when `tick` drains the
//! inbox. Rendering never waits on the store.

#[cfg(test)]
#[path = "engine_test.rs"]
mod engine_test;

use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, warn};
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{CanvasRenderingContext2d, HtmlCanvasElement};

use crate::cache::{CacheConfig, ChunkCache, Recompute};
use crate::camera::{Point, Viewport};
use crate::compose::{ComposeError, Composer, NoteDraft};
use crate::consts::CURSOR_PUBLISH_INTERVAL_MS;
use crate::doc::{Cursor, Note, Stamp};
use crate::motion::{MotionConfig, MotionController};
use crate::presence::Presence;
use crate::render::{self, Scene, SceneInput};
use crate::store::{CURSORS_ROOT, Inbox, Namespace, StoreAdapter};

/// What a primary click does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tool {
    /// Drag pans; double-click asks for a note.
    #[default]
    Pan,
    /// Click drops the selected emoji; drag does not pan.
    Stamp,
}

/// Mouse button identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Primary,
    /// Always pans, whatever the tool.
    Middle,
    Secondary,
}

/// Wheel / trackpad scroll delta.
#[derive(Debug, Clone, Copy)]
pub struct WheelDelta {
    pub dx: f64,
    /// Positive = down = zoom out.
    pub dy: f64,
}

/// Who is looking through this view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
    pub color: String,
}

/// Actions returned from input handlers for the host to process.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    RenderNeeded,
    /// Open the note composer for a note at this world point.
    ComposeNoteRequested { at: Point },
    NoteCreated(Note),
    StampCreated(Stamp),
    /// A creation was refused; the message is user-facing.
    Rejected(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EngineConfig {
    pub motion: MotionConfig,
    pub cache: CacheConfig,
}

/// Outcome of one [`EngineCore::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    pub moved: bool,
    pub recompute: Recompute,
    /// Snapshots drained from the inbox and applied.
    pub applied: usize,
    pub render: bool,
}

/// Core engine state: everything that doesn't depend on the canvas element.
pub struct EngineCore {
    store: Arc<dyn StoreAdapter>,
    inbox: Inbox,
    composer: Composer,
    rng: StdRng,
    participant: Participant,
    pub cache: ChunkCache,
    pub presence: Presence,
    pub motion: MotionController,
    pub viewport: Viewport,
    pub tool: Tool,
    pub stamp_emoji: String,
    pub viewport_width: f64,
    pub viewport_height: f64,
    pub dpr: f64,
    sized: bool,
    cursors_subscribed: bool,
    pointer: Option<Point>,
    last_cursor_publish: Option<i64>,
    preview: Option<Note>,
    needs_render: bool,
}

impl EngineCore {
    /// A view over `store`. `seed` drives note/stamp tilt and placement jitter.
    #[must_use]
    pub fn new(store: Arc<dyn StoreAdapter>, participant: Participant, config: EngineConfig, seed: u64) -> Self {
        let inbox = Inbox::new();
        let cache = ChunkCache::new(config.cache, inbox.sink());
        let mut core = Self {
            store,
            inbox,
            composer: Composer::new(),
            rng: StdRng::seed_from_u64(seed),
            participant,
            cache,
            presence: Presence::new(),
            motion: MotionController::new(config.motion),
            viewport: Viewport::default(),
            tool: Tool::default(),
            stamp_emoji: "❤️".to_owned(),
            viewport_width: 0.0,
            viewport_height: 0.0,
            dpr: 1.0,
            sized: false,
            cursors_subscribed: false,
            pointer: None,
            last_cursor_publish: None,
            preview: None,
            needs_render: true,
        };
        core.ensure_cursor_subscription();
        info!(participant = %core.participant.id, "engine: view created");
        core
    }

    #[must_use]
    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    fn ensure_cursor_subscription(&mut self) {
        if self.cursors_subscribed {
            return;
        }
        match self.store.subscribe(Namespace::Cursors, CURSORS_ROOT, self.inbox.sink()) {
            Ok(()) => self.cursors_subscribed = true,
            Err(e) => warn!(error = %e, "engine: cursor subscription failed; will retry"),
        }
    }

    // --- Viewport ---

    /// Update screen size. The first call centers the world origin.
    pub fn set_viewport(&mut self, width: f64, height: f64, dpr: f64) {
        self.viewport_width = width;
        self.viewport_height = height;
        self.dpr = dpr;
        if !self.sized {
            self.viewport = Viewport::centered(width, height);
            self.sized = true;
        }
        self.needs_render = true;
    }

    /// World point at the middle of the screen.
    #[must_use]
    pub fn world_center(&self) -> Point {
        self.viewport
            .screen_to_world(Point::new(self.viewport_width / 2.0, self.viewport_height / 2.0))
    }

    fn screen_center(&self) -> Point {
        Point::new(self.viewport_width / 2.0, self.viewport_height / 2.0)
    }

    pub fn zoom_in(&mut self) {
        let anchor = self.screen_center();
        self.motion.zoom_in(anchor, &mut self.viewport);
        self.needs_render = true;
    }

    pub fn zoom_out(&mut self) {
        let anchor = self.screen_center();
        self.motion.zoom_out(anchor, &mut self.viewport);
        self.needs_render = true;
    }

    pub fn reset_view(&mut self) {
        self.motion.reset(&mut self.viewport, self.viewport_width, self.viewport_height);
        self.needs_render = true;
    }

    // --- Tool ---

    pub fn set_tool(&mut self, tool: Tool) {
        self.tool = tool;
    }

    pub fn set_stamp_emoji(&mut self, emoji: impl Into<String>) {
        self.stamp_emoji = emoji.into();
    }

    // --- Input events ---

    pub fn on_pointer_down(&mut self, screen: Point, button: Button, now_ms: i64) -> Vec<Action> {
        self.pointer = Some(screen);
        match (button, self.tool) {
            (Button::Middle, _) | (Button::Primary, Tool::Pan) => {
                self.motion.pointer_down(screen);
                Vec::new()
            }
            (Button::Primary, Tool::Stamp) => {
                let at = self.viewport.screen_to_world(screen);
                let emoji = self.stamp_emoji.clone();
                let result = self
                    .composer
                    .stamp_at(self.store.as_ref(), &mut self.rng, &self.participant.id, &emoji, at, now_ms);
                created(result.map(Action::StampCreated)).into_iter().collect()
            }
            (Button::Secondary, _) => Vec::new(),
        }
    }

    pub fn on_pointer_move(&mut self, screen: Point, now_ms: i64) -> Vec<Action> {
        self.pointer = Some(screen);
        self.publish_cursor(now_ms);
        if self.motion.pointer_move(screen, &mut self.viewport) {
            vec![Action::RenderNeeded]
        } else {
            Vec::new()
        }
    }

    pub fn on_pointer_up(&mut self) {
        self.motion.pointer_up();
    }

    pub fn on_double_click(&mut self, screen: Point) -> Vec<Action> {
        if self.tool != Tool::Pan {
            return Vec::new();
        }
        vec![Action::ComposeNoteRequested { at: self.viewport.screen_to_world(screen) }]
    }

    pub fn on_wheel(&mut self, screen: Point, delta: WheelDelta) -> Vec<Action> {
        self.motion.wheel(screen, delta.dy, &mut self.viewport);
        vec![Action::RenderNeeded]
    }

    /// Key press by DOM `KeyboardEvent.code`. Returns whether it was consumed.
    pub fn on_key_down(&mut self, code: &str) -> bool {
        self.motion.key_down(code)
    }

    pub fn on_key_up(&mut self, code: &str) -> bool {
        self.motion.key_up(code)
    }

    pub fn on_blur(&mut self) {
        self.motion.release_keys();
        self.motion.pointer_up();
    }

    // --- Notes ---

    /// Show a translucent note where the draft would land.
    pub fn set_preview(&mut self, draft: Option<&NoteDraft>) {
        self.preview = draft.map(|d| {
            let at = d.at.unwrap_or_else(|| self.world_center());
            Note {
                id: "preview".to_owned(),
                x: at.x,
                y: at.y,
                text: d.text.clone(),
                color: d.color,
                rotation: 0.0,
                timestamp: 0,
                author_id: self.participant.id.clone(),
            }
        });
        self.needs_render = true;
    }

    /// Create a note from a finished draft. `None` when the store refused the write.
    pub fn submit_note(&mut self, draft: &NoteDraft, now_ms: i64) -> Option<Action> {
        let center = self.world_center();
        let result =
            self.composer
                .note_at(self.store.as_ref(), &mut self.rng, &self.participant.id, draft, center, now_ms);
        if result.is_ok() {
            self.preview = None;
            self.needs_render = true;
        }
        created(result.map(Action::NoteCreated))
    }

    /// Publish our pointer's world position, at most once per interval.
    fn publish_cursor(&mut self, now_ms: i64) {
        let Some(screen) = self.pointer else {
            return;
        };
        if self
            .last_cursor_publish
            .is_some_and(|last| now_ms - last < CURSOR_PUBLISH_INTERVAL_MS)
        {
            return;
        }
        self.last_cursor_publish = Some(now_ms);

        let at = self.viewport.screen_to_world(screen);
        let cursor = Cursor {
            id: self.participant.id.clone(),
            x: at.x,
            y: at.y,
            color: self.participant.color.clone(),
            last_update: now_ms,
        };
        let record = match serde_json::to_value(&cursor) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "engine: cursor encode failed");
                return;
            }
        };
        if let Err(e) = self.store.set_latest(Namespace::Cursors, &cursor.id, record) {
            debug!(error = %e, "engine: cursor publish failed");
        }
    }

    // --- Frame ---

    /// Advance one frame: motion, subscription diff, snapshot delivery.
    pub fn tick(&mut self, now_ms: i64) -> TickStats {
        let moved = self.motion.tick(&mut self.viewport);
        if moved {
            self.publish_cursor(now_ms);
        }
        self.ensure_cursor_subscription();

        let recompute =
            self.cache
                .recompute(self.store.as_ref(), &self.viewport, self.viewport_width, self.viewport_height);

        let mut applied = 0;
        for snapshot in self.inbox.drain() {
            let used = match snapshot.namespace {
                Namespace::Cursors => self.presence.apply(&snapshot),
                Namespace::Notes | Namespace::Stamps => self.cache.apply(&snapshot),
            };
            if used {
                applied += 1;
            }
        }

        // Cursors age out on their own, so any visible cursor keeps frames coming.
        let cursors_live = self.presence.others(&self.participant.id, now_ms).next().is_some();
        let dirty = self.cache.take_dirty();
        let render = std::mem::take(&mut self.needs_render) || moved || dirty || applied > 0 || cursors_live;
        TickStats { moved, recompute, applied, render }
    }

    /// Everything to paint this frame.
    #[must_use]
    pub fn scene(&self, now_ms: i64) -> Scene<'_> {
        let input = SceneInput {
            viewport: self.viewport,
            width: self.viewport_width,
            height: self.viewport_height,
            participant: &self.participant.id,
            now_ms,
        };
        render::build_scene(&self.cache, &self.presence, self.preview.as_ref(), input)
    }
}

/// Fold a creation result into an action. Write failures were already logged
/// and fail silently.
fn created(result: Result<Action, ComposeError>) -> Option<Action> {
    match result {
        Ok(action) => Some(action),
        Err(ComposeError::Write(_)) => None,
        Err(e) => Some(Action::Rejected(e.to_string())),
    }
}

/// The full canvas engine. Wraps `EngineCore` and owns the browser canvas element.
pub struct Engine {
    canvas: HtmlCanvasElement,
    pub core: EngineCore,
}

impl Engine {
    /// Create a new engine bound to the given canvas element.
    #[must_use]
    pub fn new(canvas: HtmlCanvasElement, core: EngineCore) -> Self {
        Self { canvas, core }
    }

    /// Resize the backing store to the CSS size times `dpr`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn set_viewport(&mut self, width_css: f64, height_css: f64, dpr: f64) {
        self.canvas.set_width((width_css * dpr).round().max(0.0) as u32);
        self.canvas.set_height((height_css * dpr).round().max(0.0) as u32);
        self.core.set_viewport(width_css, height_css, dpr);
    }

    /// Advance one frame and repaint if anything changed.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the 2D context is unavailable or a draw call fails.
    pub fn frame(&mut self, now_ms: i64) -> Result<TickStats, JsValue> {
        let stats = self.core.tick(now_ms);
        if stats.render {
            self.render(now_ms)?;
        }
        Ok(stats)
    }

    /// Draw the current state to the canvas.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the 2D context is unavailable or a draw call fails.
    pub fn render(&self, now_ms: i64) -> Result<(), JsValue> {
        let Some(ctx) = self.canvas.get_context("2d")? else {
            return Err(JsValue::from_str("2d context unavailable"));
        };
        let ctx: CanvasRenderingContext2d = ctx.dyn_into()?;
        render::paint(&ctx, &self.core.scene(now_ms), self.core.dpr)
    }
}
