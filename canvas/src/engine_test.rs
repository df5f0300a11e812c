#![allow(clippy::float_cmp)]

use std::sync::Mutex;

use serde_json::Value;

use super::*;
use crate::chunk::ChunkKey;
use crate::doc::NoteColor;
use crate::store::{LocalStore, SnapshotSink, SubscriptionError, WriteError};

const T0: i64 = 1_700_000_000_000;

fn participant(id: &str) -> Participant {
    Participant { id: id.to_owned(), color: "#60a5fa".to_owned() }
}

fn engine_on(store: &LocalStore, id: &str) -> EngineCore {
    let mut core = EngineCore::new(Arc::new(store.open_view()), participant(id), EngineConfig::default(), 7);
    core.set_viewport(800.0, 600.0, 1.0);
    core
}

fn draft(text: &str) -> NoteDraft {
    NoteDraft { text: text.to_owned(), color: NoteColor::Yellow, at: Some(Point::new(10.0, 20.0)) }
}

/// Refuses everything until healed.
#[derive(Default)]
struct FlakyStore {
    healed: Mutex<bool>,
    cursor_subscribes: Mutex<usize>,
}

impl FlakyStore {
    fn heal(&self) {
        *self.healed.lock().expect("lock") = true;
    }

    fn online(&self) -> bool {
        *self.healed.lock().expect("lock")
    }
}

impl StoreAdapter for FlakyStore {
    fn subscribe(&self, namespace: Namespace, _key: &str, _sink: SnapshotSink) -> Result<(), SubscriptionError> {
        if namespace == Namespace::Cursors {
            *self.cursor_subscribes.lock().expect("lock") += 1;
        }
        if self.online() { Ok(()) } else { Err(SubscriptionError::Unreachable("offline".into())) }
    }

    fn unsubscribe(&self, _namespace: Namespace, _key: &str) -> Result<(), SubscriptionError> {
        Ok(())
    }

    fn append(&self, _namespace: Namespace, _key: &str, _record: Value) -> Result<(), WriteError> {
        if self.online() { Ok(()) } else { Err(WriteError::Unreachable("offline".into())) }
    }

    fn set_latest(&self, _namespace: Namespace, _key: &str, _record: Value) -> Result<(), WriteError> {
        if self.online() { Ok(()) } else { Err(WriteError::Unreachable("offline".into())) }
    }
}

// =============================================================================
// VIEWPORT
// =============================================================================

#[test]
fn first_resize_centers_world_origin() {
    let store = LocalStore::in_memory();
    let core = engine_on(&store, "a");
    assert_eq!(core.viewport, Viewport { x: 400.0, y: 300.0, scale: 1.0 });
    assert_eq!(core.world_center(), Point::new(0.0, 0.0));
}

#[test]
fn later_resize_keeps_pan() {
    let store = LocalStore::in_memory();
    let mut core = engine_on(&store, "a");
    core.viewport.x = 10.0;
    core.set_viewport(1024.0, 768.0, 2.0);
    assert_eq!(core.viewport.x, 10.0);
    assert_eq!(core.dpr, 2.0);
}

#[test]
fn zoom_buttons_anchor_on_screen_center() {
    let store = LocalStore::in_memory();
    let mut core = engine_on(&store, "a");
    core.zoom_in();
    assert!((core.viewport.scale - 1.2).abs() < 1e-9);
    assert!(core.world_center().x.abs() < 1e-9);
    core.zoom_out();
    assert!((core.viewport.scale - 1.0).abs() < 1e-9);
}

#[test]
fn reset_view_restores_origin_and_scale() {
    let store = LocalStore::in_memory();
    let mut core = engine_on(&store, "a");
    core.on_wheel(Point::new(100.0, 100.0), WheelDelta { dx: 0.0, dy: -200.0 });
    assert!(core.viewport.scale > 1.0);
    core.reset_view();
    assert_eq!(core.viewport, Viewport::centered(800.0, 600.0));
}

// =============================================================================
// TICK
// =============================================================================

#[test]
fn first_tick_subscribes_visible_chunks_and_renders() {
    let store = LocalStore::in_memory();
    let mut core = engine_on(&store, "a");

    let stats = core.tick(T0);
    assert!(matches!(stats.recompute, Recompute::Updated { failed: 0, .. }));
    assert!(stats.render);
    assert!(core.cache.is_subscribed(ChunkKey::new(0, 0)));
    assert!(core.cache.is_subscribed(ChunkKey::new(-1, -1)));
}

#[test]
fn idle_tick_neither_recomputes_nor_renders() {
    let store = LocalStore::in_memory();
    let mut core = engine_on(&store, "a");
    core.tick(T0);

    let stats = core.tick(T0 + 16);
    assert_eq!(stats.recompute, Recompute::Unchanged);
    assert_eq!(stats.applied, 0);
    assert!(!stats.render);
}

#[test]
fn cursor_subscription_is_retried_on_tick() {
    let store = Arc::new(FlakyStore::default());
    let mut core = EngineCore::new(store.clone(), participant("a"), EngineConfig::default(), 1);
    core.set_viewport(800.0, 600.0, 1.0);
    assert_eq!(*store.cursor_subscribes.lock().expect("lock"), 1);

    core.tick(T0);
    assert_eq!(*store.cursor_subscribes.lock().expect("lock"), 2);

    store.heal();
    core.tick(T0 + 16);
    core.tick(T0 + 32);
    assert_eq!(*store.cursor_subscribes.lock().expect("lock"), 3);
}

// =============================================================================
// NOTES AND STAMPS
// =============================================================================

#[test]
fn note_from_one_view_reaches_another() {
    let store = LocalStore::in_memory();
    let mut alice = engine_on(&store, "alice");
    let mut bob = engine_on(&store, "bob");
    bob.tick(T0);

    let action = alice.submit_note(&draft("hello"), T0);
    assert!(matches!(action, Some(Action::NoteCreated(ref n)) if n.text == "hello"));

    let stats = bob.tick(T0 + 16);
    assert_eq!(stats.applied, 1);
    assert!(stats.render);
    let scene = bob.scene(T0 + 16);
    assert_eq!(scene.notes.len(), 1);
    assert_eq!(scene.notes[0].author_id, "alice");
    assert_eq!((scene.notes[0].x, scene.notes[0].y), (10.0, 20.0));
}

#[test]
fn blank_note_is_rejected() {
    let store = LocalStore::in_memory();
    let mut core = engine_on(&store, "a");
    let action = core.submit_note(&draft("   "), T0);
    assert_eq!(action, Some(Action::Rejected("note text is empty".to_owned())));
}

#[test]
fn second_creation_within_gap_is_rejected() {
    let store = LocalStore::in_memory();
    let mut core = engine_on(&store, "a");
    assert!(matches!(core.submit_note(&draft("one"), T0), Some(Action::NoteCreated(_))));
    assert!(matches!(core.submit_note(&draft("two"), T0 + 400), Some(Action::Rejected(_))));
    assert!(matches!(core.submit_note(&draft("three"), T0 + 1000), Some(Action::NoteCreated(_))));
}

#[test]
fn write_failure_is_silent() {
    let store = Arc::new(FlakyStore::default());
    let mut core = EngineCore::new(store, participant("a"), EngineConfig::default(), 1);
    core.set_viewport(800.0, 600.0, 1.0);
    assert_eq!(core.submit_note(&draft("lost"), T0), None);
}

#[test]
fn note_without_position_lands_near_center() {
    let store = LocalStore::in_memory();
    let mut core = engine_on(&store, "a");
    let loose = NoteDraft { at: None, ..draft("center") };
    let Some(Action::NoteCreated(note)) = core.submit_note(&loose, T0) else {
        panic!("note should be created");
    };
    assert!(note.x.abs() <= 20.0 && note.y.abs() <= 20.0);
    assert!(note.rotation.abs() <= 3.0);
}

#[test]
fn stamp_tool_click_drops_stamp_at_world_point() {
    let store = LocalStore::in_memory();
    let mut core = engine_on(&store, "a");
    core.set_tool(Tool::Stamp);
    core.set_stamp_emoji("🚀");

    let actions = core.on_pointer_down(Point::new(450.0, 350.0), Button::Primary, T0);
    let [Action::StampCreated(stamp)] = actions.as_slice() else {
        panic!("expected one stamp, got {actions:?}");
    };
    assert_eq!((stamp.x, stamp.y), (50.0, 50.0));
    assert_eq!(stamp.emoji, "🚀");
    assert_eq!(core.motion.state(), crate::motion::DragState::Idle);

    core.tick(T0 + 16);
    assert_eq!(core.scene(T0 + 16).stamps.len(), 1);
}

#[test]
fn middle_button_pans_even_with_stamp_tool() {
    let store = LocalStore::in_memory();
    let mut core = engine_on(&store, "a");
    core.set_tool(Tool::Stamp);
    assert!(core.on_pointer_down(Point::new(0.0, 0.0), Button::Middle, T0).is_empty());
    let actions = core.on_pointer_move(Point::new(30.0, 0.0), T0);
    assert_eq!(actions, vec![Action::RenderNeeded]);
    assert_eq!(core.viewport.x, 430.0);
}

#[test]
fn double_click_requests_composer_in_pan_mode_only() {
    let store = LocalStore::in_memory();
    let mut core = engine_on(&store, "a");
    assert_eq!(
        core.on_double_click(Point::new(500.0, 300.0)),
        vec![Action::ComposeNoteRequested { at: Point::new(100.0, 0.0) }]
    );
    core.set_tool(Tool::Stamp);
    assert!(core.on_double_click(Point::new(500.0, 300.0)).is_empty());
}

#[test]
fn preview_is_painted_until_submit() {
    let store = LocalStore::in_memory();
    let mut core = engine_on(&store, "a");
    core.set_preview(Some(&draft("draft")));
    assert_eq!(core.scene(T0).preview.map(|n| n.text.as_str()), Some("draft"));

    core.submit_note(&draft("draft"), T0);
    assert!(core.scene(T0).preview.is_none());
}

// =============================================================================
// MOTION
// =============================================================================

#[test]
fn drag_release_coasts_on_following_ticks() {
    let store = LocalStore::in_memory();
    let mut core = engine_on(&store, "a");
    core.on_pointer_down(Point::new(100.0, 100.0), Button::Primary, T0);
    core.on_pointer_move(Point::new(120.0, 100.0), T0 + 16);
    core.on_pointer_up();

    let x = core.viewport.x;
    let stats = core.tick(T0 + 32);
    assert!(stats.moved);
    assert!(core.viewport.x > x);
}

#[test]
fn held_arrow_key_pans_each_tick() {
    let store = LocalStore::in_memory();
    let mut core = engine_on(&store, "a");
    assert!(core.on_key_down("ArrowLeft"));
    core.tick(T0);
    core.tick(T0 + 16);
    assert_eq!(core.viewport.x, 430.0);

    assert!(core.on_key_up("ArrowLeft"));
    assert!(!core.tick(T0 + 32).moved);
}

#[test]
fn blur_releases_keys() {
    let store = LocalStore::in_memory();
    let mut core = engine_on(&store, "a");
    core.on_key_down("KeyD");
    core.on_blur();
    assert!(!core.tick(T0).moved);
}

// =============================================================================
// PRESENCE
// =============================================================================

#[test]
fn cursor_publish_is_throttled_and_seen_by_others() {
    let store = LocalStore::in_memory();
    let mut alice = engine_on(&store, "alice");
    let mut bob = engine_on(&store, "bob");

    alice.on_pointer_move(Point::new(400.0, 300.0), T0);
    alice.on_pointer_move(Point::new(500.0, 300.0), T0 + 50);
    bob.tick(T0 + 60);
    let scene = bob.scene(T0 + 60);
    assert_eq!(scene.cursors.len(), 1);
    assert_eq!((scene.cursors[0].x, scene.cursors[0].y), (0.0, 0.0));

    alice.on_pointer_move(Point::new(500.0, 300.0), T0 + 100);
    bob.tick(T0 + 110);
    assert_eq!(bob.scene(T0 + 110).cursors[0].x, 100.0);
}

#[test]
fn own_cursor_is_not_painted() {
    let store = LocalStore::in_memory();
    let mut alice = engine_on(&store, "alice");
    alice.on_pointer_move(Point::new(400.0, 300.0), T0);
    alice.tick(T0 + 10);
    assert!(alice.scene(T0 + 10).cursors.is_empty());
    assert_eq!(alice.presence.len(), 1);
}

#[test]
fn stale_cursor_disappears() {
    let store = LocalStore::in_memory();
    let mut alice = engine_on(&store, "alice");
    let mut bob = engine_on(&store, "bob");
    alice.on_pointer_move(Point::new(400.0, 300.0), T0);
    bob.tick(T0);
    assert_eq!(bob.scene(T0 + 29_999).cursors.len(), 1);
    assert!(bob.scene(T0 + 30_000).cursors.is_empty());
}
