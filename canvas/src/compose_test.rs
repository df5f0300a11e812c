use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::Value;

use super::*;
use crate::store::{Inbox, LocalStore, SnapshotSink, SubscriptionError};

const NOW: i64 = 1_700_000_000_000;

fn rng() -> StdRng {
    StdRng::seed_from_u64(7)
}

fn draft(text: &str) -> NoteDraft {
    NoteDraft { text: text.into(), color: NoteColor::Blue, at: Some(Point::new(510.0, -20.0)) }
}

struct OfflineStore;

impl StoreAdapter for OfflineStore {
    fn subscribe(&self, _: Namespace, _: &str, _: SnapshotSink) -> Result<(), SubscriptionError> {
        Err(SubscriptionError::Unreachable("offline".into()))
    }
    fn unsubscribe(&self, _: Namespace, _: &str) -> Result<(), SubscriptionError> {
        Ok(())
    }
    fn append(&self, _: Namespace, _: &str, _: Value) -> Result<(), WriteError> {
        Err(WriteError::Unreachable("offline".into()))
    }
    fn set_latest(&self, _: Namespace, _: &str, _: Value) -> Result<(), WriteError> {
        Err(WriteError::Unreachable("offline".into()))
    }
}

// --- Notes ---

#[test]
fn note_is_written_under_its_chunk() {
    let store = LocalStore::in_memory();
    let mut inbox = Inbox::new();
    store.subscribe(Namespace::Notes, "1_-1", inbox.sink()).expect("subscribe");
    inbox.drain();

    let note = Composer::new()
        .note_at(&store, &mut rng(), "alice", &draft("  hi there  "), Point::default(), NOW)
        .expect("compose");
    assert_eq!(note.text, "hi there");
    assert_eq!(note.author_id, "alice");
    assert_eq!(note.timestamp, NOW);
    assert!((-3.0..3.0).contains(&note.rotation));

    let got = inbox.drain();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].value[&note.id]["text"], "hi there");
    assert_eq!(got[0].value[&note.id]["color"], "#bfdbfe");
}

#[test]
fn note_without_position_lands_near_center() {
    let store = LocalStore::in_memory();
    let mut d = draft("centered");
    d.at = None;
    let center = Point::new(1000.0, 1000.0);
    let note = Composer::new().note_at(&store, &mut rng(), "a", &d, center, NOW).expect("compose");
    assert!((note.x - center.x).abs() <= 20.0);
    assert!((note.y - center.y).abs() <= 20.0);
}

#[test]
fn blank_and_overlong_text_are_rejected() {
    let store = LocalStore::in_memory();
    let mut composer = Composer::new();
    assert!(matches!(
        composer.note_at(&store, &mut rng(), "a", &draft("   \n"), Point::default(), NOW),
        Err(ComposeError::EmptyText)
    ));
    let long = "x".repeat(201);
    assert!(matches!(
        composer.note_at(&store, &mut rng(), "a", &draft(&long), Point::default(), NOW),
        Err(ComposeError::TextTooLong { len: 201, max: 200 })
    ));
    let exact = "é".repeat(200);
    assert!(composer.note_at(&store, &mut rng(), "a", &draft(&exact), Point::default(), NOW).is_ok());
}

#[test]
fn rejected_draft_does_not_consume_the_gap() {
    let store = LocalStore::in_memory();
    let mut composer = Composer::new();
    assert!(composer.note_at(&store, &mut rng(), "a", &draft(""), Point::default(), NOW).is_err());
    assert!(composer.note_at(&store, &mut rng(), "a", &draft("ok"), Point::default(), NOW).is_ok());
}

// --- Rate limit ---

#[test]
fn one_second_gap_per_actor() {
    let store = LocalStore::in_memory();
    let mut composer = Composer::new();
    let mut r = rng();
    assert!(composer.stamp_at(&store, &mut r, "a", "🔥", Point::default(), NOW).is_ok());
    assert!(matches!(
        composer.stamp_at(&store, &mut r, "a", "🔥", Point::default(), NOW + 400),
        Err(ComposeError::TooSoon { wait_ms: 600 })
    ));
    assert!(composer.stamp_at(&store, &mut r, "b", "🔥", Point::default(), NOW + 400).is_ok());
    assert!(composer.stamp_at(&store, &mut r, "a", "🔥", Point::default(), NOW + 1_000).is_ok());
}

// --- Stamps ---

#[test]
fn stamp_rotation_is_within_fifteen_degrees() {
    let store = LocalStore::in_memory();
    let mut composer = Composer::with_gap(0);
    let mut r = rng();
    for i in 0..50 {
        let stamp = composer.stamp_at(&store, &mut r, "a", "🚀", Point::new(-1.0, -1.0), NOW + i).expect("stamp");
        assert!((-15.0..15.0).contains(&stamp.rotation));
    }
}

#[test]
fn write_failure_is_reported_as_write_error() {
    let mut composer = Composer::new();
    let result = composer.stamp_at(&OfflineStore, &mut rng(), "a", "👀", Point::default(), NOW);
    assert!(matches!(result, Err(ComposeError::Write(WriteError::Unreachable(_)))));
}
