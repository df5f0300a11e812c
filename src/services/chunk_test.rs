use super::*;
use crate::state::test_helpers::{self, note, path, seed_chunk};
use tokio::time::{Duration, timeout};

fn new_note(x: f64, y: f64, text: &str) -> Value {
    json!({ "x": x, "y": y, "text": text, "color": "#bfdbfe", "rotation": 1.5, "authorId": "someone" })
}

async fn recv_push(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("push receive timed out")
        .expect("push channel closed unexpectedly")
}

fn pushed_value(frame: &Frame) -> &Value {
    assert_eq!(frame.syscall, "chunk:snapshot");
    frame.data.get("value").expect("snapshot value")
}

// =============================================================================
// parse_path
// =============================================================================

#[test]
fn parse_path_accepts_chunked_namespaces() {
    let parsed = parse_path("notes", "-1_2").expect("path");
    assert_eq!(parsed, path(Namespace::Notes, -1, 2));
    assert_eq!(parse_path("stamps", "0_0").expect("path").namespace, Namespace::Stamps);
}

#[test]
fn parse_path_rejects_cursors() {
    let err = parse_path("cursors", "0_0").expect_err("cursors are not chunked");
    assert_eq!(err.error_code(), "E_NOT_CHUNKED");
}

#[test]
fn parse_path_rejects_unknown_namespace_and_bad_key() {
    assert_eq!(parse_path("arrows", "0_0").expect_err("namespace").error_code(), "E_UNKNOWN_NAMESPACE");
    assert_eq!(parse_path("notes", "0-0").expect_err("key").error_code(), "E_INVALID_KEY");
}

// =============================================================================
// normalize
// =============================================================================

#[test]
fn normalize_assigns_identity_and_author() {
    let stored = normalize(path(Namespace::Notes, 0, 0), new_note(10.0, 20.0, "  hi  "), Some("alice"), 42)
        .expect("valid note");
    assert_eq!(stored["timestamp"], json!(42));
    assert_eq!(stored["authorId"], "alice");
    assert_eq!(stored["text"], "hi");
    assert!(Uuid::parse_str(stored["id"].as_str().expect("id")).is_ok());
}

#[test]
fn normalize_ignores_client_supplied_id() {
    let mut record = new_note(1.0, 1.0, "x");
    record["id"] = json!("chosen-by-client");
    let stored = normalize(path(Namespace::Notes, 0, 0), record, None, 1).expect("valid note");
    assert_ne!(stored["id"], "chosen-by-client");
    assert_eq!(stored["authorId"], "someone");
}

#[test]
fn normalize_rejects_record_outside_chunk() {
    let err = normalize(path(Namespace::Notes, 0, 0), new_note(500.0, 10.0, "edge"), None, 1)
        .expect_err("x = 500 belongs to cx = 1");
    assert!(matches!(err, ChunkError::WrongChunk { home, .. } if home == ChunkKey::new(1, 0)));
}

#[test]
fn normalize_rejects_bad_notes() {
    let notes = path(Namespace::Notes, 0, 0);
    assert!(matches!(normalize(notes, json!("text"), None, 1), Err(ChunkError::InvalidRecord(_))));
    assert!(matches!(normalize(notes, new_note(1.0, 1.0, "   "), None, 1), Err(ChunkError::InvalidRecord(_))));
    let long = "x".repeat(201);
    assert!(matches!(normalize(notes, new_note(1.0, 1.0, &long), None, 1), Err(ChunkError::InvalidRecord(_))));
    let no_color = json!({ "x": 1.0, "y": 1.0, "text": "t", "rotation": 0.0, "authorId": "a" });
    assert!(matches!(normalize(notes, no_color, None, 1), Err(ChunkError::InvalidRecord(_))));
}

#[test]
fn normalize_accepts_stamp() {
    let stamp = json!({ "x": -10.0, "y": -10.0, "emoji": "🔥", "rotation": -7.0 });
    let stored = normalize(path(Namespace::Stamps, -1, -1), stamp, Some("alice"), 5).expect("valid stamp");
    assert_eq!(stored["emoji"], "🔥");
    assert!(stored.get("authorId").is_none());
}

// =============================================================================
// subscribe / append / unsubscribe (memory only)
// =============================================================================

#[tokio::test]
async fn subscribe_to_empty_chunk_returns_null_snapshot() {
    let state = test_helpers::test_app_state();
    let (tx, mut rx) = mpsc::channel(8);

    let frame = subscribe(&state, path(Namespace::Notes, 3, 4), Uuid::new_v4(), &tx).await.expect("subscribe");

    assert_eq!(frame.str_field("namespace"), Some("notes"));
    assert_eq!(frame.str_field("key"), Some("3_4"));
    assert_eq!(pushed_value(&frame), &Value::Null);
    assert!(rx.try_recv().is_err(), "first snapshot is returned, not queued");
}

#[tokio::test]
async fn first_snapshot_survives_a_full_queue() {
    let state = test_helpers::test_app_state();
    let notes = path(Namespace::Notes, 0, 0);
    seed_chunk(&state, notes, vec![note("n1", 5.0, 5.0)]).await;
    let (tx, mut rx) = mpsc::channel(1);
    tx.try_send(snapshot_frame(path(Namespace::Stamps, 9, 9), Value::Null)).expect("fill queue");

    let frame = subscribe(&state, notes, Uuid::new_v4(), &tx).await.expect("subscribe");

    assert_eq!(pushed_value(&frame)["n1"]["text"], "hello");
    assert_eq!(recv_push(&mut rx).await.str_field("namespace"), Some("stamps"));
}

#[tokio::test]
async fn append_pushes_full_collection_to_every_subscriber() {
    let state = test_helpers::test_app_state();
    let notes = path(Namespace::Notes, 0, 0);
    seed_chunk(&state, notes, vec![note("n1", 5.0, 5.0)]).await;

    let (tx_a, mut rx_a) = mpsc::channel(8);
    let (tx_b, mut rx_b) = mpsc::channel(8);
    subscribe(&state, notes, Uuid::new_v4(), &tx_a).await.expect("subscribe a");
    subscribe(&state, notes, Uuid::new_v4(), &tx_b).await.expect("subscribe b");

    let stored = append(&state, notes, new_note(10.0, 10.0, "second"), Some("bob")).await.expect("append");
    let id = stored["id"].as_str().expect("id");

    for rx in [&mut rx_a, &mut rx_b] {
        let frame = recv_push(rx).await;
        let value = pushed_value(&frame);
        assert_eq!(value.as_object().expect("collection").len(), 2);
        assert_eq!(value[id]["text"], "second");
        assert_eq!(value[id]["authorId"], "bob");
        assert!(value.get("n1").is_some());
    }
}

#[tokio::test]
async fn memory_only_chunk_keeps_records_without_dirty_flags() {
    let state = test_helpers::test_app_state();
    let stamps = path(Namespace::Stamps, 0, 0);
    append(&state, stamps, json!({ "x": 1.0, "y": 1.0, "emoji": "👀", "rotation": 0.0 }), None)
        .await
        .expect("append");

    let chunks = state.chunks.read().await;
    let chunk = chunks.get(&stamps).expect("chunk stays in memory");
    assert_eq!(chunk.records.len(), 1);
    assert!(chunk.dirty.is_empty());
}

#[tokio::test]
async fn unsubscribe_stops_pushes_and_is_idempotent() {
    let state = test_helpers::test_app_state();
    let notes = path(Namespace::Notes, 0, 0);
    let client = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel(8);
    subscribe(&state, notes, client, &tx).await.expect("subscribe");

    unsubscribe(&state, notes, client).await;
    unsubscribe(&state, notes, client).await;
    unsubscribe(&state, path(Namespace::Notes, 9, 9), client).await;

    append(&state, notes, new_note(1.0, 1.0, "unseen"), None).await.expect("append");
    assert!(timeout(Duration::from_millis(80), rx.recv()).await.is_err(), "expected no push");
}

#[tokio::test]
async fn resubscribe_sees_records_appended_meanwhile() {
    let state = test_helpers::test_app_state();
    let notes = path(Namespace::Notes, 0, 0);
    let client = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel(8);
    subscribe(&state, notes, client, &tx).await.expect("subscribe");
    unsubscribe(&state, notes, client).await;

    append(&state, notes, new_note(1.0, 1.0, "while away"), None).await.expect("append");
    let frame = subscribe(&state, notes, client, &tx).await.expect("resubscribe");

    assert_eq!(pushed_value(&frame).as_object().expect("collection").len(), 1);
    assert!(rx.try_recv().is_err(), "no push while unsubscribed");
}

#[tokio::test]
async fn full_subscriber_queue_drops_push_without_failing_append() {
    let state = test_helpers::test_app_state();
    let notes = path(Namespace::Notes, 0, 0);
    let (tx, _rx) = mpsc::channel(1);
    subscribe(&state, notes, Uuid::new_v4(), &tx).await.expect("subscribe");

    append(&state, notes, new_note(1.0, 1.0, "one"), None).await.expect("append");
    append(&state, notes, new_note(1.0, 1.0, "two"), None).await.expect("append despite full queue");
}

#[tokio::test]
async fn panning_past_empty_memory_only_chunks_retains_nothing() {
    let state = test_helpers::test_app_state();
    let client = Uuid::new_v4();
    let (tx, _rx) = mpsc::channel(8);

    for cx in 0..500 {
        let visited = path(Namespace::Notes, cx, -cx);
        subscribe(&state, visited, client, &tx).await.expect("subscribe");
        unsubscribe(&state, visited, client).await;
    }

    assert!(state.chunks.read().await.is_empty());
}

#[tokio::test]
async fn memory_only_chunk_with_records_outlives_its_subscribers() {
    let state = test_helpers::test_app_state();
    let notes = path(Namespace::Notes, 0, 0);
    let client = Uuid::new_v4();
    let (tx, _rx) = mpsc::channel(8);
    subscribe(&state, notes, client, &tx).await.expect("subscribe");
    append(&state, notes, new_note(1.0, 1.0, "kept"), None).await.expect("append");

    unsubscribe(&state, notes, client).await;

    let chunks = state.chunks.read().await;
    let chunk = chunks.get(&notes).expect("records are the only copy");
    assert!(chunk.subscribers.is_empty());
    assert_eq!(chunk.records.len(), 1);
}

#[tokio::test]
async fn snapshot_reads_memory_or_null() {
    let state = test_helpers::test_app_state();
    let notes = path(Namespace::Notes, 0, 0);
    assert_eq!(snapshot(&state, notes).await.expect("snapshot"), Value::Null);

    seed_chunk(&state, notes, vec![note("n1", 1.0, 1.0)]).await;
    assert_eq!(snapshot(&state, notes).await.expect("snapshot")["n1"]["text"], "hello");
}

// =============================================================================
// database-backed paths (unreachable database)
// =============================================================================

#[tokio::test]
async fn subscribe_reports_retryable_database_error() {
    let state = test_helpers::test_app_state_with_dead_pool();
    let (tx, _rx) = mpsc::channel(8);

    let err = subscribe(&state, path(Namespace::Notes, 0, 0), Uuid::new_v4(), &tx)
        .await
        .expect_err("database is unreachable");
    assert_eq!(err.error_code(), "E_DATABASE");
    assert!(err.retryable());
    assert!(state.chunks.read().await.is_empty());
}

#[tokio::test]
async fn append_to_hydrated_chunk_marks_record_dirty() {
    let state = test_helpers::test_app_state_with_dead_pool();
    let notes = path(Namespace::Notes, 0, 0);
    seed_chunk(&state, notes, Vec::new()).await;

    let stored = append(&state, notes, new_note(2.0, 2.0, "pending"), None).await.expect("append");

    let chunks = state.chunks.read().await;
    let chunk = chunks.get(&notes).expect("chunk");
    assert!(chunk.dirty.contains(stored["id"].as_str().expect("id")));
}

#[tokio::test]
async fn last_unsubscribe_evicts_clean_chunk_but_keeps_dirty_one() {
    let state = test_helpers::test_app_state_with_dead_pool();
    let clean = path(Namespace::Notes, 0, 0);
    let dirty = path(Namespace::Notes, 1, 0);
    seed_chunk(&state, clean, Vec::new()).await;
    seed_chunk(&state, dirty, Vec::new()).await;

    let client = Uuid::new_v4();
    let (tx, _rx) = mpsc::channel(8);
    subscribe(&state, clean, client, &tx).await.expect("subscribe clean");
    subscribe(&state, dirty, client, &tx).await.expect("subscribe dirty");
    append(&state, dirty, new_note(600.0, 1.0, "unflushed"), None).await.expect("append");

    unsubscribe(&state, clean, client).await;
    unsubscribe(&state, dirty, client).await;

    let chunks = state.chunks.read().await;
    assert!(!chunks.contains_key(&clean));
    assert!(chunks.contains_key(&dirty));
}
