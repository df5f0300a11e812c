//! Creation collaborator: validates and writes new notes and stamps.
//!
//! Every creation goes through [`Composer`], which enforces the note text rules
//! and a minimum gap between two creations by the same actor, fills in id,
//! timestamp and a random tilt, then appends the record under the chunk of its
//! position. Bots and humans use the same path.
//!
//! ERROR HANDLING
//! ==============
//! Validation failures are returned so the caller can keep its draft open.
//! Store write failures are logged here and returned as
//! [`ComposeError::Write`]; callers treat them as a silent no-op.

#[cfg(test)]
#[path = "compose_test.rs"]
mod compose_test;

use std::collections::HashMap;

use rand::Rng;
use tracing::{debug, warn};

use crate::camera::Point;
use crate::chunk::chunk_key_of;
use crate::consts::{CREATE_GAP_MS, NOTE_CENTER_JITTER, NOTE_ROTATION_RANGE, NOTE_TEXT_MAX, STAMP_ROTATION_RANGE};
use crate::doc::{Note, NoteColor, Stamp};
use crate::store::{Namespace, StoreAdapter, WriteError};

#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("note text is empty")]
    EmptyText,
    #[error("note text is {len} characters, max {max}")]
    TextTooLong { len: usize, max: usize },
    #[error("too soon: wait {wait_ms}ms before creating again")]
    TooSoon { wait_ms: i64 },
    #[error(transparent)]
    Write(#[from] WriteError),
}

/// A note as entered by its author, before placement.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteDraft {
    pub text: String,
    pub color: NoteColor,
    /// Explicit world position. `None` places the note near the viewport center.
    pub at: Option<Point>,
}

#[derive(Debug, Default)]
pub struct Composer {
    gap_ms: i64,
    last_by_actor: HashMap<String, i64>,
}

impl Composer {
    #[must_use]
    pub fn new() -> Self {
        Self::with_gap(CREATE_GAP_MS)
    }

    #[must_use]
    pub fn with_gap(gap_ms: i64) -> Self {
        Self { gap_ms, last_by_actor: HashMap::new() }
    }

    /// Validate, place and append a note.
    ///
    /// # Errors
    ///
    /// Returns a validation variant of [`ComposeError`] for blank or overlong
    /// text and [`ComposeError::TooSoon`] inside the per-actor gap;
    /// [`ComposeError::Write`] when the store rejects the record.
    pub fn note_at(
        &mut self,
        store: &dyn StoreAdapter,
        rng: &mut impl Rng,
        actor: &str,
        draft: &NoteDraft,
        center: Point,
        now_ms: i64,
    ) -> Result<Note, ComposeError> {
        let text = draft.text.trim();
        if text.is_empty() {
            return Err(ComposeError::EmptyText);
        }
        let len = text.chars().count();
        if len > NOTE_TEXT_MAX {
            return Err(ComposeError::TextTooLong { len, max: NOTE_TEXT_MAX });
        }
        self.claim(actor, now_ms)?;

        let at = draft.at.unwrap_or_else(|| {
            Point::new(
                center.x + rng.random_range(-NOTE_CENTER_JITTER..NOTE_CENTER_JITTER),
                center.y + rng.random_range(-NOTE_CENTER_JITTER..NOTE_CENTER_JITTER),
            )
        });
        let note = Note {
            id: uuid::Uuid::new_v4().to_string(),
            x: at.x,
            y: at.y,
            text: text.to_owned(),
            color: draft.color,
            rotation: rng.random_range(-NOTE_ROTATION_RANGE..NOTE_ROTATION_RANGE),
            timestamp: now_ms,
            author_id: actor.to_owned(),
        };
        write(store, Namespace::Notes, at, serde_json::to_value(&note).map_err(WriteError::from)?)?;
        Ok(note)
    }

    /// Append a stamp at `at`.
    ///
    /// # Errors
    ///
    /// Returns [`ComposeError::TooSoon`] inside the per-actor gap and
    /// [`ComposeError::Write`] when the store rejects the record.
    pub fn stamp_at(
        &mut self,
        store: &dyn StoreAdapter,
        rng: &mut impl Rng,
        actor: &str,
        emoji: &str,
        at: Point,
        now_ms: i64,
    ) -> Result<Stamp, ComposeError> {
        self.claim(actor, now_ms)?;
        let stamp = Stamp {
            id: uuid::Uuid::new_v4().to_string(),
            x: at.x,
            y: at.y,
            emoji: emoji.to_owned(),
            rotation: rng.random_range(-STAMP_ROTATION_RANGE..STAMP_ROTATION_RANGE),
            timestamp: now_ms,
        };
        write(store, Namespace::Stamps, at, serde_json::to_value(&stamp).map_err(WriteError::from)?)?;
        Ok(stamp)
    }

    /// Reserve a creation slot for `actor` at `now_ms`.
    fn claim(&mut self, actor: &str, now_ms: i64) -> Result<(), ComposeError> {
        if let Some(last) = self.last_by_actor.get(actor) {
            let elapsed = now_ms - last;
            if elapsed < self.gap_ms {
                return Err(ComposeError::TooSoon { wait_ms: self.gap_ms - elapsed });
            }
        }
        self.last_by_actor.insert(actor.to_owned(), now_ms);
        Ok(())
    }
}

fn write(store: &dyn StoreAdapter, namespace: Namespace, at: Point, record: serde_json::Value) -> Result<(), WriteError> {
    let key = chunk_key_of(at);
    match store.append(namespace, &key.to_string(), record) {
        Ok(()) => {
            debug!(%namespace, %key, "compose: record appended");
            Ok(())
        }
        Err(e) => {
            warn!(%namespace, %key, error = %e, "compose: write failed");
            Err(e)
        }
    }
}
