//! Cursor presence: the latest cursor per participant, filtered by age on read.
//!
//! Stale cursors are never deleted; they simply stop showing up once their
//! `lastUpdate` is [`CURSOR_STALE_MS`] or more in the past.

#[cfg(test)]
#[path = "presence_test.rs"]
mod presence_test;

use std::collections::HashMap;

use tracing::warn;

use crate::consts::CURSOR_STALE_MS;
use crate::doc::{Cursor, Parsed, parse_collection};
use crate::store::{Namespace, Snapshot};

#[derive(Debug, Default)]
pub struct Presence {
    cursors: HashMap<String, Cursor>,
}

impl Presence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every cursor from a `cursors` snapshot. Other namespaces are ignored.
    pub fn apply(&mut self, snapshot: &Snapshot) -> bool {
        if snapshot.namespace != Namespace::Cursors {
            return false;
        }
        let Parsed { records, dropped } = parse_collection::<Cursor>(&snapshot.value);
        for reason in dropped {
            warn!(error = %reason, "presence: dropped malformed cursor");
        }
        self.cursors = records.into_iter().map(|c| (c.id.clone(), c)).collect();
        true
    }

    /// Cursors updated less than [`CURSOR_STALE_MS`] before `now_ms`. A
    /// cursor stamped further than that in the future is treated as stale too.
    pub fn active(&self, now_ms: i64) -> impl Iterator<Item = &Cursor> {
        self.cursors.values().filter(move |c| {
            let age = now_ms.saturating_sub(c.last_update);
            age > -CURSOR_STALE_MS && age < CURSOR_STALE_MS
        })
    }

    /// Active cursors other than `participant`'s own.
    pub fn others<'a>(&'a self, participant: &'a str, now_ms: i64) -> impl Iterator<Item = &'a Cursor> {
        self.active(now_ms).filter(move |c| c.id != participant)
    }

    /// Every stored cursor, stale or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }
}
