//! Record model: notes, stamps and cursors, plus tolerant snapshot parsing.
//!
//! Records travel as JSON objects with the exact field names below
//! (`authorId`, `lastUpdate`). A collection snapshot is a JSON object mapping
//! record id to record; `null` means "exists but empty".
//!
//! ERROR HANDLING
//! ==============
//! Parsing never fails as a whole. A snapshot that is not a collection degrades
//! to empty, and a record that does not decode is dropped on its own; both are
//! reported back as [`MalformedSnapshot`] values for the caller to log.

#[cfg(test)]
#[path = "doc_test.rs"]
mod doc_test;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// =============================================================================
// RECORDS
// =============================================================================

/// The five note colors, serialized as their hex fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NoteColor {
    #[default]
    #[serde(rename = "#fef08a", alias = "yellow")]
    Yellow,
    #[serde(rename = "#bfdbfe", alias = "blue")]
    Blue,
    #[serde(rename = "#bbf7d0", alias = "green")]
    Green,
    #[serde(rename = "#fecdd3", alias = "pink")]
    Pink,
    #[serde(rename = "#fed7aa", alias = "orange")]
    Orange,
}

impl NoteColor {
    pub const ALL: [Self; 5] = [Self::Yellow, Self::Blue, Self::Green, Self::Pink, Self::Orange];

    /// CSS fill color.
    #[must_use]
    pub fn hex(self) -> &'static str {
        match self {
            Self::Yellow => "#fef08a",
            Self::Blue => "#bfdbfe",
            Self::Green => "#bbf7d0",
            Self::Pink => "#fecdd3",
            Self::Orange => "#fed7aa",
        }
    }
}

impl std::str::FromStr for NoteColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.hex() == lower || format!("{c:?}").to_ascii_lowercase() == lower)
            .ok_or_else(|| format!("unknown note color: {s}"))
    }
}

/// A sticky note. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub text: String,
    pub color: NoteColor,
    /// Tilt in degrees.
    pub rotation: f64,
    #[serde(deserialize_with = "millis")]
    pub timestamp: i64,
    #[serde(rename = "authorId")]
    pub author_id: String,
}

/// An emoji stamp. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stamp {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub emoji: String,
    /// Tilt in degrees.
    pub rotation: f64,
    #[serde(deserialize_with = "millis")]
    pub timestamp: i64,
}

/// Latest pointer position of one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub color: String,
    #[serde(rename = "lastUpdate", deserialize_with = "millis")]
    pub last_update: i64,
}

/// Largest integer an `f64` holds exactly; timestamps beyond it are rejected.
const MAX_MILLIS: f64 = 9_007_199_254_740_991.0;

/// Millisecond timestamps may arrive as floats after a protobuf hop.
#[allow(clippy::cast_possible_truncation)]
fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let ms = f64::deserialize(deserializer)?;
    if !ms.is_finite() || ms.abs() > MAX_MILLIS {
        return Err(serde::de::Error::custom("timestamp out of range"));
    }
    Ok(ms as i64)
}

/// Records ordered within a chunk by creation time.
pub trait Record: DeserializeOwned {
    fn id(&self) -> &str;
    fn timestamp(&self) -> i64;
}

impl Record for Note {
    fn id(&self) -> &str {
        &self.id
    }
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl Record for Stamp {
    fn id(&self) -> &str {
        &self.id
    }
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl Record for Cursor {
    fn id(&self) -> &str {
        &self.id
    }
    fn timestamp(&self) -> i64 {
        self.last_update
    }
}

// =============================================================================
// SNAPSHOT PARSING
// =============================================================================

/// Why part or all of a snapshot was discarded.
#[derive(Debug, thiserror::Error)]
pub enum MalformedSnapshot {
    #[error("snapshot is a {0}, expected a collection")]
    NotACollection(&'static str),
    #[error("record {id} is malformed: {source}")]
    Record {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Records recovered from a snapshot plus whatever was dropped on the way.
#[derive(Debug)]
pub struct Parsed<T> {
    pub records: Vec<T>,
    pub dropped: Vec<MalformedSnapshot>,
}

/// Decode a collection snapshot, keeping every record that parses.
///
/// A record without an `id` field takes its key in the collection. Output is
/// sorted by timestamp, then id, so paint order is stable across snapshots.
#[must_use]
pub fn parse_collection<T: Record>(value: &Value) -> Parsed<T> {
    let mut records = Vec::new();
    let mut dropped = Vec::new();

    let entries: Vec<(String, &Value)> = match value {
        Value::Null => Vec::new(),
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        // Sparse arrays show up when record ids happen to be small integers.
        Value::Array(items) => items.iter().enumerate().map(|(i, v)| (i.to_string(), v)).collect(),
        Value::Bool(_) => return degraded("boolean"),
        Value::Number(_) => return degraded("number"),
        Value::String(_) => return degraded("string"),
    };

    for (key, raw) in entries {
        if raw.is_null() {
            continue;
        }
        let mut raw = raw.clone();
        if let Some(obj) = raw.as_object_mut() {
            obj.entry("id").or_insert_with(|| Value::String(key.clone()));
        }
        match serde_json::from_value::<T>(raw) {
            Ok(record) => records.push(record),
            Err(source) => dropped.push(MalformedSnapshot::Record { id: key, source }),
        }
    }

    records.sort_by(|a, b| a.timestamp().cmp(&b.timestamp()).then_with(|| a.id().cmp(b.id())));
    Parsed { records, dropped }
}

fn degraded<T>(kind: &'static str) -> Parsed<T> {
    Parsed { records: Vec::new(), dropped: vec![MalformedSnapshot::NotACollection(kind)] }
}
