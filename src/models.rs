//! Engine Models
//!
//! Shots, timeline entries and the generations they reference.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of every client-generated identifier
pub const TEMP_ID_PREFIX: &str = "temp-";

// ========================
// Identifiers
// ========================

/// Identifier of a shot or entry.
///
/// `Temporary` ids are minted by the engine for optimistic records and live
/// only until the remote store confirms the mutation. Because the variant is
/// part of equality, a temporary id never equals a committed one even when the
/// inner strings happen to match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum RecordId {
    Temporary(String),
    Committed(String),
}

impl RecordId {
    /// Mint a fresh temporary id
    pub fn temporary() -> Self {
        RecordId::Temporary(format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4()))
    }

    pub fn committed(id: impl Into<String>) -> Self {
        RecordId::Committed(id.into())
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, RecordId::Temporary(_))
    }

    /// Server id, if this record has been committed
    pub fn as_committed(&self) -> Option<&str> {
        match self {
            RecordId::Committed(id) => Some(id),
            RecordId::Temporary(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RecordId::Temporary(token) => token,
            RecordId::Committed(id) => id,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ========================
// Generations
// ========================

/// Media type of a generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    #[default]
    Image,
    Video,
}

impl GenerationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationKind::Image => "image",
            GenerationKind::Video => "video",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "video" => GenerationKind::Video,
            _ => GenerationKind::Image,
        }
    }
}

/// A visual asset. Owned outside the engine; entries only reference it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub id: String,
    /// Storage location of the asset
    pub location: String,
    pub thumbnail_location: Option<String>,
    pub kind: GenerationKind,
    pub created_at: DateTime<Utc>,
    pub starred: bool,
    /// Free-form provenance (prompt, model, parent generation, ...)
    pub provenance: serde_json::Value,
}

impl Generation {
    pub fn new(id: impl Into<String>, location: impl Into<String>, kind: GenerationKind) -> Self {
        Self {
            id: id.into(),
            location: location.into(),
            thumbnail_location: None,
            kind,
            created_at: Utc::now(),
            starred: false,
            provenance: serde_json::Value::Null,
        }
    }
}

// ========================
// Shots and entries
// ========================

/// An ordered group of entries inside a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shot {
    pub id: RecordId,
    pub project_id: String,
    pub name: String,
    /// Order among sibling shots; unrelated to entry positions
    pub position: i64,
    pub aspect_ratio: Option<String>,
}

/// Placement of a generation inside a shot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: RecordId,
    pub shot_id: RecordId,
    pub generation: Generation,
    /// Timeline key. `None` keeps the entry in the shot but off the timeline.
    pub position: Option<i64>,
    pub metadata: serde_json::Value,
}

impl Entry {
    /// New optimistic entry carrying a temporary id
    pub fn optimistic(shot_id: RecordId, generation: Generation, position: Option<i64>) -> Self {
        Self {
            id: RecordId::temporary(),
            shot_id,
            generation,
            position,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn is_positioned(&self) -> bool {
        self.position.is_some()
    }
}

/// A shot together with a list of its entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotView {
    pub shot: Shot,
    pub entries: Vec<Entry>,
}

/// One target of a batch reposition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub shot_id: RecordId,
    pub generation_id: String,
    pub position: i64,
}

// ========================
// Ordering helpers
// ========================

/// Sort entries the way every list projection stores them: positioned
/// entries ascending, unpositioned ones after them in their current order.
pub fn sort_entries(entries: &mut [Entry]) {
    entries.sort_by_key(|e| (e.position.is_none(), e.position.unwrap_or(0)));
}

/// Positioned entries only, ascending
pub fn timeline(entries: &[Entry]) -> Vec<Entry> {
    let mut positioned: Vec<Entry> = entries.iter().filter(|e| e.is_positioned()).cloned().collect();
    sort_entries(&mut positioned);
    positioned
}

/// Entries sitting in the unpositioned bucket
pub fn unpositioned(entries: &[Entry]) -> Vec<Entry> {
    entries.iter().filter(|e| !e.is_positioned()).cloned().collect()
}

/// Index at which `position` keeps a sorted entry list sorted
pub fn insertion_index(entries: &[Entry], position: Option<i64>) -> usize {
    match position {
        Some(p) => entries
            .iter()
            .position(|e| e.position.map_or(true, |q| q > p))
            .unwrap_or(entries.len()),
        None => entries.len(),
    }
}

/// Sort shots by their own order key
pub fn sort_shots(views: &mut [ShotView]) {
    views.sort_by_key(|v| v.shot.position);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_entry(id: &str, position: Option<i64>) -> Entry {
        Entry {
            id: RecordId::committed(id),
            shot_id: RecordId::committed("s1"),
            generation: Generation::new(format!("g-{}", id), "https://cdn/x.png", GenerationKind::Image),
            position,
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_temporary_id_never_equals_committed() {
        let temp = RecordId::temporary();
        assert!(temp.is_temporary());
        assert!(temp.as_str().starts_with(TEMP_ID_PREFIX));

        let lookalike = RecordId::committed(temp.as_str());
        assert_ne!(temp, lookalike);
        assert_eq!(lookalike.as_committed(), Some(temp.as_str()));
    }

    #[test]
    fn test_sort_entries_puts_unpositioned_last() {
        let mut entries = vec![
            make_entry("a", None),
            make_entry("b", Some(60)),
            make_entry("c", Some(0)),
            make_entry("d", None),
        ];
        sort_entries(&mut entries);
        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a", "d"]);
    }

    #[test]
    fn test_insertion_index() {
        let entries = vec![make_entry("a", Some(0)), make_entry("b", Some(60)), make_entry("c", None)];
        assert_eq!(insertion_index(&entries, Some(30)), 1);
        assert_eq!(insertion_index(&entries, Some(120)), 2);
        assert_eq!(insertion_index(&entries, None), 3);
    }

    #[test]
    fn test_generation_kind_serialization() {
        assert_eq!(GenerationKind::Video.as_str(), "video");
        assert_eq!(GenerationKind::from_str("image"), GenerationKind::Image);
        assert_eq!(GenerationKind::from_str("unknown"), GenerationKind::Image);
    }
}
