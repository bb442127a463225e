//! Cache Keys and Projection Values

use serde::{Deserialize, Serialize};

use crate::models::{Entry, RecordId, ShotView};

/// Address of one projection in the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheKey {
    /// All shots of a project, each carrying its entries (capped to
    /// positioned entries when `entry_cap` is set)
    ProjectShots {
        project_id: String,
        entry_cap: Option<usize>,
    },
    /// Every entry of one shot, timeline first then unpositioned
    ShotEntries(RecordId),
    /// A single entry
    EntryRecord(RecordId),
    /// Every entry referencing one generation, across shots
    GenerationUsage(String),
}

impl CacheKey {
    pub fn project_shots(project_id: impl Into<String>, entry_cap: Option<usize>) -> Self {
        CacheKey::ProjectShots {
            project_id: project_id.into(),
            entry_cap,
        }
    }

    pub fn is_project(&self, project: &str) -> bool {
        matches!(self, CacheKey::ProjectShots { project_id, .. } if project_id == project)
    }
}

/// Value stored under a `CacheKey`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Projection {
    Shots(Vec<ShotView>),
    Entries(Vec<Entry>),
    Entry(Entry),
}

impl Projection {
    pub fn as_shots(&self) -> Option<&Vec<ShotView>> {
        match self {
            Projection::Shots(views) => Some(views),
            _ => None,
        }
    }

    pub fn as_entries(&self) -> Option<&Vec<Entry>> {
        match self {
            Projection::Entries(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_entry(&self) -> Option<&Entry> {
        match self {
            Projection::Entry(entry) => Some(entry),
            _ => None,
        }
    }

    /// Visit every entry held by this projection, wherever it sits
    pub fn entries_mut(&mut self) -> Vec<&mut Entry> {
        match self {
            Projection::Shots(views) => views.iter_mut().flat_map(|v| v.entries.iter_mut()).collect(),
            Projection::Entries(entries) => entries.iter_mut().collect(),
            Projection::Entry(entry) => vec![entry],
        }
    }

    pub fn entries(&self) -> Vec<&Entry> {
        match self {
            Projection::Shots(views) => views.iter().flat_map(|v| v.entries.iter()).collect(),
            Projection::Entries(entries) => entries.iter().collect(),
            Projection::Entry(entry) => vec![entry],
        }
    }
}
