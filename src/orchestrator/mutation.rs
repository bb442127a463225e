//! Mutation Lifecycle Bookkeeping
//!
//! States a mutation passes through and the journal that records them.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::cache::{CacheKey, Snapshot};

/// Journal entries kept before the oldest are dropped
const JOURNAL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationState {
    /// Accepted, nothing applied yet
    Pending,
    /// Written to every projection, remote call in flight
    Optimistic,
    Committed,
    RolledBack,
}

impl MutationState {
    pub fn is_settled(&self) -> bool {
        matches!(self, MutationState::Committed | MutationState::RolledBack)
    }
}

/// History of one mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub id: u64,
    pub action: String,
    pub states: Vec<MutationState>,
}

impl MutationRecord {
    pub fn state(&self) -> MutationState {
        self.states.last().copied().unwrap_or(MutationState::Pending)
    }
}

#[derive(Debug, Default)]
pub struct MutationJournal {
    next_id: u64,
    records: VecDeque<MutationRecord>,
}

impl MutationJournal {
    pub fn begin(&mut self, action: &str) -> u64 {
        self.next_id += 1;
        if self.records.len() == JOURNAL_CAPACITY {
            self.records.pop_front();
        }
        self.records.push_back(MutationRecord {
            id: self.next_id,
            action: action.to_string(),
            states: vec![MutationState::Pending],
        });
        self.next_id
    }

    pub fn advance(&mut self, id: u64, state: MutationState) {
        if let Some(record) = self.records.iter_mut().rev().find(|r| r.id == id) {
            record.states.push(state);
        }
    }

    pub fn get(&self, id: u64) -> Option<&MutationRecord> {
        self.records.iter().rev().find(|r| r.id == id)
    }

    pub fn records(&self) -> Vec<MutationRecord> {
        self.records.iter().cloned().collect()
    }

    /// Mutations that have not settled yet
    pub fn in_flight(&self) -> usize {
        self.records.iter().filter(|r| !r.state().is_settled()).count()
    }
}

/// A mutation between its optimistic write and settlement
#[derive(Debug)]
pub(super) struct InFlight {
    pub id: u64,
    pub action: &'static str,
    pub snapshot: Snapshot,
    pub held: Vec<CacheKey>,
}
