//! Remote Collaborators
//!
//! Traits for the durable store, the generation provider and the
//! notification sink the engine talks to. Calls are async and may fail; the
//! engine runs on a single thread, so futures need not be `Send`.

mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RemoteResult;
use crate::models::{Entry, Generation, Shot, ShotView};

pub use memory::MemoryStore;

/// Fields of a shot about to be created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotDraft {
    pub project_id: String,
    pub name: String,
    pub position: i64,
    pub aspect_ratio: Option<String>,
}

/// Durable store of shots and entries.
///
/// Every method returns the record as committed, with server ids and the
/// authoritative position.
#[async_trait(?Send)]
pub trait RemoteStore {
    /// All shots of a project with all of their entries
    async fn fetch_shots(&self, project_id: &str) -> RemoteResult<Vec<ShotView>>;

    /// One shot without its entries; `None` when it does not exist
    async fn fetch_shot(&self, shot_id: &str) -> RemoteResult<Option<Shot>>;

    async fn fetch_entries(&self, shot_id: &str) -> RemoteResult<Vec<Entry>>;

    async fn fetch_entry(&self, entry_id: &str) -> RemoteResult<Option<Entry>>;

    async fn create_shot(&self, draft: &ShotDraft) -> RemoteResult<Shot>;

    /// Copy a shot and every entry in it in one step
    async fn duplicate_shot(&self, shot_id: &str, draft: &ShotDraft) -> RemoteResult<ShotView>;

    /// Deleting a missing shot succeeds
    async fn delete_shot(&self, shot_id: &str) -> RemoteResult<()>;

    async fn set_shot_position(&self, shot_id: &str, position: i64) -> RemoteResult<Shot>;

    /// Atomic insert of a new entry at `position` (or unpositioned)
    async fn insert_entry_at(
        &self,
        shot_id: &str,
        generation_id: &str,
        position: Option<i64>,
    ) -> RemoteResult<Entry>;

    async fn set_entry_position(&self, entry_id: &str, position: Option<i64>) -> RemoteResult<Entry>;

    /// New entry in the same shot, same generation, at `position`
    async fn duplicate_entry(&self, entry_id: &str, position: i64) -> RemoteResult<Entry>;

    async fn delete_entry(&self, entry_id: &str) -> RemoteResult<()>;
}

/// Source of generation display metadata
#[async_trait(?Send)]
pub trait GenerationProvider {
    async fn generation(&self, generation_id: &str) -> RemoteResult<Option<Generation>>;
}
