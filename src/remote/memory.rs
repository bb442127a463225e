//! In-Process Remote Store
//!
//! A `RemoteStore` kept in memory. Each call yields at least once before
//! touching state so callers observe the suspension point a network store
//! has. Failures and extra latency can be queued to exercise rollback and
//! interleaving paths.

use async_trait::async_trait;
use log::debug;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};

use super::{GenerationProvider, RemoteStore, ShotDraft};
use crate::error::{RemoteError, RemoteResult};
use crate::models::{self, Entry, Generation, RecordId, Shot, ShotView};

#[derive(Debug, Default)]
struct MemoryState {
    shots: BTreeMap<String, Shot>,
    entries: BTreeMap<String, Entry>,
    generations: HashMap<String, Generation>,
    next_id: u64,
    failures: VecDeque<RemoteError>,
    /// Failures reserved for a named call
    targeted: Vec<(String, RemoteError)>,
    /// Extra yields before the next calls complete
    delays: VecDeque<usize>,
    calls: Vec<String>,
}

impl MemoryState {
    fn mint(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn shot_entries(&self, shot_id: &str) -> Vec<Entry> {
        let mut entries: Vec<Entry> = self
            .entries
            .values()
            .filter(|e| e.shot_id.as_str() == shot_id)
            .cloned()
            .collect();
        models::sort_entries(&mut entries);
        entries
    }

    fn check_free(&self, shot_id: &str, position: Option<i64>, except: Option<&str>) -> RemoteResult<()> {
        let Some(position) = position else {
            return Ok(());
        };
        let taken = self.entries.values().any(|e| {
            e.shot_id.as_str() == shot_id && e.position == Some(position) && Some(e.id.as_str()) != except
        });
        if taken {
            return Err(RemoteError::new(format!(
                "duplicate key value violates unique constraint \"unique_shot_position\" (shot {}, position {})",
                shot_id, position
            )));
        }
        Ok(())
    }
}

/// Remote store living in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RefCell<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================
    // Seeding and inspection
    // ========================

    pub fn add_generation(&self, generation: Generation) {
        self.state.borrow_mut().generations.insert(generation.id.clone(), generation);
    }

    /// Insert a committed shot directly, bypassing call accounting
    pub fn seed_shot(&self, project_id: &str, name: &str, position: i64) -> Shot {
        let mut state = self.state.borrow_mut();
        let id = state.mint("shot");
        let shot = Shot {
            id: RecordId::committed(id.clone()),
            project_id: project_id.to_string(),
            name: name.to_string(),
            position,
            aspect_ratio: None,
        };
        state.shots.insert(id, shot.clone());
        shot
    }

    /// Insert a committed entry directly, bypassing call accounting
    pub fn seed_entry(&self, shot: &Shot, generation_id: &str, position: Option<i64>) -> RemoteResult<Entry> {
        let mut state = self.state.borrow_mut();
        let generation = state
            .generations
            .get(generation_id)
            .cloned()
            .ok_or_else(|| RemoteError::not_found(format!("generation {} not found", generation_id)))?;
        let id = state.mint("entry");
        let entry = Entry {
            id: RecordId::committed(id.clone()),
            shot_id: shot.id.clone(),
            generation,
            position,
            metadata: serde_json::Value::Null,
        };
        state.entries.insert(id, entry.clone());
        Ok(entry)
    }

    /// Make the next remote call fail with `err`
    pub fn fail_next(&self, err: RemoteError) {
        self.state.borrow_mut().failures.push_back(err);
    }

    /// Make the next call named `call` fail with `err`
    pub fn fail_call(&self, call: &str, err: RemoteError) {
        self.state.borrow_mut().targeted.push((call.to_string(), err));
    }

    /// Keep the next call suspended for `yields` extra scheduler turns
    pub fn delay_next(&self, yields: usize) {
        self.state.borrow_mut().delays.push_back(yields);
    }

    /// Names of the calls received so far
    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    pub fn stored_entries(&self, shot_id: &str) -> Vec<Entry> {
        self.state.borrow().shot_entries(shot_id)
    }

    pub fn stored_shot(&self, shot_id: &str) -> Option<Shot> {
        self.state.borrow().shots.get(shot_id).cloned()
    }

    async fn enter(&self, call: &str) -> RemoteResult<()> {
        let delay = self.state.borrow_mut().delays.pop_front().unwrap_or(0);
        for _ in 0..=delay {
            tokio::task::yield_now().await;
        }
        let mut state = self.state.borrow_mut();
        state.calls.push(call.to_string());
        if let Some(index) = state.targeted.iter().position(|(name, _)| name == call) {
            let (_, err) = state.targeted.remove(index);
            debug!("[memory] failing {}: {}", call, err);
            return Err(err);
        }
        match state.failures.pop_front() {
            Some(err) => {
                debug!("[memory] failing {}: {}", call, err);
                Err(err)
            }
            None => Ok(()),
        }
    }
}

fn entry_not_found(entry_id: &str) -> RemoteError {
    RemoteError::not_found(format!("entry {} not found", entry_id))
}

#[async_trait(?Send)]
impl RemoteStore for MemoryStore {
    async fn fetch_shots(&self, project_id: &str) -> RemoteResult<Vec<ShotView>> {
        self.enter("fetch_shots").await?;
        let state = self.state.borrow();
        let mut views: Vec<ShotView> = state
            .shots
            .values()
            .filter(|s| s.project_id == project_id)
            .map(|shot| ShotView {
                shot: shot.clone(),
                entries: state.shot_entries(shot.id.as_str()),
            })
            .collect();
        models::sort_shots(&mut views);
        Ok(views)
    }

    async fn fetch_shot(&self, shot_id: &str) -> RemoteResult<Option<Shot>> {
        self.enter("fetch_shot").await?;
        Ok(self.state.borrow().shots.get(shot_id).cloned())
    }

    async fn fetch_entries(&self, shot_id: &str) -> RemoteResult<Vec<Entry>> {
        self.enter("fetch_entries").await?;
        Ok(self.state.borrow().shot_entries(shot_id))
    }

    async fn fetch_entry(&self, entry_id: &str) -> RemoteResult<Option<Entry>> {
        self.enter("fetch_entry").await?;
        Ok(self.state.borrow().entries.get(entry_id).cloned())
    }

    async fn create_shot(&self, draft: &ShotDraft) -> RemoteResult<Shot> {
        self.enter("create_shot").await?;
        let mut state = self.state.borrow_mut();
        let id = state.mint("shot");
        let shot = Shot {
            id: RecordId::committed(id.clone()),
            project_id: draft.project_id.clone(),
            name: draft.name.clone(),
            position: draft.position,
            aspect_ratio: draft.aspect_ratio.clone(),
        };
        state.shots.insert(id, shot.clone());
        Ok(shot)
    }

    async fn duplicate_shot(&self, shot_id: &str, draft: &ShotDraft) -> RemoteResult<ShotView> {
        self.enter("duplicate_shot").await?;
        let mut state = self.state.borrow_mut();
        if !state.shots.contains_key(shot_id) {
            return Err(RemoteError::not_found(format!("shot {} not found", shot_id)));
        }
        let new_id = state.mint("shot");
        let shot = Shot {
            id: RecordId::committed(new_id.clone()),
            project_id: draft.project_id.clone(),
            name: draft.name.clone(),
            position: draft.position,
            aspect_ratio: draft.aspect_ratio.clone(),
        };
        state.shots.insert(new_id, shot.clone());

        let mut copies = Vec::new();
        for source in state.shot_entries(shot_id) {
            let id = state.mint("entry");
            let copy = Entry {
                id: RecordId::committed(id.clone()),
                shot_id: shot.id.clone(),
                ..source
            };
            state.entries.insert(id, copy.clone());
            copies.push(copy);
        }
        Ok(ShotView { shot, entries: copies })
    }

    async fn delete_shot(&self, shot_id: &str) -> RemoteResult<()> {
        self.enter("delete_shot").await?;
        let mut state = self.state.borrow_mut();
        state.shots.remove(shot_id);
        state.entries.retain(|_, e| e.shot_id.as_str() != shot_id);
        Ok(())
    }

    async fn set_shot_position(&self, shot_id: &str, position: i64) -> RemoteResult<Shot> {
        self.enter("set_shot_position").await?;
        let mut state = self.state.borrow_mut();
        let shot = state
            .shots
            .get_mut(shot_id)
            .ok_or_else(|| RemoteError::not_found(format!("shot {} not found", shot_id)))?;
        shot.position = position;
        Ok(shot.clone())
    }

    async fn insert_entry_at(
        &self,
        shot_id: &str,
        generation_id: &str,
        position: Option<i64>,
    ) -> RemoteResult<Entry> {
        self.enter("insert_entry_at").await?;
        let mut state = self.state.borrow_mut();
        if !state.shots.contains_key(shot_id) {
            return Err(RemoteError::not_found(format!("shot {} not found", shot_id)));
        }
        let generation = state
            .generations
            .get(generation_id)
            .cloned()
            .ok_or_else(|| RemoteError::not_found(format!("generation {} not found", generation_id)))?;
        state.check_free(shot_id, position, None)?;

        let id = state.mint("entry");
        let entry = Entry {
            id: RecordId::committed(id.clone()),
            shot_id: RecordId::committed(shot_id),
            generation,
            position,
            metadata: serde_json::Value::Null,
        };
        state.entries.insert(id, entry.clone());
        Ok(entry)
    }

    async fn set_entry_position(&self, entry_id: &str, position: Option<i64>) -> RemoteResult<Entry> {
        self.enter("set_entry_position").await?;
        let mut state = self.state.borrow_mut();
        let shot_id = match state.entries.get(entry_id) {
            Some(entry) => entry.shot_id.as_str().to_string(),
            None => return Err(entry_not_found(entry_id)),
        };
        state.check_free(&shot_id, position, Some(entry_id))?;
        let entry = state.entries.get_mut(entry_id).ok_or_else(|| entry_not_found(entry_id))?;
        entry.position = position;
        Ok(entry.clone())
    }

    async fn duplicate_entry(&self, entry_id: &str, position: i64) -> RemoteResult<Entry> {
        self.enter("duplicate_entry").await?;
        let mut state = self.state.borrow_mut();
        let source = state.entries.get(entry_id).cloned().ok_or_else(|| entry_not_found(entry_id))?;
        state.check_free(source.shot_id.as_str(), Some(position), None)?;
        let id = state.mint("entry");
        let copy = Entry {
            id: RecordId::committed(id.clone()),
            position: Some(position),
            ..source
        };
        state.entries.insert(id, copy.clone());
        Ok(copy)
    }

    async fn delete_entry(&self, entry_id: &str) -> RemoteResult<()> {
        self.enter("delete_entry").await?;
        self.state.borrow_mut().entries.remove(entry_id);
        Ok(())
    }
}

#[async_trait(?Send)]
impl GenerationProvider for MemoryStore {
    // Queued failures are reserved for store calls
    async fn generation(&self, generation_id: &str) -> RemoteResult<Option<Generation>> {
        tokio::task::yield_now().await;
        Ok(self.state.borrow().generations.get(generation_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GenerationKind;

    fn store_with_generation() -> MemoryStore {
        let store = MemoryStore::new();
        store.add_generation(Generation::new("g1", "https://cdn/g1.png", GenerationKind::Image));
        store
    }

    #[tokio::test]
    async fn test_insert_rejects_taken_position() {
        let store = store_with_generation();
        let shot = store.seed_shot("p1", "Opening", 0);
        store.seed_entry(&shot, "g1", Some(60)).unwrap();

        let err = store.insert_entry_at(shot.id.as_str(), "g1", Some(60)).await.unwrap_err();
        assert!(err.message.contains("unique constraint"));

        // unpositioned entries never collide
        store.insert_entry_at(shot.id.as_str(), "g1", None).await.unwrap();
        store.insert_entry_at(shot.id.as_str(), "g1", None).await.unwrap();
        assert_eq!(store.stored_entries(shot.id.as_str()).len(), 3);
    }

    #[tokio::test]
    async fn test_queued_failure_hits_next_call_only() {
        let store = store_with_generation();
        let shot = store.seed_shot("p1", "Opening", 0);
        store.fail_next(RemoteError::new("network down"));

        assert!(store.fetch_entries(shot.id.as_str()).await.is_err());
        assert!(store.fetch_entries(shot.id.as_str()).await.is_ok());
        assert_eq!(store.calls(), vec!["fetch_entries", "fetch_entries"]);
    }

    #[tokio::test]
    async fn test_targeted_failure_waits_for_its_call() {
        let store = store_with_generation();
        let shot = store.seed_shot("p1", "Opening", 0);
        store.fail_call("insert_entry_at", RemoteError::new("503 Service Unavailable"));

        assert!(store.fetch_entries(shot.id.as_str()).await.is_ok());
        assert!(store.insert_entry_at(shot.id.as_str(), "g1", Some(0)).await.is_err());
        assert!(store.insert_entry_at(shot.id.as_str(), "g1", Some(0)).await.is_ok());
    }

    #[tokio::test]
    async fn test_single_record_fetches() {
        let store = store_with_generation();
        let shot = store.seed_shot("p1", "Opening", 0);
        let entry = store.seed_entry(&shot, "g1", Some(60)).unwrap();

        assert_eq!(store.fetch_shot(shot.id.as_str()).await.unwrap(), Some(shot));
        assert_eq!(store.fetch_entry(entry.id.as_str()).await.unwrap(), Some(entry));
        assert_eq!(store.fetch_shot("shot-404").await.unwrap(), None);
        assert_eq!(store.fetch_entry("entry-404").await.unwrap(), None);
        assert_eq!(store.calls(), vec!["fetch_shot", "fetch_entry", "fetch_shot", "fetch_entry"]);
    }

    #[tokio::test]
    async fn test_duplicate_shot_copies_entries() {
        let store = store_with_generation();
        let shot = store.seed_shot("p1", "Opening", 0);
        store.seed_entry(&shot, "g1", Some(0)).unwrap();
        store.seed_entry(&shot, "g1", None).unwrap();

        let draft = ShotDraft {
            project_id: "p1".into(),
            name: "Opening (copy)".into(),
            position: 30,
            aspect_ratio: None,
        };
        let copy = store.duplicate_shot(shot.id.as_str(), &draft).await.unwrap();
        assert_eq!(copy.entries.len(), 2);
        assert!(copy.entries.iter().all(|e| e.shot_id == copy.shot.id));
        assert_eq!(store.stored_entries(shot.id.as_str()).len(), 2);
    }

    #[tokio::test]
    async fn test_delete_shot_is_idempotent() {
        let store = store_with_generation();
        let shot = store.seed_shot("p1", "Opening", 0);
        store.delete_shot(shot.id.as_str()).await.unwrap();
        store.delete_shot(shot.id.as_str()).await.unwrap();
        assert!(store.stored_shot(shot.id.as_str()).is_none());
    }
}
