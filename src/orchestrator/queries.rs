//! Reads and Background Refetches
//!
//! Reads serve the cache when it holds a fresh value (or one a mutation is
//! managing) and fetch otherwise. Fetched values never overwrite held keys.

use log::debug;

use super::{find_entry, Orchestrator};
use crate::cache::{build_shot_views, generation_usage, sync_project_views, CacheKey, CacheStore, Projection};
use crate::error::{EngineError, EngineResult};
use crate::models::{self, Entry, RecordId, ShotView};

/// Cached value usable without a refetch
fn is_fresh(store: &CacheStore, key: &CacheKey) -> bool {
    store.contains(key) && (!store.is_stale(key) || store.is_held(key))
}

impl Orchestrator {
    /// Shots of a project in order. With `entry_cap` each shot carries at
    /// most that many timeline entries; without it every entry.
    pub async fn list_shots(&self, project_id: &str, entry_cap: Option<usize>) -> EngineResult<Vec<ShotView>> {
        let cap = entry_cap.or(self.config.default_entry_cap);
        let key = CacheKey::project_shots(project_id, cap);
        {
            let store = self.cache.borrow();
            if is_fresh(&store, &key) {
                if let Some(views) = store.shots(&key) {
                    return Ok(views.clone());
                }
            }
        }
        self.fetch_project(project_id, cap).await
    }

    /// Fetch a project and refresh every cached view of it. Returns the view
    /// for `cap` as the cache now shows it.
    pub(super) async fn fetch_project(&self, project_id: &str, cap: Option<usize>) -> EngineResult<Vec<ShotView>> {
        let full = self.remote.fetch_shots(project_id).await?;
        let mut store = self.cache.borrow_mut();

        let requested = CacheKey::project_shots(project_id, cap);
        let mut keys = store.keys_where(|k| k.is_project(project_id));
        if !keys.contains(&requested) {
            keys.push(requested.clone());
        }
        for key in keys {
            let key_cap = match &key {
                CacheKey::ProjectShots { entry_cap, .. } => *entry_cap,
                _ => None,
            };
            store.apply_fetched(key, Projection::Shots(build_shot_views(&full, key_cap)));
        }

        for view in &full {
            let list_key = CacheKey::ShotEntries(view.shot.id.clone());
            if !is_fresh(&store, &list_key) {
                let mut entries = view.entries.clone();
                models::sort_entries(&mut entries);
                store.apply_fetched(list_key, Projection::Entries(entries));
            }
        }
        debug!("[orchestrator] fetched {} shots of project {}", full.len(), project_id);

        Ok(store
            .shots(&requested)
            .cloned()
            .unwrap_or_else(|| build_shot_views(&full, cap)))
    }

    /// Every entry of a shot: timeline first, then unpositioned
    pub async fn list_entries(&self, shot_id: &RecordId) -> EngineResult<Vec<Entry>> {
        let key = CacheKey::ShotEntries(shot_id.clone());
        {
            let store = self.cache.borrow();
            if is_fresh(&store, &key) || shot_id.is_temporary() {
                return store
                    .entries(&key)
                    .cloned()
                    .ok_or_else(|| EngineError::NotFound(format!("shot {}", shot_id)));
            }
        }
        self.refresh(&key).await?;
        let entries = self.cache.borrow().entries(&key).cloned();
        entries.ok_or_else(|| EngineError::NotFound(format!("shot {}", shot_id)))
    }

    /// Positioned entries of a shot, ascending
    pub async fn timeline(&self, shot_id: &RecordId) -> EngineResult<Vec<Entry>> {
        Ok(models::timeline(&self.list_entries(shot_id).await?))
    }

    /// Entries of a shot that are off the timeline
    pub async fn unpositioned(&self, shot_id: &RecordId) -> EngineResult<Vec<Entry>> {
        Ok(models::unpositioned(&self.list_entries(shot_id).await?))
    }

    /// The most specific cached copy of an entry. Reading never changes the
    /// cache; `refresh` on an `EntryRecord` key stores one.
    pub fn entry(&self, entry_id: &RecordId) -> Option<Entry> {
        find_entry(&self.cache.borrow(), entry_id)
    }

    /// Every cached entry that shows `generation_id`, across shots
    pub fn generation_usage(&self, generation_id: &str) -> Vec<Entry> {
        let key = CacheKey::GenerationUsage(generation_id.to_string());
        let mut store = self.cache.borrow_mut();
        if is_fresh(&store, &key) {
            if let Some(usage) = store.entries(&key) {
                return usage.clone();
            }
        }
        let usage = generation_usage(&store, generation_id);
        store.set(key, Projection::Entries(usage.clone()));
        usage
    }

    /// Refetch the value behind `key`. Returns whether it was stored; a key
    /// held by an in-flight mutation keeps its current value.
    pub async fn refresh(&self, key: &CacheKey) -> EngineResult<bool> {
        match key {
            CacheKey::ProjectShots { project_id, entry_cap } => {
                let full = self.remote.fetch_shots(project_id).await?;
                Ok(self
                    .cache
                    .borrow_mut()
                    .apply_fetched(key.clone(), Projection::Shots(build_shot_views(&full, *entry_cap))))
            }
            CacheKey::ShotEntries(shot_id) => {
                let committed = shot_id
                    .as_committed()
                    .ok_or_else(|| EngineError::InvalidInput(format!("shot {} is still being saved", shot_id)))?;
                let mut entries = self.remote.fetch_entries(committed).await?;
                models::sort_entries(&mut entries);
                let mut store = self.cache.borrow_mut();
                let applied = store.apply_fetched(key.clone(), Projection::Entries(entries));
                if applied {
                    sync_project_views(&mut store, shot_id);
                }
                Ok(applied)
            }
            CacheKey::EntryRecord(entry_id) => {
                let listed = {
                    let store = self.cache.borrow();
                    store
                        .keys_where(|k| matches!(k, CacheKey::ShotEntries(_)))
                        .into_iter()
                        .find_map(|k| store.entries(&k).and_then(|l| l.iter().find(|e| &e.id == entry_id).cloned()))
                };
                let entry = match (listed, entry_id.as_committed()) {
                    (Some(entry), _) => entry,
                    (None, Some(committed)) => match self.remote.fetch_entry(committed).await? {
                        Some(entry) => entry,
                        None => return Ok(false),
                    },
                    (None, None) => return Ok(false),
                };
                Ok(self
                    .cache
                    .borrow_mut()
                    .apply_fetched(key.clone(), Projection::Entry(entry)))
            }
            CacheKey::GenerationUsage(generation_id) => {
                let mut store = self.cache.borrow_mut();
                let usage = generation_usage(&store, generation_id);
                Ok(store.apply_fetched(key.clone(), Projection::Entries(usage)))
            }
        }
    }
}
