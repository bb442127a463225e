//! Mutation Orchestrator
//!
//! Every shot and entry mutation runs through one lifecycle:
//! - Pending: inputs resolved against the cache as it is right now
//! - Optimistic: touched keys snapshotted, the result written to every
//!   projection and the keys held against background refetches
//! - Committed: the remote result reconciled in place
//! - RolledBack: the snapshot restored and a single notice sent
//!
//! Operations are split into:
//! - shots: create, duplicate, delete, reorder
//! - entries: add, soft remove, position, move, duplicate, delete
//! - batch: multi-entry reposition and respacing
//! - queries: reads and refetches

mod batch;
mod entries;
mod mutation;
mod queries;
mod shots;


use log::{debug, warn};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::future::Future;
use std::rc::Rc;

use crate::cache::{project_keys_for_shot, sync_project_views, CacheKey, CacheStore, Projection, SharedCache};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::{self, Entry, Generation, RecordId, Shot, ShotView};
use crate::notify::{NotificationSink, Notice};
use crate::position::PositionPolicy;
use crate::remote::{GenerationProvider, RemoteStore};

use mutation::InFlight;
pub use mutation::{MutationJournal, MutationRecord, MutationState};

/// Drives mutations against the cache and the remote store
pub struct Orchestrator {
    cache: SharedCache,
    remote: Rc<dyn RemoteStore>,
    generations: Rc<dyn GenerationProvider>,
    notifier: Rc<dyn NotificationSink>,
    config: EngineConfig,
    policy: PositionPolicy,
    journal: RefCell<MutationJournal>,
}

impl Orchestrator {
    pub fn new(
        remote: Rc<dyn RemoteStore>,
        generations: Rc<dyn GenerationProvider>,
        notifier: Rc<dyn NotificationSink>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            cache: CacheStore::shared(),
            remote,
            generations,
            notifier,
            policy: config.position_policy(),
            config,
            journal: RefCell::new(MutationJournal::default()),
        })
    }

    /// Share an existing store instead of a fresh one
    pub fn with_cache(mut self, cache: SharedCache) -> Self {
        self.cache = cache;
        self
    }

    /// Handle for readers; writes belong to the orchestrator
    pub fn cache(&self) -> SharedCache {
        Rc::clone(&self.cache)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn journal(&self) -> Vec<MutationRecord> {
        self.journal.borrow().records()
    }

    pub fn last_mutation(&self) -> Option<MutationRecord> {
        self.journal.borrow().records().pop()
    }

    // ========================
    // Lifecycle
    // ========================

    fn start(&self, action: &'static str) -> u64 {
        let id = self.journal.borrow_mut().begin(action);
        debug!("[orchestrator] #{} {} pending", id, action);
        id
    }

    /// Run the Pending phase; any error settles the mutation as rolled back
    async fn pending<T>(
        &self,
        id: u64,
        action: &'static str,
        phase: impl Future<Output = EngineResult<T>>,
    ) -> EngineResult<T> {
        phase.await.map_err(|err| self.fail(id, action, err))
    }

    /// Pending -> Optimistic.
    ///
    /// `touched` lists the keys to snapshot and hold, read from the store as
    /// it is now. `apply` writes the optimistic state; if it fails (an
    /// allocation error, say) the snapshot is put back before returning.
    fn optimistic<T>(
        &self,
        id: u64,
        action: &'static str,
        touched: impl FnOnce(&CacheStore) -> Vec<CacheKey>,
        apply: impl FnOnce(&mut CacheStore) -> EngineResult<T>,
    ) -> EngineResult<(InFlight, T)> {
        let mut store = self.cache.borrow_mut();
        let keys = touched(&store);
        let snapshot = store.snapshot(&keys);
        match apply(&mut store) {
            Ok(value) => {
                store.hold(&keys);
                drop(store);
                self.journal.borrow_mut().advance(id, MutationState::Optimistic);
                debug!("[orchestrator] #{} {} optimistic over {} keys", id, action, keys.len());
                Ok((
                    InFlight {
                        id,
                        action,
                        snapshot,
                        held: keys,
                    },
                    value,
                ))
            }
            Err(err) => {
                store.restore(snapshot);
                drop(store);
                Err(self.fail(id, action, err))
            }
        }
    }

    /// Optimistic -> Committed
    fn commit<T>(&self, flight: InFlight, reconcile: impl FnOnce(&mut CacheStore) -> T) -> T {
        let value = {
            let mut store = self.cache.borrow_mut();
            store.release(&flight.held);
            let value = reconcile(&mut store);
            store.invalidate_where(|key| matches!(key, CacheKey::GenerationUsage(_)));
            value
        };
        self.journal.borrow_mut().advance(flight.id, MutationState::Committed);
        debug!("[orchestrator] #{} {} committed", flight.id, flight.action);
        value
    }

    /// Optimistic -> RolledBack
    fn rollback(&self, flight: InFlight, err: EngineError) -> EngineError {
        {
            let mut store = self.cache.borrow_mut();
            store.release(&flight.held);
            store.restore(flight.snapshot);
        }
        self.fail(flight.id, flight.action, err)
    }

    fn fail(&self, id: u64, action: &str, err: EngineError) -> EngineError {
        self.journal.borrow_mut().advance(id, MutationState::RolledBack);
        warn!("[orchestrator] #{} {} failed: {}", id, action, err);
        self.notifier.notify(&Notice::from_error(action, &err));
        err
    }

    // ========================
    // Pending-phase resolution
    // ========================

    async fn resolve_generation(&self, generation_id: &str) -> EngineResult<Generation> {
        self.generations
            .generation(generation_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("generation {}", generation_id)))
    }

    /// Make sure the full entry list of `shot_id` is cached
    async fn ensure_entries(&self, shot_id: &RecordId) -> EngineResult<()> {
        if self.cache.borrow().contains(&CacheKey::ShotEntries(shot_id.clone())) {
            return Ok(());
        }
        let committed = committed_id(shot_id, "shot")?;
        let fetched = self.remote.fetch_entries(committed).await?;
        let mut store = self.cache.borrow_mut();
        if store.apply_fetched(CacheKey::ShotEntries(shot_id.clone()), Projection::Entries(fetched)) {
            sync_project_views(&mut store, shot_id);
        }
        Ok(())
    }

    /// Make sure at least one view of the project's shots is cached
    async fn ensure_project(&self, project_id: &str) -> EngineResult<()> {
        if !self.cache.borrow().keys_where(|k| k.is_project(project_id)).is_empty() {
            return Ok(());
        }
        self.fetch_project(project_id, None).await?;
        Ok(())
    }

    /// Entry `entry_id` from the cache, or from the remote store when no
    /// cached projection shows it
    async fn locate_entry(&self, entry_id: &RecordId) -> EngineResult<Entry> {
        let committed = committed_id(entry_id, "entry")?;
        let cached = find_entry(&self.cache.borrow(), entry_id);
        match cached {
            Some(entry) => Ok(entry),
            None => self
                .remote
                .fetch_entry(committed)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("entry {}", entry_id))),
        }
    }

    /// Committed entry `entry_id` with its shot's full list cached and
    /// showing it
    async fn entry_for_update(&self, entry_id: &RecordId) -> EngineResult<Entry> {
        let entry = self.locate_entry(entry_id).await?;
        self.ensure_entries(&entry.shot_id).await?;
        let key = CacheKey::ShotEntries(entry.shot_id.clone());
        let listed = self
            .cache
            .borrow()
            .entries(&key)
            .is_some_and(|entries| entries.iter().any(|e| &e.id == entry_id));
        if !listed {
            self.refresh(&key).await?;
        }
        let current = find_entry(&self.cache.borrow(), entry_id);
        Ok(current.unwrap_or(entry))
    }

    /// Shot `shot_id` from a cached project view. On a miss the shot is
    /// fetched and its project loaded so that later phases find it too.
    async fn shot_for_update(&self, shot_id: &RecordId) -> EngineResult<Shot> {
        let committed = committed_id(shot_id, "shot")?;
        let cached = find_shot(&self.cache.borrow(), shot_id);
        if let Some(shot) = cached {
            return Ok(shot);
        }
        let shot = self
            .remote
            .fetch_shot(committed)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("shot {}", shot_id)))?;
        self.fetch_project(&shot.project_id, None).await?;
        let current = find_shot(&self.cache.borrow(), shot_id);
        Ok(current.unwrap_or(shot))
    }
}

// ========================
// Cache helpers
// ========================

/// Server id of a committed record; temporary records cannot be sent yet
fn committed_id<'a>(id: &'a RecordId, what: &str) -> EngineResult<&'a str> {
    id.as_committed()
        .ok_or_else(|| EngineError::InvalidInput(format!("{} {} is still being saved", what, id)))
}

/// Most specific cached copy of an entry
fn find_entry(store: &CacheStore, entry_id: &RecordId) -> Option<Entry> {
    if let Some(entry) = store.entry(&CacheKey::EntryRecord(entry_id.clone())) {
        return Some(entry.clone());
    }
    let lists = store.keys_where(|k| matches!(k, CacheKey::ShotEntries(_)));
    let projects = store.keys_where(|k| matches!(k, CacheKey::ProjectShots { .. }));
    lists.iter().chain(projects.iter()).find_map(|key| {
        store
            .get(key)
            .and_then(|p| p.entries().into_iter().find(|e| &e.id == entry_id).cloned())
    })
}

/// Shot `shot_id` as any cached project view shows it
fn find_shot(store: &CacheStore, shot_id: &RecordId) -> Option<Shot> {
    store
        .keys_where(|k| matches!(k, CacheKey::ProjectShots { .. }))
        .iter()
        .filter_map(|key| store.shots(key))
        .find_map(|views| views.iter().find(|v| &v.shot.id == shot_id).map(|v| v.shot.clone()))
}

fn current_entries(store: &CacheStore, shot_id: &RecordId) -> EngineResult<Vec<Entry>> {
    store
        .entries(&CacheKey::ShotEntries(shot_id.clone()))
        .cloned()
        .ok_or_else(|| EngineError::NotFound(format!("entries of shot {}", shot_id)))
}

/// Keys that show the entries of `shot_id`
fn entry_keys(store: &CacheStore, shot_id: &RecordId) -> Vec<CacheKey> {
    let mut keys = vec![CacheKey::ShotEntries(shot_id.clone())];
    keys.extend(project_keys_for_shot(store, shot_id));
    keys
}

/// Single-entry records of entries belonging to `shot_id`
fn record_keys(store: &CacheStore, shot_id: &RecordId) -> Vec<CacheKey> {
    store.keys_where(|k| {
        matches!(k, CacheKey::EntryRecord(_)) && store.entry(k).is_some_and(|e| &e.shot_id == shot_id)
    })
}

fn shot_positions(store: &CacheStore, project_id: &str) -> BTreeSet<i64> {
    store
        .keys_where(|k| k.is_project(project_id))
        .iter()
        .filter_map(|key| store.shots(key))
        .flat_map(|views| views.iter().map(|v| v.shot.position))
        .collect()
}

/// Replace the full list of a shot and re-derive its project views
fn write_entries(store: &mut CacheStore, shot_id: &RecordId, entries: Vec<Entry>) {
    store.set(CacheKey::ShotEntries(shot_id.clone()), Projection::Entries(entries));
    sync_project_views(store, shot_id);
}

/// Insert a new entry where its position belongs and record it
fn insert_entry(store: &mut CacheStore, entry: &Entry) {
    let key = CacheKey::ShotEntries(entry.shot_id.clone());
    store.update_entries(&key, |entries| {
        let index = models::insertion_index(entries, entry.position);
        entries.insert(index, entry.clone());
    });
    sync_project_views(store, &entry.shot_id);
    store.set(CacheKey::EntryRecord(entry.id.clone()), Projection::Entry(entry.clone()));
}

/// Refresh an existing single-entry record; absent records stay absent
fn touch_record(store: &mut CacheStore, entry: &Entry) {
    store.update(&CacheKey::EntryRecord(entry.id.clone()), |projection| {
        *projection = Projection::Entry(entry.clone());
    });
}

/// Add a shot view to every cached view of its project, keeping shot order
fn insert_shot_view(store: &mut CacheStore, view: &ShotView) {
    for key in store.keys_where(|k| k.is_project(&view.shot.project_id)) {
        let cap = match &key {
            CacheKey::ProjectShots { entry_cap, .. } => *entry_cap,
            _ => None,
        };
        let capped = ShotView {
            shot: view.shot.clone(),
            entries: crate::cache::capped_entries(&view.entries, cap),
        };
        store.update_shots(&key, |views| {
            let index = views
                .iter()
                .position(|v| v.shot.position > capped.shot.position)
                .unwrap_or(views.len());
            views.insert(index, capped);
        });
    }
}
