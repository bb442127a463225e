//! Entry Mutations

use std::collections::BTreeSet;

use super::{committed_id, current_entries, entry_keys, insert_entry, touch_record, write_entries, Orchestrator};
use crate::cache::{sync_project_views, CacheKey, CacheStore, Projection};
use crate::error::{EngineError, EngineResult};
use crate::models::{self, Entry, RecordId};
use crate::position::{allocate, occupied_positions, successor, Intent};
use crate::reconcile::reconcile_entry;

const ADD_TO_SHOT: &str = "add to shot";
const ADD_UNPOSITIONED: &str = "add to shot without position";
const REMOVE_FROM_TIMELINE: &str = "remove from timeline";
const POSITION_ENTRY: &str = "add to timeline";
const MOVE_ENTRY: &str = "move item";
const DUPLICATE_ENTRY: &str = "duplicate item";
const DELETE_ENTRY: &str = "delete item";

impl Orchestrator {
    /// Add a generation to a shot's timeline, at `position` (or the next free
    /// key above it) or after the last entry.
    pub async fn add_generation(
        &self,
        shot_id: &RecordId,
        generation_id: &str,
        position: Option<i64>,
    ) -> EngineResult<Entry> {
        let intent = match position {
            Some(position) => Intent::Explicit(position),
            None => Intent::Append,
        };
        self.insert_generation(ADD_TO_SHOT, shot_id, generation_id, Some(intent))
            .await
    }

    /// Add a generation to a shot without placing it on the timeline
    pub async fn add_generation_unpositioned(&self, shot_id: &RecordId, generation_id: &str) -> EngineResult<Entry> {
        self.insert_generation(ADD_UNPOSITIONED, shot_id, generation_id, None)
            .await
    }

    async fn insert_generation(
        &self,
        action: &'static str,
        shot_id: &RecordId,
        generation_id: &str,
        intent: Option<Intent>,
    ) -> EngineResult<Entry> {
        let id = self.start(action);
        let generation = self
            .pending(id, action, async {
                committed_id(shot_id, "shot")?;
                let generation = self.resolve_generation(generation_id).await?;
                self.ensure_entries(shot_id).await?;
                Ok(generation)
            })
            .await?;

        let local = Entry::optimistic(shot_id.clone(), generation, None);
        let local_id = local.id.clone();
        let policy = self.policy;
        let (flight, local) = self.optimistic(
            id,
            action,
            |store| {
                let mut keys = entry_keys(store, shot_id);
                keys.push(CacheKey::EntryRecord(local_id.clone()));
                keys
            },
            |store| {
                let mut entry = local;
                if let Some(intent) = intent {
                    let occupied = occupied_positions(&current_entries(store, shot_id)?);
                    entry.position = Some(allocate(&occupied, intent, &policy)?);
                }
                insert_entry(store, &entry);
                Ok(entry)
            },
        )?;

        match self.remote.insert_entry_at(shot_id.as_str(), generation_id, local.position).await {
            Ok(confirmed) => Ok(self.commit(flight, |store| {
                reconcile_entry(store, &local_id, &confirmed);
                confirmed
            })),
            Err(err) => Err(self.rollback(flight, err.into())),
        }
    }

    /// Take an entry off the timeline; it stays in the shot
    pub async fn unposition_entry(&self, entry_id: &RecordId) -> EngineResult<Entry> {
        let id = self.start(REMOVE_FROM_TIMELINE);
        let entry = self.pending(id, REMOVE_FROM_TIMELINE, self.entry_for_update(entry_id)).await?;
        self.reposition_one(id, REMOVE_FROM_TIMELINE, &entry, |_, _| Ok(None))
            .await
    }

    /// Put an unpositioned entry on the timeline after the last entry
    pub async fn position_entry(&self, entry_id: &RecordId) -> EngineResult<Entry> {
        let id = self.start(POSITION_ENTRY);
        let entry = self
            .pending(id, POSITION_ENTRY, async {
                let entry = self.entry_for_update(entry_id).await?;
                if entry.is_positioned() {
                    return Err(EngineError::InvalidInput(format!("entry {} is already on the timeline", entry_id)));
                }
                Ok(entry)
            })
            .await?;
        let policy = self.policy;
        self.reposition_one(id, POSITION_ENTRY, &entry, |_, occupied| {
            Ok(Some(allocate(occupied, Intent::Append, &policy)?))
        })
        .await
    }

    /// Move an entry between `prev` and `next` (or just after `prev`)
    pub async fn move_entry(&self, entry_id: &RecordId, prev: i64, next: Option<i64>) -> EngineResult<Entry> {
        let id = self.start(MOVE_ENTRY);
        let entry = self.pending(id, MOVE_ENTRY, self.entry_for_update(entry_id)).await?;
        let policy = self.policy;
        self.reposition_one(id, MOVE_ENTRY, &entry, |_, occupied| {
            Ok(Some(allocate(occupied, Intent::Between { prev, next }, &policy)?))
        })
        .await
    }

    /// Give one entry a new key computed from the current state of its shot.
    ///
    /// `target` receives the entry as cached now and the keys occupied by
    /// the other entries of the shot.
    async fn reposition_one(
        &self,
        id: u64,
        action: &'static str,
        entry: &Entry,
        target: impl FnOnce(&Entry, &BTreeSet<i64>) -> EngineResult<Option<i64>>,
    ) -> EngineResult<Entry> {
        let (flight, updated) = self.optimistic(
            id,
            action,
            |store| {
                let mut keys = entry_keys(store, &entry.shot_id);
                keys.push(CacheKey::EntryRecord(entry.id.clone()));
                keys
            },
            |store| {
                let mut entries = current_entries(store, &entry.shot_id)?;
                let index = entries
                    .iter()
                    .position(|e| e.id == entry.id)
                    .ok_or_else(|| EngineError::NotFound(format!("entry {}", entry.id)))?;
                let mut current = entries.remove(index);
                current.position = target(&current, &occupied_positions(&entries))?;

                let index = models::insertion_index(&entries, current.position);
                entries.insert(index, current.clone());
                write_entries(store, &entry.shot_id, entries);
                touch_record(store, &current);
                Ok(current)
            },
        )?;

        match self.remote.set_entry_position(entry.id.as_str(), updated.position).await {
            Ok(confirmed) => Ok(self.commit(flight, |store| {
                reconcile_entry(store, &updated.id, &confirmed);
                confirmed
            })),
            Err(err) => Err(self.rollback(flight, err.into())),
        }
    }

    /// Copy an entry into the slot between it and its successor
    pub async fn duplicate_entry(&self, entry_id: &RecordId) -> EngineResult<Entry> {
        let id = self.start(DUPLICATE_ENTRY);
        let source = self
            .pending(id, DUPLICATE_ENTRY, async {
                let source = self.entry_for_update(entry_id).await?;
                if !source.is_positioned() {
                    return Err(EngineError::InvalidInput(format!("entry {} is not on the timeline", entry_id)));
                }
                Ok(source)
            })
            .await?;

        let local_id = RecordId::temporary();
        let policy = self.policy;
        let (flight, position) = self.optimistic(
            id,
            DUPLICATE_ENTRY,
            |store| {
                let mut keys = entry_keys(store, &source.shot_id);
                keys.push(CacheKey::EntryRecord(local_id.clone()));
                keys
            },
            |store| {
                let entries = current_entries(store, &source.shot_id)?;
                let current = entries
                    .iter()
                    .find(|e| e.id == source.id)
                    .ok_or_else(|| EngineError::NotFound(format!("entry {}", source.id)))?;
                let prev = current
                    .position
                    .ok_or_else(|| EngineError::InvalidInput(format!("entry {} is not on the timeline", source.id)))?;
                let occupied = occupied_positions(&entries);
                let position = allocate(
                    &occupied,
                    Intent::Between {
                        prev,
                        next: successor(&occupied, prev),
                    },
                    &policy,
                )?;
                let copy = Entry {
                    id: local_id.clone(),
                    position: Some(position),
                    ..current.clone()
                };
                insert_entry(store, &copy);
                Ok(position)
            },
        )?;

        match self.remote.duplicate_entry(source.id.as_str(), position).await {
            Ok(confirmed) => Ok(self.commit(flight, |store| {
                reconcile_entry(store, &local_id, &confirmed);
                confirmed
            })),
            Err(err) => Err(self.rollback(flight, err.into())),
        }
    }

    /// Remove an entry from its shot altogether
    pub async fn delete_entry(&self, entry_id: &RecordId) -> EngineResult<()> {
        let id = self.start(DELETE_ENTRY);
        let entry = self
            .pending(id, DELETE_ENTRY, self.locate_entry(entry_id))
            .await?;

        let (flight, ()) = self.optimistic(
            id,
            DELETE_ENTRY,
            |store| {
                let mut keys = holding_keys(store, entry_id);
                keys.extend(entry_keys(store, &entry.shot_id));
                keys
            },
            |store| {
                for key in holding_keys(store, entry_id) {
                    store.update(&key, |projection| match projection {
                        Projection::Shots(views) => {
                            for view in views.iter_mut() {
                                view.entries.retain(|e| &e.id != entry_id);
                            }
                        }
                        Projection::Entries(entries) => entries.retain(|e| &e.id != entry_id),
                        Projection::Entry(_) => {}
                    });
                }
                store.remove(&CacheKey::EntryRecord(entry_id.clone()));
                sync_project_views(store, &entry.shot_id);
                Ok(())
            },
        )?;

        match self.remote.delete_entry(entry_id.as_str()).await {
            Ok(()) => {
                self.commit(flight, |_| ());
                Ok(())
            }
            Err(err) => Err(self.rollback(flight, err.into())),
        }
    }
}

/// Every key whose projection currently shows `entry_id`
fn holding_keys(store: &CacheStore, entry_id: &RecordId) -> Vec<CacheKey> {
    store.keys_where(|key| {
        store
            .get(key)
            .is_some_and(|projection| projection.entries().iter().any(|e| &e.id == entry_id))
    })
}
