//! Shot Mutations

use log::{info, warn};
use std::collections::BTreeSet;

use super::{
    committed_id, entry_keys, find_shot, insert_shot_view, record_keys, shot_positions, Orchestrator,
};
use crate::cache::{project_keys_for_shot, CacheKey, CacheStore, Projection};
use crate::error::{EngineError, EngineResult};
use crate::models::{self, Entry, RecordId, Shot, ShotView};
use crate::position::{allocate, successor, AllocationError, Intent};
use crate::reconcile::{reconcile_entry, reconcile_shot};
use crate::remote::ShotDraft;

const CREATE_SHOT: &str = "create shot";
const DUPLICATE_SHOT: &str = "duplicate shot";
const DELETE_SHOT: &str = "delete shot";
const REORDER_SHOTS: &str = "reorder shots";
const DROP_NEW_SHOT: &str = "create shot from generation";

impl Orchestrator {
    /// Create an empty shot. Without a position it goes after the last shot.
    pub async fn create_shot(
        &self,
        project_id: &str,
        name: &str,
        position: Option<i64>,
        aspect_ratio: Option<String>,
    ) -> EngineResult<Shot> {
        let id = self.start(CREATE_SHOT);
        self.pending(id, CREATE_SHOT, self.ensure_project(project_id)).await?;

        let local_id = RecordId::temporary();
        let policy = self.policy;
        let (flight, local) = self.optimistic(
            id,
            CREATE_SHOT,
            |store| {
                let mut keys = store.keys_where(|k| k.is_project(project_id));
                keys.push(CacheKey::ShotEntries(local_id.clone()));
                keys
            },
            |store| {
                let position = match position {
                    Some(position) => position,
                    None => allocate(&shot_positions(store, project_id), Intent::Append, &policy)?,
                };
                let shot = Shot {
                    id: local_id.clone(),
                    project_id: project_id.to_string(),
                    name: name.to_string(),
                    position,
                    aspect_ratio,
                };
                insert_shot_view(store, &ShotView { shot: shot.clone(), entries: vec![] });
                store.set(CacheKey::ShotEntries(local_id.clone()), Projection::Entries(vec![]));
                Ok(shot)
            },
        )?;

        let draft = draft_of(&local);
        match self.remote.create_shot(&draft).await {
            Ok(confirmed) => Ok(self.commit(flight, |store| {
                reconcile_shot(store, &local_id, &confirmed);
                confirmed
            })),
            Err(err) => Err(self.rollback(flight, err.into())),
        }
    }

    /// Copy a shot and all of its entries right after the source.
    ///
    /// The copy's key lies strictly between the source and its successor.
    /// When the two are adjacent, every later shot moves up one step first;
    /// those moves are stored before the copy is created.
    pub async fn duplicate_shot(&self, shot_id: &RecordId) -> EngineResult<ShotView> {
        let id = self.start(DUPLICATE_SHOT);
        let source = self
            .pending(id, DUPLICATE_SHOT, async {
                let source = self.shot_for_update(shot_id).await?;
                self.ensure_entries(shot_id).await?;
                Ok(source)
            })
            .await?;

        let local_shot = RecordId::temporary();
        let policy = self.policy;
        let suffix = self.config.copy_suffix.clone();
        let (flight, (local, shifted)) = self.optimistic(
            id,
            DUPLICATE_SHOT,
            |store| {
                let mut keys = store.keys_where(|k| k.is_project(&source.project_id));
                keys.push(CacheKey::ShotEntries(local_shot.clone()));
                keys
            },
            |store| {
                let source = find_shot(store, shot_id).unwrap_or_else(|| source.clone());
                let prev = source.position;
                let occupied = shot_positions(store, &source.project_id);
                let after = Intent::After {
                    prev,
                    next: successor(&occupied, prev),
                };
                let (position, shifted) = match allocate(&occupied, after, &policy) {
                    Ok(position) => (position, Vec::new()),
                    Err(AllocationError::NoGap { .. }) => {
                        let shifted = shift_shots_after(store, &source.project_id, prev, policy.step)?;
                        let occupied = shot_positions(store, &source.project_id);
                        let after = Intent::After {
                            prev,
                            next: successor(&occupied, prev),
                        };
                        (allocate(&occupied, after, &policy)?, shifted)
                    }
                    Err(err) => return Err(err.into()),
                };
                let entries: Vec<Entry> = super::current_entries(store, shot_id)?
                    .into_iter()
                    .map(|entry| Entry {
                        id: RecordId::temporary(),
                        shot_id: local_shot.clone(),
                        ..entry
                    })
                    .collect();
                let view = ShotView {
                    shot: Shot {
                        id: local_shot.clone(),
                        name: format!("{}{}", source.name, suffix),
                        position,
                        ..source
                    },
                    entries,
                };
                insert_shot_view(store, &view);
                store.set(CacheKey::ShotEntries(local_shot.clone()), Projection::Entries(view.entries.clone()));
                Ok((view, shifted))
            },
        )?;

        let mut moved = Vec::with_capacity(shifted.len());
        for (sibling, position) in shifted.iter().rev() {
            match self.remote.set_shot_position(sibling.as_str(), *position).await {
                Ok(shot) => moved.push(shot),
                Err(err) => return Err(self.rollback(flight, err.into())),
            }
        }
        if !moved.is_empty() {
            info!("[orchestrator] moved {} shots up to make room after shot {}", moved.len(), shot_id);
        }

        let draft = draft_of(&local.shot);
        match self.remote.duplicate_shot(shot_id.as_str(), &draft).await {
            Ok(confirmed) => Ok(self.commit(flight, |store| {
                for shot in &moved {
                    reconcile_shot(store, &shot.id, shot);
                }
                reconcile_shot(store, &local_shot, &confirmed.shot);
                {
                    let pairs = pair_entries(&local.entries, &confirmed.entries);
                    if pairs.len() == confirmed.entries.len() && pairs.len() == local.entries.len() {
                        for (local_entry, confirmed_entry) in pairs {
                            reconcile_entry(store, &local_entry.id, confirmed_entry);
                        }
                    } else {
                        // The source changed remotely; take the server's list
                        super::write_entries(store, &confirmed.shot.id, confirmed.entries.clone());
                    }
                }
                for key in store.keys_where(|k| k.is_project(&confirmed.shot.project_id)) {
                    store.update_shots(&key, |views| models::sort_shots(views));
                }
                confirmed
            })),
            Err(err) => Err(self.rollback(flight, err.into())),
        }
    }

    /// Remove a shot and its entries. Deleting a missing shot succeeds.
    pub async fn delete_shot(&self, shot_id: &RecordId) -> EngineResult<()> {
        let id = self.start(DELETE_SHOT);
        self.pending(id, DELETE_SHOT, async { committed_id(shot_id, "shot").map(|_| ()) })
            .await?;

        let (flight, ()) = self.optimistic(
            id,
            DELETE_SHOT,
            |store| {
                let mut keys = entry_keys(store, shot_id);
                keys.extend(record_keys(store, shot_id));
                keys
            },
            |store| {
                for key in project_keys_for_shot(store, shot_id) {
                    store.update_shots(&key, |views| views.retain(|v| &v.shot.id != shot_id));
                }
                for key in record_keys(store, shot_id) {
                    store.remove(&key);
                }
                store.remove(&CacheKey::ShotEntries(shot_id.clone()));
                Ok(())
            },
        )?;

        match self.remote.delete_shot(shot_id.as_str()).await {
            Ok(()) => {
                self.commit(flight, |_| ());
                Ok(())
            }
            Err(err) => Err(self.rollback(flight, err.into())),
        }
    }

    /// Give several shots new order keys at once.
    ///
    /// The cache moves all shots together. Remote updates are issued one at a
    /// time; a failure restores every shot in the cache even though earlier
    /// updates may already have been stored remotely.
    pub async fn reorder_shots(&self, project_id: &str, moves: Vec<(RecordId, i64)>) -> EngineResult<Vec<Shot>> {
        if moves.is_empty() {
            return Ok(Vec::new());
        }
        let id = self.start(REORDER_SHOTS);
        self.pending(id, REORDER_SHOTS, async {
            for (shot_id, _) in &moves {
                committed_id(shot_id, "shot")?;
            }
            self.ensure_project(project_id).await
        })
        .await?;

        let (flight, ()) = self.optimistic(
            id,
            REORDER_SHOTS,
            |store| store.keys_where(|k| k.is_project(project_id)),
            |store| {
                let keys = store.keys_where(|k| k.is_project(project_id));
                for (shot_id, _) in &moves {
                    let known = keys
                        .iter()
                        .filter_map(|key| store.shots(key))
                        .any(|views| views.iter().any(|v| &v.shot.id == shot_id));
                    if !known {
                        return Err(EngineError::NotFound(format!("shot {}", shot_id)));
                    }
                }
                for key in &keys {
                    store.update_shots(key, |views| {
                        for view in views.iter_mut() {
                            if let Some((_, position)) = moves.iter().find(|(shot, _)| shot == &view.shot.id) {
                                view.shot.position = *position;
                            }
                        }
                        models::sort_shots(views);
                    });
                }
                Ok(())
            },
        )?;

        let mut confirmed = Vec::with_capacity(moves.len());
        for (shot_id, position) in &moves {
            match self.remote.set_shot_position(shot_id.as_str(), *position).await {
                Ok(shot) => confirmed.push(shot),
                Err(err) => return Err(self.rollback(flight, err.into())),
            }
        }

        Ok(self.commit(flight, |store| {
            for shot in &confirmed {
                reconcile_shot(store, &shot.id, shot);
            }
            for key in store.keys_where(|k| k.is_project(project_id)) {
                store.update_shots(&key, |views| models::sort_shots(views));
            }
            confirmed
        }))
    }

    /// A generation dropped outside every shot: create a shot holding it.
    ///
    /// Both records appear at once. The shot is created first and the entry
    /// inserted into it; if the insert fails the new shot is deleted again.
    pub async fn drop_generation_new_shot(
        &self,
        project_id: &str,
        generation_id: &str,
        name: &str,
    ) -> EngineResult<ShotView> {
        let id = self.start(DROP_NEW_SHOT);
        let generation = self
            .pending(id, DROP_NEW_SHOT, async {
                self.ensure_project(project_id).await?;
                self.resolve_generation(generation_id).await
            })
            .await?;

        let local_shot = RecordId::temporary();
        let local_entry = Entry::optimistic(local_shot.clone(), generation, None);
        let local_entry_id = local_entry.id.clone();
        let policy = self.policy;
        let (flight, local) = self.optimistic(
            id,
            DROP_NEW_SHOT,
            |store| {
                let mut keys = store.keys_where(|k| k.is_project(project_id));
                keys.push(CacheKey::ShotEntries(local_shot.clone()));
                keys.push(CacheKey::EntryRecord(local_entry_id.clone()));
                keys
            },
            |store| {
                let position = allocate(&shot_positions(store, project_id), Intent::Append, &policy)?;
                let mut entry = local_entry;
                entry.position = Some(allocate(&BTreeSet::new(), Intent::Append, &policy)?);
                let view = ShotView {
                    shot: Shot {
                        id: local_shot.clone(),
                        project_id: project_id.to_string(),
                        name: name.to_string(),
                        position,
                        aspect_ratio: None,
                    },
                    entries: vec![entry.clone()],
                };
                insert_shot_view(store, &view);
                store.set(CacheKey::ShotEntries(local_shot.clone()), Projection::Entries(vec![entry.clone()]));
                store.set(CacheKey::EntryRecord(entry.id.clone()), Projection::Entry(entry));
                Ok(view)
            },
        )?;

        let shot = match self.remote.create_shot(&draft_of(&local.shot)).await {
            Ok(shot) => shot,
            Err(err) => return Err(self.rollback(flight, err.into())),
        };
        let entry = match self
            .remote
            .insert_entry_at(shot.id.as_str(), generation_id, local.entries.first().and_then(|e| e.position))
            .await
        {
            Ok(entry) => entry,
            Err(err) => {
                if let Err(cleanup) = self.remote.delete_shot(shot.id.as_str()).await {
                    warn!("[orchestrator] could not remove shot {} after failed insert: {}", shot.id, cleanup);
                }
                return Err(self.rollback(flight, err.into()));
            }
        };

        info!("[orchestrator] created shot {} from generation {}", shot.id, generation_id);
        Ok(self.commit(flight, |store| {
            reconcile_shot(store, &local.shot.id, &shot);
            reconcile_entry(store, &local_entry_id, &entry);
            ShotView {
                shot,
                entries: vec![entry],
            }
        }))
    }
}

/// Move every shot of the project above `prev` up by `step`, in every
/// cached view. Returns the moved shots with their new keys, ascending.
fn shift_shots_after(
    store: &mut CacheStore,
    project_id: &str,
    prev: i64,
    step: i64,
) -> EngineResult<Vec<(RecordId, i64)>> {
    let mut shifted: Vec<(RecordId, i64)> = Vec::new();
    for key in store.keys_where(|k| k.is_project(project_id)) {
        for view in store.shots(&key).into_iter().flatten() {
            if view.shot.position > prev && !shifted.iter().any(|(id, _)| id == &view.shot.id) {
                if view.shot.id.is_temporary() {
                    return Err(EngineError::InvalidInput(format!("shot {} is still being saved", view.shot.id)));
                }
                let position = view.shot.position.checked_add(step).ok_or(AllocationError::Overflow)?;
                shifted.push((view.shot.id.clone(), position));
            }
        }
    }
    shifted.sort_by_key(|(_, position)| *position);

    for key in store.keys_where(|k| k.is_project(project_id)) {
        store.update_shots(&key, |views| {
            for view in views.iter_mut() {
                if let Some((_, position)) = shifted.iter().find(|(id, _)| id == &view.shot.id) {
                    view.shot.position = *position;
                }
            }
        });
    }
    Ok(shifted)
}

fn draft_of(shot: &Shot) -> ShotDraft {
    ShotDraft {
        project_id: shot.project_id.clone(),
        name: shot.name.clone(),
        position: shot.position,
        aspect_ratio: shot.aspect_ratio.clone(),
    }
}

/// Match optimistic copies to the server's copies by generation and
/// position, falling back to list order
fn pair_entries<'a>(local: &'a [Entry], confirmed: &'a [Entry]) -> Vec<(&'a Entry, &'a Entry)> {
    let mut used = vec![false; confirmed.len()];
    let mut pairs = Vec::with_capacity(local.len());
    for (index, entry) in local.iter().enumerate() {
        let matched = confirmed
            .iter()
            .enumerate()
            .position(|(i, c)| !used[i] && c.generation.id == entry.generation.id && c.position == entry.position)
            .or_else(|| (index < confirmed.len() && !used[index]).then_some(index));
        if let Some(i) = matched {
            used[i] = true;
            pairs.push((entry, &confirmed[i]));
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Generation, GenerationKind};

    fn make_entry(generation: &str, position: Option<i64>) -> Entry {
        Entry {
            id: RecordId::temporary(),
            shot_id: RecordId::committed("s1"),
            generation: Generation::new(generation, "https://cdn/x.png", GenerationKind::Image),
            position,
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_pair_entries_prefers_generation_and_position() {
        let local = vec![make_entry("g1", Some(0)), make_entry("g2", Some(60))];
        let confirmed = vec![make_entry("g2", Some(60)), make_entry("g1", Some(0))];
        let pairs = pair_entries(&local, &confirmed);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].1.generation.id, "g1");
        assert_eq!(pairs[1].1.generation.id, "g2");
    }

    #[test]
    fn test_pair_entries_falls_back_to_order() {
        let local = vec![make_entry("g1", Some(0))];
        let confirmed = vec![make_entry("g1", Some(5))];
        let pairs = pair_entries(&local, &confirmed);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].1.position, Some(5));
    }
}
