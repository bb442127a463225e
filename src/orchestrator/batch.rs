//! Batch Repositioning
//!
//! Several entries change keys in one mutation. The cache moves them all at
//! once; the remote store receives one update per entry.

use std::collections::HashSet;

use super::mutation::InFlight;
use super::{committed_id, current_entries, entry_keys, record_keys, touch_record, write_entries, Orchestrator};
use crate::cache::{CacheKey, CacheStore};
use crate::error::{EngineError, EngineResult};
use crate::models::{self, Entry, Placement, RecordId};
use crate::position::plan_renumber;
use crate::reconcile::reconcile_entry;

const REPOSITION: &str = "reposition items";
const RENUMBER: &str = "respace timeline";

/// One entry moving to a new key
#[derive(Debug, Clone, PartialEq)]
struct Move {
    entry_id: RecordId,
    shot_id: RecordId,
    from: Option<i64>,
    to: i64,
}

impl Move {
    fn is_noop(&self) -> bool {
        self.from == Some(self.to)
    }
}

impl Orchestrator {
    /// Place generations at explicit keys. Each placement moves the first
    /// entry of the shot (timeline order, then unpositioned) showing that
    /// generation. Two placements on one key of one shot are rejected before
    /// anything changes.
    pub async fn reposition_entries(&self, placements: Vec<Placement>) -> EngineResult<Vec<Entry>> {
        if placements.is_empty() {
            return Ok(Vec::new());
        }
        let id = self.start(REPOSITION);
        let shots = distinct_shots(placements.iter().map(|p| &p.shot_id));
        self.pending(id, REPOSITION, async {
            check_batch(&placements)?;
            for shot_id in &shots {
                committed_id(shot_id, "shot")?;
                self.ensure_entries(shot_id).await?;
            }
            Ok(())
        })
        .await?;

        let (flight, moves) = self.optimistic(
            id,
            REPOSITION,
            |store| batch_keys(store, &shots),
            |store| {
                let moves = resolve_placements(store, &placements)?;
                apply_moves(store, &moves)?;
                Ok(moves)
            },
        )?;
        self.push_moves(flight, moves).await
    }

    /// Respace the timeline of a shot to `0, step, 2*step, ...` keeping order
    pub async fn renumber_shot(&self, shot_id: &RecordId) -> EngineResult<Vec<Entry>> {
        let id = self.start(RENUMBER);
        self.pending(id, RENUMBER, async {
            committed_id(shot_id, "shot")?;
            self.ensure_entries(shot_id).await
        })
        .await?;

        let policy = self.policy;
        let shots = vec![shot_id.clone()];
        let (flight, moves) = self.optimistic(
            id,
            RENUMBER,
            |store| batch_keys(store, &shots),
            |store| {
                let timeline = models::timeline(&current_entries(store, shot_id)?);
                let moves: Vec<Move> = timeline
                    .iter()
                    .zip(plan_renumber(timeline.len(), &policy))
                    .map(|(entry, to)| Move {
                        entry_id: entry.id.clone(),
                        shot_id: shot_id.clone(),
                        from: entry.position,
                        to,
                    })
                    .filter(|m| !m.is_noop())
                    .collect();
                apply_moves(store, &moves)?;
                Ok(moves)
            },
        )?;
        self.push_moves(flight, moves).await
    }

    /// Send the moves one by one. An entry whose current key is another
    /// move's target is cleared first, so the store never sees two entries
    /// on one key.
    async fn push_moves(&self, flight: InFlight, moves: Vec<Move>) -> EngineResult<Vec<Entry>> {
        let targets: HashSet<(&RecordId, i64)> = moves.iter().map(|m| (&m.shot_id, m.to)).collect();
        let blocking = moves.iter().filter(|m| {
            !m.is_noop() && m.from.is_some_and(|from| targets.contains(&(&m.shot_id, from)))
        });
        for m in blocking {
            if let Err(err) = self.remote.set_entry_position(m.entry_id.as_str(), None).await {
                return Err(self.rollback(flight, err.into()));
            }
        }

        let mut confirmed = Vec::with_capacity(moves.len());
        for m in moves.iter().filter(|m| !m.is_noop()) {
            match self.remote.set_entry_position(m.entry_id.as_str(), Some(m.to)).await {
                Ok(entry) => confirmed.push(entry),
                Err(err) => return Err(self.rollback(flight, err.into())),
            }
        }

        Ok(self.commit(flight, |store| {
            for entry in &confirmed {
                reconcile_entry(store, &entry.id, entry);
            }
            confirmed
        }))
    }
}

fn distinct_shots<'a>(ids: impl Iterator<Item = &'a RecordId>) -> Vec<RecordId> {
    let mut shots: Vec<RecordId> = Vec::new();
    for id in ids {
        if !shots.contains(id) {
            shots.push(id.clone());
        }
    }
    shots
}

fn check_batch(placements: &[Placement]) -> EngineResult<()> {
    let mut seen: HashSet<(&RecordId, i64)> = HashSet::new();
    for placement in placements {
        if !seen.insert((&placement.shot_id, placement.position)) {
            return Err(EngineError::BatchCollision {
                shot_id: placement.shot_id.to_string(),
                position: placement.position,
            });
        }
    }
    Ok(())
}

fn batch_keys(store: &CacheStore, shots: &[RecordId]) -> Vec<CacheKey> {
    shots
        .iter()
        .flat_map(|shot_id| {
            let mut keys = entry_keys(store, shot_id);
            keys.extend(record_keys(store, shot_id));
            keys
        })
        .collect()
}

fn resolve_placements(store: &CacheStore, placements: &[Placement]) -> EngineResult<Vec<Move>> {
    let mut chosen: HashSet<RecordId> = HashSet::new();
    let mut moves = Vec::with_capacity(placements.len());
    for placement in placements {
        let entries = current_entries(store, &placement.shot_id)?;
        let entry = models::timeline(&entries)
            .into_iter()
            .chain(models::unpositioned(&entries))
            .filter(|e| e.generation.id == placement.generation_id)
            .find(|e| !chosen.contains(&e.id))
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "generation {} in shot {}",
                    placement.generation_id, placement.shot_id
                ))
            })?;
        chosen.insert(entry.id.clone());
        moves.push(Move {
            entry_id: entry.id,
            shot_id: placement.shot_id.clone(),
            from: entry.position,
            to: placement.position,
        });
    }
    Ok(moves)
}

/// Write every move into the cache; the resulting timelines must stay free
/// of duplicate keys
fn apply_moves(store: &mut CacheStore, moves: &[Move]) -> EngineResult<()> {
    for shot_id in distinct_shots(moves.iter().map(|m| &m.shot_id)) {
        let mut entries = current_entries(store, &shot_id)?;
        for m in moves.iter().filter(|m| m.shot_id == shot_id) {
            if let Some(entry) = entries.iter_mut().find(|e| e.id == m.entry_id) {
                entry.position = Some(m.to);
            }
        }

        let mut seen = HashSet::new();
        if let Some(position) = entries.iter().filter_map(|e| e.position).find(|p| !seen.insert(*p)) {
            return Err(EngineError::BatchCollision {
                shot_id: shot_id.to_string(),
                position,
            });
        }

        models::sort_entries(&mut entries);
        let moved: Vec<Entry> = entries
            .iter()
            .filter(|e| moves.iter().any(|m| m.entry_id == e.id))
            .cloned()
            .collect();
        write_entries(store, &shot_id, entries);
        for entry in &moved {
            touch_record(store, entry);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placement(shot: &str, generation: &str, position: i64) -> Placement {
        Placement {
            shot_id: RecordId::committed(shot),
            generation_id: generation.into(),
            position,
        }
    }

    #[test]
    fn test_check_batch_rejects_same_key_in_one_shot() {
        let batch = vec![placement("s1", "g1", 0), placement("s1", "g2", 0)];
        assert!(matches!(
            check_batch(&batch),
            Err(EngineError::BatchCollision { position: 0, .. })
        ));
    }

    #[test]
    fn test_check_batch_allows_same_key_across_shots() {
        let batch = vec![placement("s1", "g1", 0), placement("s2", "g1", 0)];
        assert!(check_batch(&batch).is_ok());
    }

    #[test]
    fn test_distinct_shots_keeps_first_seen_order() {
        let ids = [RecordId::committed("b"), RecordId::committed("a"), RecordId::committed("b")];
        let shots = distinct_shots(ids.iter());
        assert_eq!(shots, vec![RecordId::committed("b"), RecordId::committed("a")]);
    }
}
