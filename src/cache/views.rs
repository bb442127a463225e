//! View Builders
//!
//! Derive capped and aggregate views from full per-shot entry lists.

use std::collections::HashSet;

use super::key::{CacheKey, Projection};
use super::store::CacheStore;
use crate::models::{self, Entry, RecordId, ShotView};

/// Entry list as a capped view shows it. With a cap only positioned entries
/// are kept; without one the full list (unpositioned last) is returned.
pub fn capped_entries(full: &[Entry], cap: Option<usize>) -> Vec<Entry> {
    match cap {
        Some(cap) => models::timeline(full).into_iter().take(cap).collect(),
        None => {
            let mut entries = full.to_vec();
            models::sort_entries(&mut entries);
            entries
        }
    }
}

/// Shots ordered by their own position, entries capped per view
pub fn build_shot_views(full: &[ShotView], cap: Option<usize>) -> Vec<ShotView> {
    let mut views: Vec<ShotView> = full
        .iter()
        .map(|view| ShotView {
            shot: view.shot.clone(),
            entries: capped_entries(&view.entries, cap),
        })
        .collect();
    models::sort_shots(&mut views);
    views
}

/// Project-level keys whose views contain `shot_id`
pub fn project_keys_for_shot(store: &CacheStore, shot_id: &RecordId) -> Vec<CacheKey> {
    store.keys_where(|key| {
        matches!(key, CacheKey::ProjectShots { .. })
            && store
                .shots(key)
                .is_some_and(|views| views.iter().any(|v| &v.shot.id == shot_id))
    })
}

/// Re-derive the entries of `shot_id` inside every project view from the
/// shot's full entry list. Does nothing if the full list is not cached.
pub fn sync_project_views(store: &mut CacheStore, shot_id: &RecordId) {
    let Some(full) = store.entries(&CacheKey::ShotEntries(shot_id.clone())).cloned() else {
        return;
    };
    for key in project_keys_for_shot(store, shot_id) {
        let cap = match &key {
            CacheKey::ProjectShots { entry_cap, .. } => *entry_cap,
            _ => None,
        };
        store.update_shots(&key, |views| {
            if let Some(view) = views.iter_mut().find(|v| &v.shot.id == shot_id) {
                view.entries = capped_entries(&full, cap);
            }
        });
    }
}

/// Every cached entry referencing `generation_id`, one per entry id
pub fn generation_usage(store: &CacheStore, generation_id: &str) -> Vec<Entry> {
    let mut seen: HashSet<RecordId> = HashSet::new();
    let mut usage = Vec::new();
    for key in store.keys_where(|k| matches!(k, CacheKey::ShotEntries(_))) {
        let Some(Projection::Entries(entries)) = store.get(&key) else {
            continue;
        };
        for entry in entries.iter().filter(|e| e.generation.id == generation_id) {
            if seen.insert(entry.id.clone()) {
                usage.push(entry.clone());
            }
        }
    }
    usage.sort_by(|a, b| a.shot_id.as_str().cmp(b.shot_id.as_str()).then(a.position.cmp(&b.position)));
    usage
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Generation, GenerationKind, Shot};

    fn make_entry(id: &str, shot: &str, generation: &str, position: Option<i64>) -> Entry {
        Entry {
            id: RecordId::committed(id),
            shot_id: RecordId::committed(shot),
            generation: Generation::new(generation, "https://cdn/x.png", GenerationKind::Image),
            position,
            metadata: serde_json::Value::Null,
        }
    }

    fn make_shot(id: &str, position: i64) -> Shot {
        Shot {
            id: RecordId::committed(id),
            project_id: "p1".into(),
            name: format!("Shot {}", id),
            position,
            aspect_ratio: None,
        }
    }

    #[test]
    fn test_capped_entries_drop_unpositioned() {
        let full = vec![
            make_entry("a", "s1", "g1", None),
            make_entry("b", "s1", "g2", Some(120)),
            make_entry("c", "s1", "g3", Some(0)),
            make_entry("d", "s1", "g4", Some(60)),
        ];
        let capped = capped_entries(&full, Some(2));
        let ids: Vec<&str> = capped.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d"]);

        let uncapped = capped_entries(&full, None);
        assert_eq!(uncapped.len(), 4);
        assert_eq!(uncapped[3].id.as_str(), "a");
    }

    #[test]
    fn test_build_shot_views_sorts_shots() {
        let full = vec![
            ShotView { shot: make_shot("s2", 1), entries: vec![] },
            ShotView { shot: make_shot("s1", 0), entries: vec![make_entry("a", "s1", "g1", Some(0))] },
        ];
        let views = build_shot_views(&full, Some(1));
        assert_eq!(views[0].shot.id.as_str(), "s1");
        assert_eq!(views[0].entries.len(), 1);
    }

    #[test]
    fn test_sync_project_views_follows_full_list() {
        let mut store = CacheStore::new();
        let shot_id = RecordId::committed("s1");
        let project_key = CacheKey::project_shots("p1", Some(1));
        store.set(
            project_key.clone(),
            Projection::Shots(vec![ShotView { shot: make_shot("s1", 0), entries: vec![] }]),
        );
        store.set(
            CacheKey::ShotEntries(shot_id.clone()),
            Projection::Entries(vec![
                make_entry("a", "s1", "g1", Some(60)),
                make_entry("b", "s1", "g2", Some(0)),
            ]),
        );

        sync_project_views(&mut store, &shot_id);

        let views = store.shots(&project_key).unwrap();
        assert_eq!(views[0].entries.len(), 1);
        assert_eq!(views[0].entries[0].id.as_str(), "b");
    }

    #[test]
    fn test_generation_usage_spans_shots() {
        let mut store = CacheStore::new();
        store.set(
            CacheKey::ShotEntries(RecordId::committed("s1")),
            Projection::Entries(vec![make_entry("a", "s1", "g1", Some(0)), make_entry("b", "s1", "g2", Some(60))]),
        );
        store.set(
            CacheKey::ShotEntries(RecordId::committed("s2")),
            Projection::Entries(vec![make_entry("c", "s2", "g1", None)]),
        );
        let usage = generation_usage(&store, "g1");
        let ids: Vec<&str> = usage.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }
}
