//! Identity Reconciler
//!
//! Swaps a temporary id for the server-issued one in every projection that
//! holds it. Records are patched where they sit; nothing is removed and
//! reinserted, so list indices (and UI keys derived from them) stay put.

use log::debug;

use crate::cache::{CacheKey, CacheStore, Projection};
use crate::models::{Entry, RecordId, Shot};

/// Patch every copy of entry `local_id` with the confirmed record's id,
/// foreign keys and authoritative position. Returns the number of copies
/// patched.
pub fn reconcile_entry(store: &mut CacheStore, local_id: &RecordId, confirmed: &Entry) -> usize {
    let mut patched = 0;
    for (_, projection) in store.projections_mut() {
        for entry in projection.entries_mut() {
            if &entry.id == local_id {
                entry.id = confirmed.id.clone();
                entry.shot_id = confirmed.shot_id.clone();
                entry.position = confirmed.position;
                entry.metadata = confirmed.metadata.clone();
                patched += 1;
            }
        }
    }

    if local_id != &confirmed.id {
        store.rekey(
            &CacheKey::EntryRecord(local_id.clone()),
            CacheKey::EntryRecord(confirmed.id.clone()),
        );
    }

    debug!("[reconcile] entry {} -> {} ({} copies)", local_id, confirmed.id, patched);
    patched
}

/// Patch every copy of shot `local_id`, re-point its entries and re-key its
/// entry list. Returns the number of shot views patched.
pub fn reconcile_shot(store: &mut CacheStore, local_id: &RecordId, confirmed: &Shot) -> usize {
    let mut patched = 0;
    for (_, projection) in store.projections_mut() {
        if let Projection::Shots(views) = &mut *projection {
            for view in views.iter_mut().filter(|v| &v.shot.id == local_id) {
                view.shot.id = confirmed.id.clone();
                view.shot.position = confirmed.position;
                patched += 1;
            }
        }
        for entry in projection.entries_mut() {
            if &entry.shot_id == local_id {
                entry.shot_id = confirmed.id.clone();
            }
        }
    }

    if local_id != &confirmed.id {
        store.rekey(
            &CacheKey::ShotEntries(local_id.clone()),
            CacheKey::ShotEntries(confirmed.id.clone()),
        );
    }

    debug!("[reconcile] shot {} -> {} ({} views)", local_id, confirmed.id, patched);
    patched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Generation, GenerationKind, ShotView};

    fn make_entry(id: RecordId, shot: RecordId, position: Option<i64>) -> Entry {
        Entry {
            id,
            shot_id: shot,
            generation: Generation::new("g1", "https://cdn/g1.png", GenerationKind::Image),
            position,
            metadata: serde_json::Value::Null,
        }
    }

    fn make_shot(id: RecordId, position: i64) -> Shot {
        Shot {
            id,
            project_id: "p1".into(),
            name: "Opening".into(),
            position,
            aspect_ratio: Some("16:9".into()),
        }
    }

    #[test]
    fn test_entry_keeps_its_index_in_every_view() {
        let shot = RecordId::committed("s1");
        let temp = RecordId::temporary();
        let mut store = CacheStore::new();
        let list_key = CacheKey::ShotEntries(shot.clone());
        let project_key = CacheKey::project_shots("p1", None);
        let entries = vec![
            make_entry(RecordId::committed("e1"), shot.clone(), Some(0)),
            make_entry(temp.clone(), shot.clone(), Some(30)),
            make_entry(RecordId::committed("e2"), shot.clone(), Some(60)),
        ];
        store.set(list_key.clone(), Projection::Entries(entries.clone()));
        store.set(
            project_key.clone(),
            Projection::Shots(vec![ShotView { shot: make_shot(shot.clone(), 0), entries }]),
        );
        store.set(
            CacheKey::EntryRecord(temp.clone()),
            Projection::Entry(make_entry(temp.clone(), shot.clone(), Some(30))),
        );

        let confirmed = make_entry(RecordId::committed("e9"), shot.clone(), Some(31));
        assert_eq!(reconcile_entry(&mut store, &temp, &confirmed), 3);

        let list = store.entries(&list_key).unwrap();
        assert_eq!(list[1].id, confirmed.id);
        assert_eq!(list[1].position, Some(31));
        assert_eq!(store.shots(&project_key).unwrap()[0].entries[1].id, confirmed.id);
        assert!(store.entry(&CacheKey::EntryRecord(confirmed.id.clone())).is_some());
        assert!(!store.contains(&CacheKey::EntryRecord(temp)));
    }

    #[test]
    fn test_shot_reconcile_repoints_entries() {
        let temp = RecordId::temporary();
        let mut store = CacheStore::new();
        let project_key = CacheKey::project_shots("p1", Some(3));
        let entry = make_entry(RecordId::temporary(), temp.clone(), Some(0));
        store.set(
            project_key.clone(),
            Projection::Shots(vec![
                ShotView { shot: make_shot(RecordId::committed("s0"), 0), entries: vec![] },
                ShotView { shot: make_shot(temp.clone(), 1), entries: vec![entry.clone()] },
            ]),
        );
        store.set(CacheKey::ShotEntries(temp.clone()), Projection::Entries(vec![entry]));

        let confirmed = make_shot(RecordId::committed("s7"), 1);
        assert_eq!(reconcile_shot(&mut store, &temp, &confirmed), 1);

        let views = store.shots(&project_key).unwrap();
        assert_eq!(views[1].shot.id, confirmed.id);
        assert_eq!(views[1].entries[0].shot_id, confirmed.id);
        let list = store.entries(&CacheKey::ShotEntries(confirmed.id.clone())).unwrap();
        assert_eq!(list[0].shot_id, confirmed.id);
        assert!(!store.contains(&CacheKey::ShotEntries(temp)));
    }
}
