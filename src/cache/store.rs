//! Keyed Projection Store
//!
//! Only the orchestrator and the reconciler write here; UI code reads.

use log::debug;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::key::{CacheKey, Projection};
use crate::models::{Entry, ShotView};

/// Single-threaded handle shared by the orchestrator and its readers
pub type SharedCache = Rc<RefCell<CacheStore>>;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheSlot {
    pub value: Projection,
    /// Marked for lazy refetch; the value is still served
    pub stale: bool,
}

/// Captured state of a set of keys, restorable verbatim
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    saved: Vec<(CacheKey, Option<CacheSlot>)>,
}

impl Snapshot {
    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.saved.iter().map(|(key, _)| key)
    }

    pub fn len(&self) -> usize {
        self.saved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.saved.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct CacheStore {
    slots: HashMap<CacheKey, CacheSlot>,
    /// Number of in-flight mutations managing each key
    holds: HashMap<CacheKey, usize>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedCache {
        Rc::new(RefCell::new(Self::new()))
    }

    // ========================
    // Reads
    // ========================

    pub fn get(&self, key: &CacheKey) -> Option<&Projection> {
        self.slots.get(key).map(|slot| &slot.value)
    }

    pub fn slot(&self, key: &CacheKey) -> Option<&CacheSlot> {
        self.slots.get(key)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.slots.contains_key(key)
    }

    pub fn is_stale(&self, key: &CacheKey) -> bool {
        self.slots.get(key).is_some_and(|slot| slot.stale)
    }

    pub fn shots(&self, key: &CacheKey) -> Option<&Vec<ShotView>> {
        self.get(key).and_then(Projection::as_shots)
    }

    pub fn entries(&self, key: &CacheKey) -> Option<&Vec<Entry>> {
        self.get(key).and_then(Projection::as_entries)
    }

    pub fn entry(&self, key: &CacheKey) -> Option<&Entry> {
        self.get(key).and_then(Projection::as_entry)
    }

    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.slots.keys()
    }

    pub fn keys_where(&self, pred: impl Fn(&CacheKey) -> bool) -> Vec<CacheKey> {
        self.slots.keys().filter(|k| pred(k)).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    // ========================
    // Writes
    // ========================

    /// Store a fresh value
    pub fn set(&mut self, key: CacheKey, value: Projection) {
        self.slots.insert(key, CacheSlot { value, stale: false });
    }

    pub fn remove(&mut self, key: &CacheKey) -> Option<CacheSlot> {
        self.slots.remove(key)
    }

    /// Mutate a stored projection in place; returns false when absent
    pub fn update(&mut self, key: &CacheKey, f: impl FnOnce(&mut Projection)) -> bool {
        match self.slots.get_mut(key) {
            Some(slot) => {
                f(&mut slot.value);
                true
            }
            None => false,
        }
    }

    pub fn update_entries(&mut self, key: &CacheKey, f: impl FnOnce(&mut Vec<Entry>)) -> bool {
        match self.slots.get_mut(key).map(|slot| &mut slot.value) {
            Some(Projection::Entries(entries)) => {
                f(entries);
                true
            }
            _ => false,
        }
    }

    pub fn update_shots(&mut self, key: &CacheKey, f: impl FnOnce(&mut Vec<ShotView>)) -> bool {
        match self.slots.get_mut(key).map(|slot| &mut slot.value) {
            Some(Projection::Shots(views)) => {
                f(views);
                true
            }
            _ => false,
        }
    }

    /// Every stored projection, for in-place patching across views
    pub fn projections_mut(&mut self) -> impl Iterator<Item = (&CacheKey, &mut Projection)> {
        self.slots.iter_mut().map(|(key, slot)| (key, &mut slot.value))
    }

    /// Move a slot (and its holds) to a new key
    pub fn rekey(&mut self, from: &CacheKey, to: CacheKey) {
        if let Some(slot) = self.slots.remove(from) {
            self.slots.insert(to.clone(), slot);
        }
        if let Some(count) = self.holds.remove(from) {
            *self.holds.entry(to).or_insert(0) += count;
        }
    }

    pub fn invalidate(&mut self, key: &CacheKey) {
        if let Some(slot) = self.slots.get_mut(key) {
            slot.stale = true;
        }
    }

    pub fn invalidate_where(&mut self, pred: impl Fn(&CacheKey) -> bool) -> usize {
        let mut count = 0;
        for (key, slot) in self.slots.iter_mut() {
            if pred(key) {
                slot.stale = true;
                count += 1;
            }
        }
        count
    }

    // ========================
    // Snapshots
    // ========================

    /// Capture the current state of `keys`, including their absence
    pub fn snapshot<'a>(&self, keys: impl IntoIterator<Item = &'a CacheKey>) -> Snapshot {
        let mut saved: Vec<(CacheKey, Option<CacheSlot>)> = Vec::new();
        for key in keys {
            if saved.iter().any(|(k, _)| k == key) {
                continue;
            }
            saved.push((key.clone(), self.slots.get(key).cloned()));
        }
        Snapshot { saved }
    }

    /// Put every captured key back exactly as it was
    pub fn restore(&mut self, snapshot: Snapshot) {
        debug!("[cache] restoring {} keys", snapshot.len());
        for (key, slot) in snapshot.saved {
            match slot {
                Some(slot) => {
                    self.slots.insert(key, slot);
                }
                None => {
                    self.slots.remove(&key);
                }
            }
        }
    }

    // ========================
    // Refetch suppression
    // ========================

    pub fn hold<'a>(&mut self, keys: impl IntoIterator<Item = &'a CacheKey>) {
        for key in keys {
            *self.holds.entry(key.clone()).or_insert(0) += 1;
        }
    }

    pub fn release<'a>(&mut self, keys: impl IntoIterator<Item = &'a CacheKey>) {
        for key in keys {
            if let Some(count) = self.holds.get_mut(key) {
                *count -= 1;
                if *count == 0 {
                    self.holds.remove(key);
                }
            }
        }
    }

    pub fn is_held(&self, key: &CacheKey) -> bool {
        self.holds.contains_key(key)
    }

    /// Store the result of a background refetch unless a mutation is
    /// currently managing the key. Returns whether the value was applied.
    pub fn apply_fetched(&mut self, key: CacheKey, value: Projection) -> bool {
        if self.is_held(&key) {
            debug!("[cache] dropping refetch of held key {:?}", key);
            return false;
        }
        self.set(key, value);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Generation, GenerationKind, RecordId};

    fn make_entry(id: &str, position: Option<i64>) -> Entry {
        Entry {
            id: RecordId::committed(id),
            shot_id: RecordId::committed("s1"),
            generation: Generation::new("g1", "https://cdn/g1.png", GenerationKind::Image),
            position,
            metadata: serde_json::Value::Null,
        }
    }

    fn shot_key() -> CacheKey {
        CacheKey::ShotEntries(RecordId::committed("s1"))
    }

    #[test]
    fn test_snapshot_restores_values_and_absence() {
        let mut store = CacheStore::new();
        store.set(shot_key(), Projection::Entries(vec![make_entry("e1", Some(0))]));
        let record_key = CacheKey::EntryRecord(RecordId::committed("e2"));

        let snapshot = store.snapshot([&shot_key(), &record_key]);
        store.update_entries(&shot_key(), |entries| entries.push(make_entry("e2", Some(60))));
        store.set(record_key.clone(), Projection::Entry(make_entry("e2", Some(60))));

        store.restore(snapshot);
        assert_eq!(store.entries(&shot_key()).map(Vec::len), Some(1));
        assert!(!store.contains(&record_key));
    }

    #[test]
    fn test_snapshot_keeps_stale_flag() {
        let mut store = CacheStore::new();
        store.set(shot_key(), Projection::Entries(vec![]));
        store.invalidate(&shot_key());
        let snapshot = store.snapshot([&shot_key()]);
        store.set(shot_key(), Projection::Entries(vec![make_entry("e1", None)]));
        store.restore(snapshot);
        assert!(store.is_stale(&shot_key()));
        assert_eq!(store.entries(&shot_key()).map(Vec::len), Some(0));
    }

    #[test]
    fn test_held_key_suppresses_refetch() {
        let mut store = CacheStore::new();
        store.set(shot_key(), Projection::Entries(vec![make_entry("e1", Some(0))]));
        store.hold([&shot_key()]);
        assert!(!store.apply_fetched(shot_key(), Projection::Entries(vec![])));
        assert_eq!(store.entries(&shot_key()).map(Vec::len), Some(1));

        store.release([&shot_key()]);
        assert!(store.apply_fetched(shot_key(), Projection::Entries(vec![])));
        assert_eq!(store.entries(&shot_key()).map(Vec::len), Some(0));
    }

    #[test]
    fn test_nested_holds_need_matching_releases() {
        let mut store = CacheStore::new();
        store.hold([&shot_key()]);
        store.hold([&shot_key()]);
        store.release([&shot_key()]);
        assert!(store.is_held(&shot_key()));
        store.release([&shot_key()]);
        assert!(!store.is_held(&shot_key()));
    }

    #[test]
    fn test_rekey_moves_slot_and_holds() {
        let mut store = CacheStore::new();
        let temp = CacheKey::ShotEntries(RecordId::Temporary("temp-1".into()));
        store.set(temp.clone(), Projection::Entries(vec![]));
        store.hold([&temp]);
        store.rekey(&temp, shot_key());
        assert!(!store.contains(&temp));
        assert!(store.contains(&shot_key()));
        assert!(store.is_held(&shot_key()));
    }
}
