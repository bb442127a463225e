//! SQLite Remote Store
//!
//! Serves the engine's `RemoteStore` and `GenerationProvider` contracts from
//! the repositories. Row ids travel as decimal strings.

use async_trait::async_trait;
use shotline::{
    Entry, Generation, GenerationProvider, RecordId, RemoteError, RemoteResult, RemoteStore, Shot, ShotDraft,
    ShotView,
};
use std::path::Path;

use crate::domain::{parse_row_id, DomainError};
use crate::repository::{
    init_db, EntryPositioningOperations, EntryRepository, GenerationRepository, Repository,
    SharedConnection, ShotRepository,
};

/// Remote store backed by a local SQLite database
pub struct SqliteStore {
    shots: ShotRepository,
    entries: EntryRepository,
    generations: GenerationRepository,
}

impl SqliteStore {
    pub fn new(conn: SharedConnection) -> Self {
        Self {
            shots: ShotRepository::new(conn.clone()),
            entries: EntryRepository::new(conn.clone()),
            generations: GenerationRepository::new(conn),
        }
    }

    /// Open (and migrate) the database at `path`
    pub async fn open(path: &Path) -> Result<Self, String> {
        let state = init_db(path).await?;
        Ok(Self::new(state.connection()))
    }

    pub fn shots(&self) -> &ShotRepository {
        &self.shots
    }

    pub fn entries(&self) -> &EntryRepository {
        &self.entries
    }

    pub fn generations(&self) -> &GenerationRepository {
        &self.generations
    }
}

/// Parse an id sent by the engine into a stored record id
fn record(raw: &str) -> RemoteResult<RecordId> {
    parse_row_id(raw)?;
    Ok(RecordId::committed(raw))
}

fn draft_shot(draft: &ShotDraft) -> Shot {
    Shot {
        id: RecordId::committed("0"),
        project_id: draft.project_id.clone(),
        name: draft.name.clone(),
        position: draft.position,
        aspect_ratio: draft.aspect_ratio.clone(),
    }
}

fn logged(call: &str, err: DomainError) -> RemoteError {
    log::warn!("[sqlite] {} failed: {}", call, err);
    err.into()
}

#[async_trait(?Send)]
impl RemoteStore for SqliteStore {
    async fn fetch_shots(&self, project_id: &str) -> RemoteResult<Vec<ShotView>> {
        let shots = self.shots.list_by_project(project_id).await?;
        let mut views = Vec::with_capacity(shots.len());
        for shot in shots {
            let entries = self.entries.list_by_shot(&shot.id).await?;
            views.push(ShotView { shot, entries });
        }
        Ok(views)
    }

    async fn fetch_shot(&self, shot_id: &str) -> RemoteResult<Option<Shot>> {
        Ok(self.shots.find_by_id(record(shot_id)?).await?)
    }

    async fn fetch_entries(&self, shot_id: &str) -> RemoteResult<Vec<Entry>> {
        Ok(self.entries.list_by_shot(&record(shot_id)?).await?)
    }

    async fn fetch_entry(&self, entry_id: &str) -> RemoteResult<Option<Entry>> {
        Ok(self.entries.find_by_id(record(entry_id)?).await?)
    }

    async fn create_shot(&self, draft: &ShotDraft) -> RemoteResult<Shot> {
        self.shots
            .create(&draft_shot(draft))
            .await
            .map_err(|e| logged("create_shot", e))
    }

    async fn duplicate_shot(&self, shot_id: &str, draft: &ShotDraft) -> RemoteResult<ShotView> {
        let source = record(shot_id)?;
        let shot = self
            .shots
            .duplicate(&source, &draft_shot(draft))
            .await
            .map_err(|e| logged("duplicate_shot", e))?;
        let entries = self.entries.list_by_shot(&shot.id).await?;
        Ok(ShotView { shot, entries })
    }

    async fn delete_shot(&self, shot_id: &str) -> RemoteResult<()> {
        Ok(self.shots.delete(record(shot_id)?).await?)
    }

    async fn set_shot_position(&self, shot_id: &str, position: i64) -> RemoteResult<Shot> {
        Ok(self.shots.set_position(&record(shot_id)?, position).await?)
    }

    async fn insert_entry_at(
        &self,
        shot_id: &str,
        generation_id: &str,
        position: Option<i64>,
    ) -> RemoteResult<Entry> {
        self.entries
            .insert_at(&record(shot_id)?, generation_id, position)
            .await
            .map_err(|e| logged("insert_entry_at", e))
    }

    async fn set_entry_position(&self, entry_id: &str, position: Option<i64>) -> RemoteResult<Entry> {
        self.entries
            .set_position(&record(entry_id)?, position)
            .await
            .map_err(|e| logged("set_entry_position", e))
    }

    async fn duplicate_entry(&self, entry_id: &str, position: i64) -> RemoteResult<Entry> {
        self.entries
            .duplicate_at(&record(entry_id)?, position)
            .await
            .map_err(|e| logged("duplicate_entry", e))
    }

    async fn delete_entry(&self, entry_id: &str) -> RemoteResult<()> {
        Ok(self.entries.delete(record(entry_id)?).await?)
    }
}

#[async_trait(?Send)]
impl GenerationProvider for SqliteStore {
    async fn generation(&self, generation_id: &str) -> RemoteResult<Option<Generation>> {
        Ok(self.generations.find_by_id(generation_id.to_string()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shotline::{EngineConfig, FailureKind, GenerationKind, Orchestrator, RecordingSink, RemoteErrorKind};
    use std::path::PathBuf;
    use std::rc::Rc;

    async fn setup_store() -> SqliteStore {
        let store = SqliteStore::open(&PathBuf::from(":memory:"))
            .await
            .expect("Failed to init test DB");
        for id in ["g1", "g2", "g3"] {
            let generation = Generation::new(id, format!("https://cdn/{}.png", id), GenerationKind::Image);
            store.generations().create(&generation).await.expect("seed generation");
        }
        store
    }

    fn draft(name: &str, position: i64) -> ShotDraft {
        ShotDraft {
            project_id: "p1".to_string(),
            name: name.to_string(),
            position,
            aspect_ratio: None,
        }
    }

    #[tokio::test]
    async fn test_taken_position_is_a_constraint_error() {
        let store = setup_store().await;
        let shot = store.create_shot(&draft("Opening", 0)).await.unwrap();

        store.insert_entry_at(shot.id.as_str(), "g1", Some(60)).await.unwrap();
        let err = store.insert_entry_at(shot.id.as_str(), "g2", Some(60)).await.unwrap_err();
        assert_eq!(err.kind, Some(RemoteErrorKind::Constraint));

        // NULL positions never collide
        store.insert_entry_at(shot.id.as_str(), "g2", None).await.unwrap();
        store.insert_entry_at(shot.id.as_str(), "g3", None).await.unwrap();
        assert_eq!(store.fetch_entries(shot.id.as_str()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_records_are_not_found() {
        let store = setup_store().await;
        let shot = store.create_shot(&draft("Opening", 0)).await.unwrap();

        let err = store.insert_entry_at(shot.id.as_str(), "nope", Some(0)).await.unwrap_err();
        assert_eq!(err.kind, Some(RemoteErrorKind::NotFound));

        let err = store.set_entry_position("999", Some(0)).await.unwrap_err();
        assert_eq!(err.kind, Some(RemoteErrorKind::NotFound));

        let err = store.fetch_entries("temp-abc").await.unwrap_err();
        assert_eq!(err.kind, Some(RemoteErrorKind::Other));
    }

    #[tokio::test]
    async fn test_entries_ordered_positioned_first() {
        let store = setup_store().await;
        let shot = store.create_shot(&draft("Opening", 0)).await.unwrap();
        store.insert_entry_at(shot.id.as_str(), "g1", None).await.unwrap();
        store.insert_entry_at(shot.id.as_str(), "g2", Some(60)).await.unwrap();
        store.insert_entry_at(shot.id.as_str(), "g3", Some(0)).await.unwrap();

        let entries = store.fetch_entries(shot.id.as_str()).await.unwrap();
        let generations: Vec<&str> = entries.iter().map(|e| e.generation.id.as_str()).collect();
        assert_eq!(generations, vec!["g3", "g2", "g1"]);
    }

    #[tokio::test]
    async fn test_duplicate_shot_and_delete_cascades() {
        let store = setup_store().await;
        let shot = store.create_shot(&draft("Opening", 0)).await.unwrap();
        store.insert_entry_at(shot.id.as_str(), "g1", Some(0)).await.unwrap();
        store.insert_entry_at(shot.id.as_str(), "g2", None).await.unwrap();

        let copy = store
            .duplicate_shot(shot.id.as_str(), &draft("Opening (copy)", 30))
            .await
            .unwrap();
        assert_ne!(copy.shot.id, shot.id);
        assert_eq!(copy.entries.len(), 2);
        assert_eq!(copy.entries[0].position, Some(0));
        assert!(copy.entries.iter().all(|e| e.shot_id == copy.shot.id));

        store.delete_shot(shot.id.as_str()).await.unwrap();
        store.delete_shot(shot.id.as_str()).await.unwrap();
        assert!(store.fetch_entries(shot.id.as_str()).await.unwrap().is_empty());
        assert_eq!(store.fetch_shots("p1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_engine_round_trip() {
        let store = Rc::new(setup_store().await);
        let sink = Rc::new(RecordingSink::new());
        let engine = Orchestrator::new(
            store.clone(),
            store.clone(),
            sink.clone(),
            EngineConfig::default(),
        )
        .unwrap();

        let shot = engine.create_shot("p1", "Opening", None, None).await.unwrap();
        assert!(!shot.id.is_temporary());

        engine.add_generation(&shot.id, "g1", None).await.unwrap();
        engine.add_generation(&shot.id, "g2", None).await.unwrap();
        let timeline = engine.timeline(&shot.id).await.unwrap();
        let positions: Vec<Option<i64>> = timeline.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![Some(0), Some(60)]);

        // A stale client picking a taken key gets bumped to the next free one
        let third = engine.add_generation(&shot.id, "g3", Some(60)).await.unwrap();
        assert_eq!(third.position, Some(61));

        let stored = store.fetch_entries(shot.id.as_str()).await.unwrap();
        assert_eq!(stored.len(), 3);
        assert!(sink.notices().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_single_records() {
        let store = setup_store().await;
        let shot = store.create_shot(&draft("Opening", 0)).await.unwrap();
        let entry = store.insert_entry_at(shot.id.as_str(), "g1", Some(60)).await.unwrap();

        assert_eq!(store.fetch_shot(shot.id.as_str()).await.unwrap(), Some(shot));
        let fetched = store.fetch_entry(entry.id.as_str()).await.unwrap().unwrap();
        assert_eq!(fetched.position, Some(60));
        assert_eq!(fetched.generation.id, "g1");

        assert_eq!(store.fetch_shot("999").await.unwrap(), None);
        assert_eq!(store.fetch_entry("999").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fresh_engine_mutates_records_it_never_listed() {
        let store = Rc::new(setup_store().await);
        let opening = store.create_shot(&draft("Opening", 0)).await.unwrap();
        store.create_shot(&draft("Closing", 1)).await.unwrap();
        let entry = store.insert_entry_at(opening.id.as_str(), "g1", Some(0)).await.unwrap();

        let sink = Rc::new(RecordingSink::new());
        let engine = Orchestrator::new(store.clone(), store.clone(), sink.clone(), EngineConfig::default()).unwrap();

        let copy = engine.duplicate_entry(&entry.id).await.unwrap();
        assert_eq!(copy.position, Some(30));
        let removed = engine.unposition_entry(&entry.id).await.unwrap();
        assert_eq!(removed.position, None);

        let shot_copy = engine.duplicate_shot(&opening.id).await.unwrap();
        assert!(shot_copy.shot.position > opening.position);
        let names: Vec<String> = store
            .fetch_shots("p1")
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.shot.name)
            .collect();
        assert_eq!(names, vec!["Opening", "Opening (copy)", "Closing"]);
        assert!(sink.notices().is_empty());
    }

    #[tokio::test]
    async fn test_engine_reports_missing_generation() {
        let store = Rc::new(setup_store().await);
        let sink = Rc::new(RecordingSink::new());
        let engine = Orchestrator::new(
            store.clone(),
            store.clone(),
            sink.clone(),
            EngineConfig::default(),
        )
        .unwrap();

        let shot = engine.create_shot("p1", "Opening", None, None).await.unwrap();
        assert!(engine.add_generation(&shot.id, "missing", None).await.is_err());

        let notices = sink.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].kind, FailureKind::Generic);
    }
}
