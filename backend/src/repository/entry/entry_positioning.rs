//! Entry Positioning Operations
//!
//! Moving entries along a shot's timeline and copying them to a new key.

use async_trait::async_trait;
use rusqlite::params;
use shotline::{Entry, RecordId};

use super::entry_repo::{load_entry, reload_entry};
use crate::domain::{row_id, DomainError, DomainResult};
use crate::repository::db::{now_millis, sql_err};

/// Trait for entry positioning operations
#[async_trait]
pub trait EntryPositioningOperations {
    /// Move an entry to `position`, or off the timeline with `None`
    async fn set_position(&self, entry_id: &RecordId, position: Option<i64>) -> DomainResult<Entry>;

    /// New entry in the same shot with the same generation, at `position`
    async fn duplicate_at(&self, entry_id: &RecordId, position: i64) -> DomainResult<Entry>;
}

#[async_trait]
impl EntryPositioningOperations for super::entry_repo::EntryRepository {
    async fn set_position(&self, entry_id: &RecordId, position: Option<i64>) -> DomainResult<Entry> {
        let id = row_id(entry_id)?;
        let conn = self.conn.lock().await;

        let changed = conn
            .execute(
                "UPDATE shot_generations SET position = ?1, updated_at = ?2 WHERE id = ?3",
                params![position, now_millis(), id],
            )
            .map_err(sql_err)?;
        if changed == 0 {
            return Err(DomainError::NotFound(format!("entry {}", entry_id)));
        }
        reload_entry(&conn, id)
    }

    async fn duplicate_at(&self, entry_id: &RecordId, position: i64) -> DomainResult<Entry> {
        let id = row_id(entry_id)?;
        let conn = self.conn.lock().await;

        if load_entry(&conn, id)?.is_none() {
            return Err(DomainError::NotFound(format!("entry {}", entry_id)));
        }
        let now = now_millis();
        conn.execute(
            "INSERT INTO shot_generations (shot_id, generation_id, position, metadata, created_at, updated_at)
             SELECT shot_id, generation_id, ?1, metadata, ?2, ?2 FROM shot_generations WHERE id = ?3",
            params![position, now, id],
        )
        .map_err(sql_err)?;
        reload_entry(&conn, conn.last_insert_rowid())
    }
}
