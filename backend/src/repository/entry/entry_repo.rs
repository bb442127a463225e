//! Entry Repository - Core CRUD Operations
//!
//! SQLite-backed storage of shot entries (`shot_generations` rows).
//! Position changes live in entry_positioning.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use shotline::{Entry, RecordId};

use crate::domain::{row_id, DomainError, DomainResult};
use crate::repository::db::{now_millis, sql_err, SharedConnection};
use crate::repository::generation_repo::{generation_at, GENERATION_COLUMNS};
use crate::repository::traits::Repository;

/// Entry columns followed by the joined generation
fn select_entries(filter: &str) -> String {
    format!(
        "SELECT sg.id, sg.shot_id, sg.position, sg.metadata, {}
         FROM shot_generations sg JOIN generations g ON g.id = sg.generation_id
         {}
         ORDER BY sg.shot_id, sg.position IS NULL, sg.position, sg.id",
        GENERATION_COLUMNS, filter
    )
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<Entry> {
    let metadata: Option<String> = row.get(3)?;
    Ok(Entry {
        id: RecordId::committed(row.get::<_, i64>(0)?.to_string()),
        shot_id: RecordId::committed(row.get::<_, i64>(1)?.to_string()),
        position: row.get(2)?,
        metadata: metadata
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or(serde_json::Value::Null),
        generation: generation_at(row, 4)?,
    })
}

fn metadata_text(entry: &Entry) -> Option<String> {
    if entry.metadata.is_null() {
        None
    } else {
        Some(entry.metadata.to_string())
    }
}

/// Load one entry with its generation
pub(super) fn load_entry(conn: &Connection, entry_id: i64) -> DomainResult<Option<Entry>> {
    conn.query_row(&select_entries("WHERE sg.id = ?1"), params![entry_id], entry_from_row)
        .optional()
        .map_err(sql_err)
}

/// Load an entry that was just written
pub(super) fn reload_entry(conn: &Connection, entry_id: i64) -> DomainResult<Entry> {
    load_entry(conn, entry_id)?.ok_or_else(|| DomainError::NotFound(format!("entry {}", entry_id)))
}

fn require_row(conn: &Connection, table: &str, id: &dyn rusqlite::ToSql, label: &str) -> DomainResult<()> {
    let query = format!("SELECT 1 FROM {} WHERE id = ?1", table);
    let found: Option<i64> = conn
        .query_row(&query, [id], |row| row.get(0))
        .optional()
        .map_err(sql_err)?;
    match found {
        Some(_) => Ok(()),
        None => Err(DomainError::NotFound(label.to_string())),
    }
}

/// SQLite implementation of the entry repository
pub struct EntryRepository {
    pub(super) conn: SharedConnection,
}

impl EntryRepository {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// Entries of a shot: positioned ascending, then unpositioned by id
    pub async fn list_by_shot(&self, shot_id: &RecordId) -> DomainResult<Vec<Entry>> {
        let shot = row_id(shot_id)?;
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&select_entries("WHERE sg.shot_id = ?1")).map_err(sql_err)?;
        let entries = stmt
            .query_map(params![shot], entry_from_row)
            .map_err(sql_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(sql_err)?;
        Ok(entries)
    }

    /// Every entry referencing a generation, across shots
    pub async fn list_by_generation(&self, generation_id: &str) -> DomainResult<Vec<Entry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&select_entries("WHERE sg.generation_id = ?1"))
            .map_err(sql_err)?;
        let entries = stmt
            .query_map(params![generation_id], entry_from_row)
            .map_err(sql_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(sql_err)?;
        Ok(entries)
    }

    /// Insert a new entry at `position`, or unpositioned.
    ///
    /// A taken position is rejected by the unique constraint and surfaces
    /// as `DomainError::Conflict`.
    pub async fn insert_at(
        &self,
        shot_id: &RecordId,
        generation_id: &str,
        position: Option<i64>,
    ) -> DomainResult<Entry> {
        let shot = row_id(shot_id)?;
        let conn = self.conn.lock().await;
        require_row(&conn, "shots", &shot, &format!("shot {}", shot_id))?;
        require_row(&conn, "generations", &generation_id, &format!("generation {}", generation_id))?;

        let now = now_millis();
        conn.execute(
            "INSERT INTO shot_generations (shot_id, generation_id, position, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![shot, generation_id, position, now],
        )
        .map_err(sql_err)?;
        reload_entry(&conn, conn.last_insert_rowid())
    }
}

#[async_trait]
impl Repository<Entry> for EntryRepository {
    async fn create(&self, entry: &Entry) -> DomainResult<Entry> {
        let created = self.insert_at(&entry.shot_id, &entry.generation.id, entry.position).await?;
        if entry.metadata.is_null() {
            return Ok(created);
        }
        self.update(&Entry {
            metadata: entry.metadata.clone(),
            ..created
        })
        .await
    }

    async fn find_by_id(&self, id: RecordId) -> DomainResult<Option<Entry>> {
        let entry_id = row_id(&id)?;
        let conn = self.conn.lock().await;
        load_entry(&conn, entry_id)
    }

    async fn list(&self) -> DomainResult<Vec<Entry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&select_entries("")).map_err(sql_err)?;
        let entries = stmt
            .query_map([], entry_from_row)
            .map_err(sql_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(sql_err)?;
        Ok(entries)
    }

    async fn update(&self, entry: &Entry) -> DomainResult<Entry> {
        let entry_id = row_id(&entry.id)?;
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE shot_generations SET position = ?1, metadata = ?2, updated_at = ?3 WHERE id = ?4",
                params![entry.position, metadata_text(entry), now_millis(), entry_id],
            )
            .map_err(sql_err)?;
        if changed == 0 {
            return Err(DomainError::NotFound(format!("entry {}", entry.id)));
        }
        reload_entry(&conn, entry_id)
    }

    async fn delete(&self, id: RecordId) -> DomainResult<()> {
        let entry_id = row_id(&id)?;
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM shot_generations WHERE id = ?1", params![entry_id])
            .map_err(sql_err)?;
        Ok(())
    }
}
