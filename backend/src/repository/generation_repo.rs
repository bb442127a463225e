//! Generation Repository
//!
//! Stores the display metadata of generations that entries point at.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use shotline::{Generation, GenerationKind};

use super::db::{sql_err, SharedConnection};
use super::traits::Repository;
use crate::domain::{DomainError, DomainResult};

pub(crate) const GENERATION_COLUMNS: &str =
    "g.id, g.location, g.thumbnail_location, g.kind, g.created_at, g.starred, g.provenance";

/// Read a generation from `row`, starting at column `offset`
pub(crate) fn generation_at(row: &Row<'_>, offset: usize) -> rusqlite::Result<Generation> {
    let kind: String = row.get(offset + 3)?;
    let created_at: i64 = row.get(offset + 4)?;
    let provenance: Option<String> = row.get(offset + 6)?;

    Ok(Generation {
        id: row.get(offset)?,
        location: row.get(offset + 1)?,
        thumbnail_location: row.get(offset + 2)?,
        kind: GenerationKind::from_str(&kind),
        created_at: DateTime::<Utc>::from_timestamp_millis(created_at).unwrap_or_else(Utc::now),
        starred: row.get::<_, i64>(offset + 5)? != 0,
        provenance: provenance
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or(serde_json::Value::Null),
    })
}

fn provenance_text(generation: &Generation) -> Option<String> {
    if generation.provenance.is_null() {
        None
    } else {
        Some(generation.provenance.to_string())
    }
}

/// Generation repository
pub struct GenerationRepository {
    conn: SharedConnection,
}

impl GenerationRepository {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl Repository<Generation> for GenerationRepository {
    async fn create(&self, generation: &Generation) -> DomainResult<Generation> {
        if generation.id.is_empty() {
            return Err(DomainError::InvalidInput("generation id is empty".to_string()));
        }
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO generations (id, location, thumbnail_location, kind, created_at, starred, provenance)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                generation.id,
                generation.location,
                generation.thumbnail_location,
                generation.kind.as_str(),
                generation.created_at.timestamp_millis(),
                generation.starred as i64,
                provenance_text(generation),
            ],
        )
        .map_err(sql_err)?;
        Ok(generation.clone())
    }

    async fn find_by_id(&self, id: String) -> DomainResult<Option<Generation>> {
        let conn = self.conn.lock().await;
        let query = format!("SELECT {} FROM generations g WHERE g.id = ?1", GENERATION_COLUMNS);
        conn.query_row(&query, params![id], |row| generation_at(row, 0))
            .optional()
            .map_err(sql_err)
    }

    async fn list(&self) -> DomainResult<Vec<Generation>> {
        let conn = self.conn.lock().await;
        let query = format!("SELECT {} FROM generations g ORDER BY g.created_at, g.id", GENERATION_COLUMNS);
        let mut stmt = conn.prepare(&query).map_err(sql_err)?;
        let generations = stmt
            .query_map([], |row| generation_at(row, 0))
            .map_err(sql_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(sql_err)?;
        Ok(generations)
    }

    async fn update(&self, generation: &Generation) -> DomainResult<Generation> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE generations SET location = ?1, thumbnail_location = ?2, kind = ?3, starred = ?4, provenance = ?5
                 WHERE id = ?6",
                params![
                    generation.location,
                    generation.thumbnail_location,
                    generation.kind.as_str(),
                    generation.starred as i64,
                    provenance_text(generation),
                    generation.id,
                ],
            )
            .map_err(sql_err)?;
        if changed == 0 {
            return Err(DomainError::NotFound(format!("generation {}", generation.id)));
        }
        Ok(generation.clone())
    }

    async fn delete(&self, id: String) -> DomainResult<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM generations WHERE id = ?1", params![id])
            .map_err(sql_err)?;
        Ok(())
    }
}
