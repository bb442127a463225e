//! Shot Repository
//!
//! CRUD for shots plus project listing, reordering and whole-shot copies.

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension, Row};
use shotline::{RecordId, Shot};

use crate::domain::{row_id, DomainError, DomainResult};
use crate::repository::db::{now_millis, sql_err, SharedConnection};
use crate::repository::traits::Repository;

const SHOT_COLUMNS: &str = "id, project_id, name, position, aspect_ratio";

fn shot_from_row(row: &Row<'_>) -> rusqlite::Result<Shot> {
    Ok(Shot {
        id: RecordId::committed(row.get::<_, i64>(0)?.to_string()),
        project_id: row.get(1)?,
        name: row.get(2)?,
        position: row.get(3)?,
        aspect_ratio: row.get(4)?,
    })
}

/// Shot repository
pub struct ShotRepository {
    conn: SharedConnection,
}

impl ShotRepository {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// Shots of one project ordered by their position
    pub async fn list_by_project(&self, project_id: &str) -> DomainResult<Vec<Shot>> {
        let conn = self.conn.lock().await;
        let query = format!(
            "SELECT {} FROM shots WHERE project_id = ?1 ORDER BY position, id",
            SHOT_COLUMNS
        );
        let mut stmt = conn.prepare(&query).map_err(sql_err)?;
        let shots = stmt
            .query_map(params![project_id], shot_from_row)
            .map_err(sql_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(sql_err)?;
        Ok(shots)
    }

    pub async fn set_position(&self, id: &RecordId, position: i64) -> DomainResult<Shot> {
        let shot_id = row_id(id)?;
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE shots SET position = ?1, updated_at = ?2 WHERE id = ?3",
                params![position, now_millis(), shot_id],
            )
            .map_err(sql_err)?;
        if changed == 0 {
            return Err(DomainError::NotFound(format!("shot {}", id)));
        }
        let query = format!("SELECT {} FROM shots WHERE id = ?1", SHOT_COLUMNS);
        conn.query_row(&query, params![shot_id], shot_from_row)
            .map_err(sql_err)
    }

    /// Copy a shot and every entry in it inside one transaction.
    ///
    /// `template` supplies the new shot's project, name, position and aspect
    /// ratio; its id is ignored.
    pub async fn duplicate(&self, source: &RecordId, template: &Shot) -> DomainResult<Shot> {
        let source_id = row_id(source)?;
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(sql_err)?;

        let exists: Option<i64> = tx
            .query_row("SELECT id FROM shots WHERE id = ?1", params![source_id], |row| row.get(0))
            .optional()
            .map_err(sql_err)?;
        if exists.is_none() {
            return Err(DomainError::NotFound(format!("shot {}", source)));
        }

        let now = now_millis();
        tx.execute(
            "INSERT INTO shots (project_id, name, position, aspect_ratio, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![template.project_id, template.name, template.position, template.aspect_ratio, now],
        )
        .map_err(sql_err)?;
        let new_id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO shot_generations (shot_id, generation_id, position, metadata, created_at, updated_at)
             SELECT ?1, generation_id, position, metadata, ?2, ?2
             FROM shot_generations WHERE shot_id = ?3
             ORDER BY position IS NULL, position, id",
            params![new_id, now, source_id],
        )
        .map_err(sql_err)?;

        tx.commit().map_err(sql_err)?;
        log::debug!("[shots] duplicated {} as {}", source_id, new_id);

        Ok(Shot {
            id: RecordId::committed(new_id.to_string()),
            ..template.clone()
        })
    }
}

#[async_trait]
impl Repository<Shot> for ShotRepository {
    async fn create(&self, shot: &Shot) -> DomainResult<Shot> {
        if shot.name.trim().is_empty() {
            return Err(DomainError::InvalidInput("shot name is empty".to_string()));
        }
        let conn = self.conn.lock().await;
        let now = now_millis();
        conn.execute(
            "INSERT INTO shots (project_id, name, position, aspect_ratio, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![shot.project_id, shot.name, shot.position, shot.aspect_ratio, now],
        )
        .map_err(sql_err)?;

        Ok(Shot {
            id: RecordId::committed(conn.last_insert_rowid().to_string()),
            ..shot.clone()
        })
    }

    async fn find_by_id(&self, id: RecordId) -> DomainResult<Option<Shot>> {
        let shot_id = row_id(&id)?;
        let conn = self.conn.lock().await;
        let query = format!("SELECT {} FROM shots WHERE id = ?1", SHOT_COLUMNS);
        conn.query_row(&query, params![shot_id], shot_from_row)
            .optional()
            .map_err(sql_err)
    }

    async fn list(&self) -> DomainResult<Vec<Shot>> {
        let conn = self.conn.lock().await;
        let query = format!("SELECT {} FROM shots ORDER BY project_id, position, id", SHOT_COLUMNS);
        let mut stmt = conn.prepare(&query).map_err(sql_err)?;
        let shots = stmt
            .query_map([], shot_from_row)
            .map_err(sql_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(sql_err)?;
        Ok(shots)
    }

    async fn update(&self, shot: &Shot) -> DomainResult<Shot> {
        let shot_id = row_id(&shot.id)?;
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE shots SET name = ?1, position = ?2, aspect_ratio = ?3, updated_at = ?4 WHERE id = ?5",
                params![shot.name, shot.position, shot.aspect_ratio, now_millis(), shot_id],
            )
            .map_err(sql_err)?;
        if changed == 0 {
            return Err(DomainError::NotFound(format!("shot {}", shot.id)));
        }
        Ok(shot.clone())
    }

    async fn delete(&self, id: RecordId) -> DomainResult<()> {
        let shot_id = row_id(&id)?;
        let conn = self.conn.lock().await;
        // Entries go with the shot through ON DELETE CASCADE
        conn.execute("DELETE FROM shots WHERE id = ?1", params![shot_id])
            .map_err(sql_err)?;
        Ok(())
    }
}
