//! Database Connection and Setup
//!
//! Opens the SQLite database and runs migrations.

use rusqlite::{Connection, ErrorCode};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::domain::DomainError;

/// Shared connection handed to every repository
pub type SharedConnection = Arc<Mutex<Connection>>;

/// Database state wrapper
#[derive(Clone)]
pub struct DbState {
    conn: SharedConnection,
}

impl DbState {
    pub fn connection(&self) -> SharedConnection {
        self.conn.clone()
    }
}

/// Initialize database with path. `:memory:` opens a private in-memory db.
pub async fn init_db(db_path: &Path) -> Result<DbState, String> {
    let db_path_str = db_path.to_str().ok_or("Invalid DB path")?;

    let conn = if db_path_str == ":memory:" {
        Connection::open_in_memory()
    } else {
        Connection::open(db_path)
    }
    .map_err(|e| format!("Failed to open db: {}", e))?;

    // Run migrations
    run_migrations(&conn)?;
    log::info!("[db] ready at {}", db_path_str);

    Ok(DbState {
        conn: Arc::new(Mutex::new(conn)),
    })
}

/// Check if a column exists in a table
fn column_exists(conn: &Connection, table: &str, column: &str) -> bool {
    let query = format!("PRAGMA table_info({})", table);
    let Ok(mut stmt) = conn.prepare(&query) else {
        return false;
    };
    let Ok(mut rows) = stmt.query([]) else {
        return false;
    };
    while let Ok(Some(row)) = rows.next() {
        if let Ok(name) = row.get::<_, String>(1) {
            if name == column {
                return true;
            }
        }
    }
    false
}

/// Run database migrations
fn run_migrations(conn: &Connection) -> Result<(), String> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|e| format!("Failed to enable foreign keys: {}", e))?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS generations (
            id TEXT PRIMARY KEY,
            location TEXT NOT NULL,
            thumbnail_location TEXT,
            kind TEXT NOT NULL DEFAULT 'image',
            created_at INTEGER NOT NULL,
            starred INTEGER NOT NULL DEFAULT 0,
            provenance TEXT
        );

        CREATE TABLE IF NOT EXISTS shots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id TEXT NOT NULL,
            name TEXT NOT NULL,
            position INTEGER NOT NULL DEFAULT 0,
            aspect_ratio TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_shots_project ON shots(project_id, position);

        CREATE TABLE IF NOT EXISTS shot_generations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            shot_id INTEGER NOT NULL REFERENCES shots(id) ON DELETE CASCADE,
            generation_id TEXT NOT NULL REFERENCES generations(id),
            position INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            CONSTRAINT unique_shot_position UNIQUE (shot_id, position)
        );

        CREATE INDEX IF NOT EXISTS idx_shot_generations_generation
            ON shot_generations(generation_id);",
    )
    .map_err(|e| format!("Failed to create tables: {}", e))?;

    // Added after the first release
    if !column_exists(conn, "shot_generations", "metadata") {
        conn.execute("ALTER TABLE shot_generations ADD COLUMN metadata TEXT", [])
            .map_err(|e| format!("Failed to add metadata column: {}", e))?;
    }

    Ok(())
}

/// Map a SQLite failure onto the domain error it represents
pub(crate) fn sql_err(e: rusqlite::Error) -> DomainError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
            DomainError::Conflict(e.to_string())
        }
        rusqlite::Error::QueryReturnedNoRows => DomainError::NotFound(e.to_string()),
        _ => DomainError::Internal(e.to_string()),
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
