//! SQLite-backed position store.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::{PositionStore, SourcePosition, StoreError};

/// Position store persisted in a SQLite database.
pub struct SqlitePositionStore {
    conn: Mutex<Connection>,
}

impl SqlitePositionStore {
    /// Opens (or creates) the database file and its tables.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS stream_positions (
                source_url TEXT PRIMARY KEY,
                position INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl PositionStore for SqlitePositionStore {
    async fn load(&self, source_url: &str) -> Result<Option<u64>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let position: Option<i64> = conn
            .query_row(
                "SELECT position FROM stream_positions WHERE source_url = ?",
                params![source_url],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(position.map(|p| p as u64))
    }

    async fn save(&self, source_url: &str, position: u64) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            r#"
            INSERT INTO stream_positions (source_url, position, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(source_url) DO UPDATE SET
                position = MAX(position, excluded.position),
                updated_at = excluded.updated_at
            "#,
            params![source_url, position as i64, Utc::now().to_rfc3339()],
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    async fn all(&self) -> Result<Vec<SourcePosition>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn
            .prepare("SELECT source_url, position FROM stream_positions ORDER BY source_url")
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                let position: i64 = row.get(1)?;
                Ok(SourcePosition {
                    source_url: row.get(0)?,
                    position: position as u64,
                })
            })
            .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn reset(&self, source_url: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            "DELETE FROM stream_positions WHERE source_url = ?",
            params![source_url],
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }
}
