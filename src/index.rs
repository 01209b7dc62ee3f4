use crate::atlas::{AtlasError, AtlasResult};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

const INIT_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS files (
        path TEXT PRIMARY KEY,
        size INTEGER NOT NULL CHECK (size >= 0),
        hash TEXT NOT NULL
    );
"#;

const PUT_SQL: &str = "INSERT OR REPLACE INTO files (path, size, hash) VALUES (?1, ?2, ?3)";

const SELECT_PATH_SQL: &str = "SELECT path, size, hash FROM files WHERE path = ?1";

const DELETE_PATH_SQL: &str = "DELETE FROM files WHERE path = ?1";

// Case-sensitive prefix match
const DELETE_BELOW_SQL: &str = "DELETE FROM files WHERE substr(path, 1, length(?1)) = ?1";

const SELECT_UNDER_SQL: &str = "SELECT path, size, hash FROM files
    WHERE path = ?1 OR substr(path, 1, length(?2)) = ?2
    ORDER BY path";

/// Recorded metadata for one logical path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRow {
    pub path: String,
    pub size: u64,
    pub hash: String,
}

/// Durable `path -> (size, hash)` store.
///
/// Rows are keyed by logical path so they survive moving the sandbox.
/// The connection sits behind a mutex so one index can serve many threads.
#[derive(Debug)]
pub struct Index {
    conn: Mutex<Connection>,
}

impl Index {
    /// Open (or create) an index file. Call `init` before use.
    pub fn open(path: impl AsRef<Path>) -> AtlasResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            AtlasError::index(format!("Failed to open index at {}", path.display()), e)
        })?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> AtlasResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AtlasError::index("Failed to create in-memory index", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Provision the schema; safe to call repeatedly
    pub fn init(&self) -> AtlasResult<()> {
        self.conn()
            .execute_batch(INIT_SQL)
            .map_err(|e| AtlasError::index("Failed to initialize index schema", e))
    }

    /// Upsert the row for `path`
    pub fn put(&self, path: &str, size: u64, hash: &str) -> AtlasResult<()> {
        self.conn()
            .execute(PUT_SQL, params![path, size, hash])
            .map_err(|e| AtlasError::index(format!("Failed to put row: {}", path), e))?;

        debug!(path, size, hash, "index row stored");
        Ok(())
    }

    /// Exact stored row, or `ResourceNotFound`
    pub fn get_path(&self, path: &str) -> AtlasResult<IndexRow> {
        self.conn()
            .query_row(SELECT_PATH_SQL, params![path], |row| {
                Ok(IndexRow {
                    path: row.get(0)?,
                    size: row.get(1)?,
                    hash: row.get(2)?,
                })
            })
            .optional()
            .map_err(|e| AtlasError::index(format!("Failed to query row: {}", path), e))?
            .ok_or_else(|| AtlasError::ResourceNotFound(path.to_string()))
    }

    /// Remove the row for `path`; absent rows are not an error
    pub fn delete_path(&self, path: &str) -> AtlasResult<()> {
        let removed = self
            .conn()
            .execute(DELETE_PATH_SQL, params![path])
            .map_err(|e| AtlasError::index(format!("Failed to delete row: {}", path), e))?;

        debug!(path, removed, "index row deleted");
        Ok(())
    }

    /// Upsert `path` and drop any rows recorded beneath it, in one
    /// transaction. Used when a file replaces what may have been a directory.
    pub fn put_replacing(&self, path: &str, size: u64, hash: &str) -> AtlasResult<()> {
        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .map_err(|e| AtlasError::index("Failed to begin transaction", e))?;

        let dropped = tx
            .execute(DELETE_BELOW_SQL, params![below_prefix(path)])
            .map_err(|e| AtlasError::index(format!("Failed to clear rows below: {}", path), e))?;
        tx.execute(PUT_SQL, params![path, size, hash])
            .map_err(|e| AtlasError::index(format!("Failed to put row: {}", path), e))?;
        tx.commit()
            .map_err(|e| AtlasError::index("Failed to commit transaction", e))?;

        debug!(path, size, hash, dropped, "index row stored");
        Ok(())
    }

    /// Remove the row for `path` and every row beneath it
    pub fn delete_under(&self, path: &str) -> AtlasResult<usize> {
        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .map_err(|e| AtlasError::index("Failed to begin transaction", e))?;

        let below = tx
            .execute(DELETE_BELOW_SQL, params![below_prefix(path)])
            .map_err(|e| AtlasError::index(format!("Failed to clear rows below: {}", path), e))?;
        let exact = tx
            .execute(DELETE_PATH_SQL, params![path])
            .map_err(|e| AtlasError::index(format!("Failed to delete row: {}", path), e))?;
        tx.commit()
            .map_err(|e| AtlasError::index("Failed to commit transaction", e))?;

        debug!(path, removed = below + exact, "index rows deleted");
        Ok(below + exact)
    }

    pub fn count(&self) -> AtlasResult<u64> {
        self.conn()
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))
            .map_err(|e| AtlasError::index("Failed to count rows", e))
    }

    /// Rows for `prefix` itself and everything beneath it, ordered by path.
    /// An empty prefix returns every row.
    pub fn paths_under(&self, prefix: &str) -> AtlasResult<Vec<IndexRow>> {
        let prefix = prefix.trim_matches('/');
        let below = below_prefix(prefix);

        let conn = self.conn();
        let mut stmt = conn
            .prepare(SELECT_UNDER_SQL)
            .map_err(|e| AtlasError::index("Failed to prepare statement", e))?;

        let rows = stmt
            .query_map(params![prefix, below], |row| {
                Ok(IndexRow {
                    path: row.get(0)?,
                    size: row.get(1)?,
                    hash: row.get(2)?,
                })
            })
            .map_err(|e| AtlasError::index("Failed to query rows", e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AtlasError::index("Failed to collect rows", e))?;

        Ok(rows)
    }
}

/// Prefix shared by every strict descendant of `path` (everything for `""`)
fn below_prefix(path: &str) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!("{}/", path)
    }
}
