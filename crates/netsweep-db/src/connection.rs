//! Connection pool setup.
//!
//! Plain `SQLite` in WAL mode with foreign keys enforced. The database
//! file and its parent directory are created on first open.

use crate::error::{DatabaseError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Create a connection pool for the database at `path`.
///
/// `:memory:` opens an in-memory database (used by tests).
pub async fn create_pool(path: impl AsRef<Path>, max_connections: u32) -> Result<Pool<Sqlite>> {
    let path = path.as_ref();
    let path_str = path
        .to_str()
        .ok_or_else(|| DatabaseError::Open("database path is not valid UTF-8".to_string()))?;

    if path_str != ":memory:" {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }

    let connect_options = SqliteConnectOptions::from_str(path_str)
        .map_err(|e| DatabaseError::Open(format!("invalid connection string: {e}")))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(connect_options)
        .await
        .map_err(|e| DatabaseError::Open(format!("failed to create pool: {e}")))?;

    tracing::info!(path = path_str, "database pool created");

    Ok(pool)
}
