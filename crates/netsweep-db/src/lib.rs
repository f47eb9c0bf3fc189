//! Netsweep Database Layer
//!
//! `SQLite`-backed scan history. Uses `SQLx` with embedded, versioned
//! migrations; the database runs in WAL mode with foreign keys enforced
//! so a deleted scan takes its hosts and ports with it.
//!
//! The crate exposes scan history both as direct query functions (for
//! history browsing) and as the engine's [`ResultSink`], which the
//! coordinator calls exactly once per terminal job.
//!
//! # Example
//!
//! ```ignore
//! use netsweep_db::Database;
//!
//! let db = Database::open("netsweep.db", 5).await?;
//! let recent = netsweep_db::scans::list_recent(db.pool(), 20).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod connection;
pub mod error;
pub mod migrations;
pub mod scans;

// Re-export commonly used types
pub use error::{DatabaseError, Result};
pub use scans::{ScanListEntry, ScanStatus, StoredScan};

use async_trait::async_trait;
use netsweep_core::{AppConfig, DatabaseConfig, ScanFailure, ScanRequest, ScanResult};
use netsweep_engine::ResultSink;
use sqlx::{Pool, Sqlite};
use std::path::Path;

/// High-level database handle: pool plus applied migrations.
#[derive(Debug, Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Open (creating if missing) the database at `path` and bring its
    /// schema up to date.
    pub async fn open(path: impl AsRef<Path>, max_connections: u32) -> Result<Self> {
        let pool = connection::create_pool(path, max_connections).await?;
        migrations::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Open the database described by configuration.
    ///
    /// Falls back to `<data_dir>/netsweep.db` when no explicit path is
    /// configured.
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let path = match &config.path {
            Some(path) => path.clone(),
            None => AppConfig::data_dir()
                .map_err(|e| DatabaseError::Open(e.to_string()))?
                .join("netsweep.db"),
        };
        Self::open(path, config.max_connections).await
    }

    /// The underlying `SQLx` pool, for direct queries.
    #[must_use]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Close the connection pool gracefully.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ResultSink for Database {
    async fn store_result(
        &self,
        request: &ScanRequest,
        result: &ScanResult,
    ) -> anyhow::Result<()> {
        scans::store_result(&self.pool, request, result).await?;
        Ok(())
    }

    async fn store_failure(
        &self,
        request: &ScanRequest,
        failure: &ScanFailure,
    ) -> anyhow::Result<()> {
        scans::store_failure(&self.pool, request, failure).await?;
        Ok(())
    }
}
