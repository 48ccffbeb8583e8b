//! Database handle over SQLite via sqlx.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};

use crate::error::StoreError;

/// Central store handle. Cheap to clone (the pool is an Arc internally).
#[derive(Clone)]
pub struct Store {
    pub pool: SqlitePool,
}

impl Store {
    /// Open (or create) the SQLite database at `db_path` and run all
    /// pending migrations.
    ///
    /// WAL journal mode is configured at connection time, not inside a
    /// migration — SQLite forbids changing `journal_mode` inside a
    /// transaction and sqlx wraps every migration in one.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePool::connect_with(opts).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        Ok(Self { pool })
    }
}
