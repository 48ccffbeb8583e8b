use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Stored envelope is corrupt: {0}")]
    Corrupt(String),

    #[error("Migration error: {0}")]
    Migration(String),
}
