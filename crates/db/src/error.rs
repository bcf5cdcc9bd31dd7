//! Errors surfaced by the persistence layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    /// Connection, query or row-decoding failure.
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("schema migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}
