//! Postgres connection pool and embedded migrations.

use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::DbError;

/// Shared pool handed to every repository function.
pub type DbPool = PgPool;

/// `chatbot_flows` and `conversations`, from `migrations/` at the workspace root.
static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Must stay well below the engine's lease TTL: a resume step waiting on the
/// pool still holds its conversation lease.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, DbError> {
    info!(max_connections, "connecting to database");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &DbPool) -> Result<(), DbError> {
    info!(known = MIGRATOR.iter().count(), "applying conversation schema migrations");
    MIGRATOR.run(pool).await?;
    Ok(())
}
