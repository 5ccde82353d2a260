//! Database connection pool management.

use crate::error::map_sqlx;
use roster_engine::{Error, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Type alias for the database pool.
pub type Pool = PgPool;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<Pool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|e| map_sqlx(e, "connect"))
}

/// Run database migrations.
pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| Error::store(format!("migrations failed: {}", e)).with_source(e))
}
