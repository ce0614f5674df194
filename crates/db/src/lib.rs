//! Database access layer for the internal license store.
//!
//! Thin sqlx/Postgres layer: entity models under [`models`], unit-struct
//! repositories under [`repositories`]. All SQL lives here; the sync
//! engine and the HTTP layer never format queries themselves.

pub mod models;
pub mod repositories;

/// Postgres connection pool used across the workspace.
pub type DbPool = sqlx::PgPool;

/// Connect to Postgres with a bounded pool.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Cheap connectivity probe for liveness endpoints.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply pending migrations from `db/migrations` at startup.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/migrations").run(pool).await
}
