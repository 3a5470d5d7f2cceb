pub mod models;
pub mod queries;

use crate::error::RelayResult;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

pub async fn create_pool(database_url: &str) -> RelayResult<PgPool> {
    // 10 connections is plenty: the only writers are registration glue and
    // the liveness-triggered delete path; everything else reads snapshots.
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    info!("Database connection pool created");
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> RelayResult<()> {
    info!("Running database migrations");
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| crate::error::RelayError::DatabaseError(e.into()))?;
    info!("Database migrations complete");
    Ok(())
}

pub async fn health_check(pool: &PgPool) -> bool {
    sqlx::query("SELECT 1").fetch_one(pool).await.is_ok()
}
