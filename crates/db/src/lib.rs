//! PostgreSQL persistence for storyreel.
//!
//! [`PgPipelineStore`] and [`PgCatalog`] implement the core persistence and
//! catalog traits on top of the repositories in [`repositories`].

pub mod catalog;
pub mod models;
pub mod repositories;
pub mod store;

use sqlx::postgres::PgPoolOptions;
use storyreel_core::error::CoreError;

pub use catalog::PgCatalog;
pub use store::PgPipelineStore;

pub type DbPool = sqlx::PgPool;

pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply every pending migration from `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Map a driver error onto the domain error.
///
/// Unique and check violations are caller mistakes and surface as
/// [`CoreError::Conflict`] and [`CoreError::Validation`].
pub fn db_error(e: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return CoreError::Conflict(db.message().to_string());
        }
        if db.is_check_violation() {
            return CoreError::Validation(db.message().to_string());
        }
    }
    tracing::error!(error = %e, "Database error");
    CoreError::Internal(format!("Database error: {e}"))
}
