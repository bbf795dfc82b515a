//! Database helpers for the fulfillment service.
//!
//! The service owns its own Postgres database holding orders, order items,
//! notification templates and the audit trail. The catalog tables are read
//! from the same database but never written here.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Type alias for the application database pool.
pub type AppDb = PgPool;

/// Connect the application pool and bring the schema up to date.
pub async fn connect(database_url: &str) -> Result<AppDb, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}
