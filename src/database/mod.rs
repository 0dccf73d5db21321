pub mod migrations;
pub mod models;
pub mod queries;
pub mod settings;

pub use queries::PunchLog;
pub use settings::SettingsStore;

use anyhow::Result;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::str::FromStr;

pub async fn create_connection(database_url: &str) -> Result<SqlitePool> {
    let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    // Every connection to `:memory:` is its own database, so keep exactly one.
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(connect_options)
        .await?;

    // Run migrations
    migrations::run_migrations(&pool).await?;

    Ok(pool)
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    create_connection("sqlite::memory:").await.unwrap()
}
