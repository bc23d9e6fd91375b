mod db;

pub mod addresses;
pub mod catalog;
pub mod lock_orders;
pub mod payment_orders;
pub mod providers;
pub mod webhooks;

use std::{env, str::FromStr, time::Duration};

pub use db::SqliteDatabase;
use log::info;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};

use crate::traits::StorageError;

const SQLITE_DB_URL: &str = "sqlite://data/aggregator.db";

pub fn db_url() -> String {
    let result = env::var("AGG_DATABASE_URL").unwrap_or_else(|_| {
        info!("AGG_DATABASE_URL is not set. Using the default.");
        SQLITE_DB_URL.to_string()
    });
    info!("Using database URL: {result}");
    result
}

/// Opens a connection pool. The database file is created if it does not exist.
///
/// WAL mode and a generous busy timeout let concurrent workers queue for the write lock instead of failing.
pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, StorageError> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(30))
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await?;
    Ok(pool)
}

/// Returns true if the error is a unique-constraint violation, i.e. an idempotency collision rather than a failure.
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}
