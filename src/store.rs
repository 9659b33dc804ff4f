//! Entity store: SQLite persistence for users, courses, lessons, enrollments
//! and lesson progress. No business rules live here; the ledger composes these
//! helpers inside its transactions.

pub mod course;
pub mod enrollment;
pub mod lesson;
pub mod user;

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
};
use tracing::info;

use crate::{config::Config, error::StorageError};

/// Open (creating if needed) the database described by `config` and bring the
/// schema up to date.
pub async fn open(config: &Config) -> Result<SqlitePool, StorageError> {
    if let Some(parent) = config.database.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(sqlx::Error::Io)?;
        }
    }
    let options = SqliteConnectOptions::new()
        .filename(&config.database)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(config.busy_timeout());
    let database = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;
    migrate(&database).await?;
    info!("opened ledger database {}", config.database.display());
    Ok(database)
}

pub async fn migrate(database: &SqlitePool) -> Result<(), StorageError> {
    sqlx::migrate!("./migrations").run(database).await?;
    Ok(())
}
