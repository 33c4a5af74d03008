//! `SQLite` connection pool setup and schema bootstrap.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::{AppError, Result};

use super::schema;

/// Connect to the on-disk database, creating the file and parent
/// directory when missing, and apply the schema.
///
/// # Errors
///
/// Returns `AppError::Config` if the database directory cannot be created,
/// or `AppError::Transient` if the connection or schema application fails.
pub async fn connect(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|err| AppError::Config(format!("failed to create db dir: {err}")))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    schema::apply_schema(&pool).await?;
    Ok(pool)
}

/// Connect to an in-memory database for tests and apply the schema.
///
/// The pool is pinned to a single never-expiring connection: each `SQLite`
/// in-memory database is private to its connection, so a second connection
/// would see an empty schema.
///
/// # Errors
///
/// Returns `AppError::Transient` if the connection or schema application
/// fails.
pub async fn connect_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    schema::apply_schema(&pool).await?;
    Ok(pool)
}
