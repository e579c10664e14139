/// Database layer for Heartline
///
/// Manages the SQLite connection pool, embedded migrations, and the
/// timestamp encoding shared by every table.

use crate::error::{AppError, AppResult};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Database connection options
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub max_connections: u32,
    pub enable_wal: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            enable_wal: true,
        }
    }
}

/// Create a SQLite connection pool
pub async fn create_pool(path: &Path, options: DatabaseOptions) -> AppResult<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(options.max_connections)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(if options.enable_wal {
                    sqlx::sqlite::SqliteJournalMode::Wal
                } else {
                    sqlx::sqlite::SqliteJournalMode::Delete
                })
                .foreign_keys(true)
                .busy_timeout(std::time::Duration::from_secs(5)),
        )
        .await?;

    Ok(pool)
}

/// Create an in-memory pool backed by a single long-lived connection.
///
/// Every SQLite `:memory:` connection is its own database, so the pool is
/// pinned to one connection that never idles out.
pub async fn create_memory_pool() -> AppResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

/// Run migrations for a database
/// Migrations are embedded at compile time from ./migrations directory
pub async fn run_migrations(pool: &SqlitePool) -> AppResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| AppError::Internal(format!("Migration failed: {}", e)))?;

    Ok(())
}

/// Test database connection
pub async fn test_connection(pool: &SqlitePool) -> AppResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;

    Ok(())
}

/// Encode a timestamp as fixed-width RFC 3339 UTC text.
///
/// Fixed width keeps lexical order equal to chronological order, which the
/// window queries rely on.
pub fn encode_time(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Decode a timestamp written by [`encode_time`]
pub fn decode_time(s: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Internal(format!("Invalid timestamp {}: {}", s, e)))
}

/// Decode an optional timestamp column
pub fn decode_time_opt(s: Option<String>) -> AppResult<Option<DateTime<Utc>>> {
    s.as_deref().map(decode_time).transpose()
}

/// Encode a calendar date (YYYY-MM-DD)
pub fn encode_date(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Decode a calendar date (YYYY-MM-DD)
pub fn decode_date(s: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| AppError::Internal(format!("Invalid date {}: {}", s, e)))
}

/// File-backed pool with several connections, for tests that need real
/// contention between writers. The directory must outlive the pool.
#[cfg(test)]
pub(crate) async fn create_file_pool() -> AppResult<(tempfile::TempDir, SqlitePool)> {
    let dir = tempfile::tempdir()?;
    let pool = create_pool(&dir.path().join("heartline.sqlite"), DatabaseOptions::default()).await?;
    run_migrations(&pool).await?;
    Ok((dir, pool))
}
