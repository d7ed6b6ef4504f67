//! `SQLite` connection pool setup.

use crate::error::{DatabaseError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Pool size for file-backed databases.
const MAX_CONNECTIONS: u32 = 5;

/// Open (creating if needed) the database at `path`.
///
/// `:memory:` opens a private in-memory database on a single, never-recycled
/// connection so its contents live as long as the pool.
pub async fn connect(path: impl AsRef<Path>) -> Result<Pool<Sqlite>> {
    let path = path.as_ref();
    let path_str = path
        .to_str()
        .ok_or_else(|| DatabaseError::Open("invalid database path: not valid UTF-8".to_string()))?;

    let in_memory = path_str == ":memory:";
    let base = if in_memory {
        SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| DatabaseError::Open(format!("invalid connection string: {e}")))?
    } else {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
    };
    let options = base.foreign_keys(true).busy_timeout(BUSY_TIMEOUT);

    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(MAX_CONNECTIONS)
    };

    let pool = pool_options
        .connect_with(options)
        .await
        .map_err(|e| DatabaseError::Open(format!("{path_str}: {e}")))?;

    tracing::info!(path = %path_str, "Database pool created");
    Ok(pool)
}
