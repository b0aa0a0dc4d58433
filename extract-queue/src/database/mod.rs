//! Persistence layer for extraction jobs.
//!
//! A single SQLite file holds the `extraction_job` table. Submissions read it
//! while workers write lifecycle transitions, so the database runs in WAL mode
//! with a long busy timeout; writes that still see SQLITE_BUSY go through
//! [`retry::retry_on_sqlite_busy`].

pub mod models;
pub mod repositories;
pub mod retry;
pub mod time;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;

/// Database connection pool type alias.
pub type DbPool = Pool<Sqlite>;

/// Upper bound on pooled connections for file databases.
const MAX_CONNECTIONS: u32 = 8;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

fn connect_options(database_url: &str) -> crate::Result<SqliteConnectOptions> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT)
        .create_if_missing(true);
    Ok(options)
}

/// Open the job database.
///
/// In-memory URLs get one long-lived connection; every connection to
/// `sqlite::memory:` would otherwise see its own empty database.
pub async fn init_pool(database_url: &str) -> crate::Result<DbPool> {
    let mut pool_options = SqlitePoolOptions::new().acquire_timeout(ACQUIRE_TIMEOUT);

    pool_options = if is_in_memory(database_url) {
        pool_options
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(2);
        pool_options.max_connections((cores * 2).min(MAX_CONNECTIONS))
    };

    let pool = pool_options
        .connect_with(connect_options(database_url)?)
        .await?;

    tracing::info!(
        max_connections = pool.options().get_max_connections(),
        "Job database opened"
    );
    Ok(pool)
}

pub async fn run_migrations(pool: &DbPool) -> crate::Result<()> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}
