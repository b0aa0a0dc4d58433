//! Retrying writes that collide on the SQLite write lock.
//!
//! WAL mode lets readers proceed, but writers still serialize. Under a burst
//! of completions a transition can exhaust the busy timeout; those are retried
//! with jittered exponential backoff instead of being surfaced to the worker.

use rand::random;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::{Error, Result};

/// Backoff schedule for busy retries.
#[derive(Debug, Clone, Copy)]
struct BusyBackoff {
    max_retries: u32,
    base: Duration,
    cap: Duration,
}

const BUSY_BACKOFF: BusyBackoff = BusyBackoff {
    max_retries: 12,
    base: Duration::from_millis(10),
    cap: Duration::from_secs(2),
};

impl BusyBackoff {
    /// Delay before retry number `attempt` (0-based), without jitter.
    fn base_delay(&self, attempt: u32) -> Duration {
        self.base
            .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
            .min(self.cap)
    }

    /// Delay with up to 25% random jitter, still capped.
    fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter_ms = random::<u64>() % (base.as_millis() as u64 / 4 + 1);
        (base + Duration::from_millis(jitter_ms)).min(self.cap)
    }
}

/// SQLITE_BUSY (5) or SQLITE_LOCKED (6), by code or by message.
fn is_sqlite_busy_error(err: &Error) -> bool {
    let Error::DatabaseSqlx(sqlx_err) = err else {
        return false;
    };

    if let sqlx::Error::Database(db_err) = sqlx_err
        && matches!(db_err.code().as_deref(), Some("5" | "6"))
    {
        return true;
    }

    let msg = sqlx_err.to_string().to_ascii_lowercase();
    msg.contains("database is locked") || msg.contains("database is busy")
}

/// Run `op` until it succeeds or fails with something other than SQLITE_BUSY.
pub async fn retry_on_sqlite_busy<T, F, Fut>(op_name: &'static str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(err) if is_sqlite_busy_error(&err) && attempt < BUSY_BACKOFF.max_retries => {
                let delay = BUSY_BACKOFF.delay(attempt);
                debug!(
                    op = op_name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "SQLite busy, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
