//! Extraction job repository.
//!
//! Lifecycle transitions are conditional updates: a row only moves forward,
//! so a stale or duplicated transition surfaces as
//! [`Error::InvalidStateTransition`] instead of overwriting a terminal state.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{Fingerprint, JobRecord, JobState};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;
use crate::{Error, Result};

const ENTITY: &str = "ExtractionJob";

/// Job repository trait.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new job. Fails with `DuplicateKey` if the id exists.
    async fn create_job(&self, job: &JobRecord) -> Result<()>;
    async fn get_job(&self, id: &str) -> Result<JobRecord>;
    /// Most recently queued job with the given fingerprint.
    async fn find_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<Option<JobRecord>>;
    /// Jobs that were never dispatched, oldest first.
    async fn list_not_started(&self) -> Result<Vec<JobRecord>>;

    /// Set `started`. Calling it again for a started job is a no-op apart
    /// from refreshing `output_dir`; the original `started_at` is kept.
    async fn mark_started(&self, id: &str, output_dir: &str) -> Result<()>;
    async fn mark_completed(&self, id: &str) -> Result<()>;
    async fn mark_errored(&self, id: &str, message: &str) -> Result<()>;
}

/// SQLx implementation of JobRepository.
pub struct SqlxJobRepository {
    pool: SqlitePool,
}

impl SqlxJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Explain why a conditional update touched no rows.
    async fn rejected_transition(&self, id: &str, to: JobState) -> Error {
        match self.get_job(id).await {
            Ok(job) => Error::InvalidStateTransition {
                from: job.state().to_string(),
                to: to.to_string(),
            },
            Err(e) => e,
        }
    }
}

#[async_trait]
impl JobRepository for SqlxJobRepository {
    async fn create_job(&self, job: &JobRecord) -> Result<()> {
        let result = retry_on_sqlite_busy("create_job", || async {
            sqlx::query(
                r#"
                INSERT INTO extraction_job (
                    id, display_name, fingerprint, content_length, output_dir,
                    compress_images, started, completed, error,
                    queued_at, started_at, finished_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&job.id)
            .bind(&job.display_name)
            .bind(&job.fingerprint)
            .bind(job.content_length)
            .bind(&job.output_dir)
            .bind(job.compress_images)
            .bind(job.started)
            .bind(job.completed)
            .bind(&job.error)
            .bind(job.queued_at)
            .bind(job.started_at)
            .bind(job.finished_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await;

        match result {
            Err(Error::DatabaseSqlx(sqlx::Error::Database(db_err)))
                if db_err.is_unique_violation() =>
            {
                Err(Error::duplicate_key(ENTITY, &job.id))
            }
            other => other,
        }
    }

    async fn get_job(&self, id: &str) -> Result<JobRecord> {
        sqlx::query_as::<_, JobRecord>("SELECT * FROM extraction_job WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found(ENTITY, id))
    }

    async fn find_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<Option<JobRecord>> {
        let job = sqlx::query_as::<_, JobRecord>(
            r#"
            SELECT * FROM extraction_job
            WHERE fingerprint = ? AND content_length = ?
            ORDER BY queued_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(&fingerprint.digest)
        .bind(fingerprint.length)
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    async fn list_not_started(&self) -> Result<Vec<JobRecord>> {
        let jobs = sqlx::query_as::<_, JobRecord>(
            "SELECT * FROM extraction_job WHERE started = 0 ORDER BY queued_at, rowid",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    async fn mark_started(&self, id: &str, output_dir: &str) -> Result<()> {
        let rows = retry_on_sqlite_busy("mark_started", || async {
            let result = sqlx::query(
                r#"
                UPDATE extraction_job
                SET started = 1, output_dir = ?, started_at = COALESCE(started_at, ?)
                WHERE id = ? AND completed = 0 AND error IS NULL
                "#,
            )
            .bind(output_dir)
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await?;

        if rows == 0 {
            return Err(self.rejected_transition(id, JobState::Started).await);
        }
        Ok(())
    }

    async fn mark_completed(&self, id: &str) -> Result<()> {
        let rows = retry_on_sqlite_busy("mark_completed", || async {
            let result = sqlx::query(
                r#"
                UPDATE extraction_job
                SET completed = 1, finished_at = ?
                WHERE id = ? AND started = 1 AND completed = 0 AND error IS NULL
                "#,
            )
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await?;

        if rows == 0 {
            return Err(self.rejected_transition(id, JobState::Completed).await);
        }
        Ok(())
    }

    async fn mark_errored(&self, id: &str, message: &str) -> Result<()> {
        let rows = retry_on_sqlite_busy("mark_errored", || async {
            let result = sqlx::query(
                r#"
                UPDATE extraction_job
                SET error = ?, finished_at = ?
                WHERE id = ? AND started = 1 AND completed = 0 AND error IS NULL
                "#,
            )
            .bind(message)
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await?;

        if rows == 0 {
            return Err(self.rejected_transition(id, JobState::Errored).await);
        }
        Ok(())
    }
}
