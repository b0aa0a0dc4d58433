//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use extract_queue::Result;
use extract_queue::database::repositories::{JobRepository, SqlxJobRepository};
use extract_queue::database::{DbPool, init_pool, run_migrations};
use extract_queue::pipeline::{ExtractionRunner, JobDescriptor, RunOutcome, WorkQueue};
use extract_queue::services::JobService;

/// File-backed SQLite database with migrations applied. Keep the `TempDir` alive.
pub async fn setup_test_db() -> (TempDir, DbPool) {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("jobs.db").display());
    let pool = init_pool(&url).await.expect("Failed to create test pool");
    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    (dir, pool)
}

/// Store, queue and job service wired together over a temporary directory.
pub struct Harness {
    pub dir: TempDir,
    pub pool: DbPool,
    pub repository: Arc<dyn JobRepository>,
    pub queue: Arc<WorkQueue>,
    pub jobs: Arc<JobService>,
}

impl Harness {
    pub async fn new() -> Self {
        let (dir, pool) = setup_test_db().await;
        let repository: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(pool.clone()));
        let queue = Arc::new(WorkQueue::new());
        let jobs = Arc::new(JobService::new(
            repository.clone(),
            queue.clone(),
            dir.path().join("data"),
        ));
        Self {
            dir,
            pool,
            repository,
            queue,
            jobs,
        }
    }
}

/// Runner that replays a script of outcomes, then succeeds.
///
/// On success it drops an empty result archive named after the uploaded
/// document, the way the real pipeline would.
#[derive(Default)]
pub struct ScriptedRunner {
    script: Mutex<VecDeque<Result<RunOutcome>>>,
    calls: Mutex<Vec<JobDescriptor>>,
}

impl ScriptedRunner {
    pub fn new(script: impl IntoIterator<Item = Result<RunOutcome>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<JobDescriptor> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ExtractionRunner for ScriptedRunner {
    async fn run(&self, descriptor: &JobDescriptor) -> Result<RunOutcome> {
        self.calls.lock().push(descriptor.clone());
        let next = self.script.lock().pop_front();
        let outcome = next.unwrap_or(Ok(RunOutcome::Success));

        if matches!(outcome, Ok(RunOutcome::Success)) {
            let mut entries = tokio::fs::read_dir(&descriptor.output_dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                if let Some(stem) = name.strip_suffix(".pdf") {
                    let archive = descriptor.output_dir.join(format!("{}_output.zip", stem));
                    tokio::fs::write(archive, b"PK\x05\x06").await?;
                }
            }
        }
        outcome
    }
}

/// Poll `check` until it returns true or five seconds pass.
pub async fn wait_for<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
