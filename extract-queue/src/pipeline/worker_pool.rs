//! Worker pool running the dispatch loop.
//!
//! Each worker repeatedly pops a descriptor, marks the job started, runs the
//! extraction pipeline and records the outcome. An out-of-memory exit is not
//! a failure: the worker waits out the cooldown and appends the same
//! descriptor to the tail of the queue. There is no retry cap, so a GPU that
//! never frees up keeps the job cycling.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::job_queue::{JobDescriptor, WorkQueue};
use super::runner::{ExtractionRunner, RunOutcome};
use crate::Error;
use crate::config::DEFAULT_OOM_COOLDOWN;
use crate::database::repositories::JobRepository;

/// Configuration for a worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of concurrent workers.
    pub workers: usize,
    /// Sleep before requeueing a job that ran out of GPU memory.
    pub oom_cooldown: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            oom_cooldown: DEFAULT_OOM_COOLDOWN,
        }
    }
}

/// What a single dispatch did with a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    /// Pipeline exited 0 and the job is completed.
    Completed,
    /// Pipeline failed and the job is errored.
    Errored,
    /// Descriptor went back to the tail of the queue.
    Requeued,
    /// Descriptor was dropped because the job cannot be started.
    Skipped,
}

/// Executes one descriptor against the store, runner and queue.
pub struct Dispatcher {
    queue: Arc<WorkQueue>,
    repository: Arc<dyn JobRepository>,
    runner: Arc<dyn ExtractionRunner>,
    oom_cooldown: Duration,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<WorkQueue>,
        repository: Arc<dyn JobRepository>,
        runner: Arc<dyn ExtractionRunner>,
        oom_cooldown: Duration,
    ) -> Self {
        Self {
            queue,
            repository,
            runner,
            oom_cooldown,
        }
    }

    /// Process one descriptor. Never fails; every outcome ends up in the job record
    /// or back on the queue.
    pub async fn dispatch(&self, descriptor: JobDescriptor) -> DispatchResult {
        let job_id = descriptor.job_id.as_str();
        let output_dir = descriptor.output_dir.to_string_lossy();

        match self.repository.mark_started(job_id, &output_dir).await {
            Ok(()) => {}
            Err(e @ (Error::NotFound { .. } | Error::InvalidStateTransition { .. })) => {
                warn!(job_id, error = %e, "Dropping descriptor for job that cannot start");
                return DispatchResult::Skipped;
            }
            Err(e) => {
                error!(job_id, error = %e, "Failed to mark job started, requeueing");
                self.requeue_after_cooldown(descriptor).await;
                return DispatchResult::Requeued;
            }
        }

        let outcome = match self.runner.run(&descriptor).await {
            Ok(outcome) => outcome,
            Err(e) => RunOutcome::Failed(e.to_string()),
        };

        match outcome {
            RunOutcome::Success => {
                if let Err(e) = self.repository.mark_completed(job_id).await {
                    error!(job_id, error = %e, "Failed to mark job completed");
                }
                info!(job_id, "Job completed");
                DispatchResult::Completed
            }
            RunOutcome::OutOfMemory => {
                warn!(
                    job_id,
                    cooldown_secs = self.oom_cooldown.as_secs_f64(),
                    "Extraction ran out of GPU memory, requeueing after cooldown"
                );
                self.requeue_after_cooldown(descriptor).await;
                DispatchResult::Requeued
            }
            RunOutcome::Failed(message) => {
                warn!(job_id, error = %message, "Job failed");
                if let Err(e) = self.repository.mark_errored(job_id, &message).await {
                    error!(job_id, error = %e, "Failed to mark job errored");
                }
                DispatchResult::Errored
            }
        }
    }

    async fn requeue_after_cooldown(&self, descriptor: JobDescriptor) {
        tokio::time::sleep(self.oom_cooldown).await;
        self.queue.push(descriptor);
    }
}

/// A fixed-size pool of workers draining a [`WorkQueue`].
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<WorkQueue>,
    dispatcher: Arc<Dispatcher>,
    /// Workers currently holding a job.
    busy_workers: Arc<AtomicUsize>,
    cancellation_token: CancellationToken,
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl WorkerPool {
    pub fn new(
        config: WorkerPoolConfig,
        queue: Arc<WorkQueue>,
        repository: Arc<dyn JobRepository>,
        runner: Arc<dyn ExtractionRunner>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(
            queue.clone(),
            repository,
            runner,
            config.oom_cooldown,
        ));
        Self {
            config: WorkerPoolConfig {
                workers: config.workers.max(1),
                ..config
            },
            queue,
            dispatcher,
            busy_workers: Arc::new(AtomicUsize::new(0)),
            cancellation_token: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
        }
    }

    /// Spawn the workers.
    pub fn start(&self) {
        info!(
            "Starting extraction worker pool with {} workers",
            self.config.workers
        );

        let mut tasks = self.tasks.lock();
        let Some(join_set) = tasks.as_mut() else {
            warn!("Worker pool already stopped, not starting");
            return;
        };

        for worker in 0..self.config.workers {
            let queue = self.queue.clone();
            let dispatcher = self.dispatcher.clone();
            let busy_workers = self.busy_workers.clone();
            let cancellation_token = self.cancellation_token.clone();

            join_set.spawn(async move {
                debug!(worker, "Worker started");

                loop {
                    let descriptor = tokio::select! {
                        _ = cancellation_token.cancelled() => break,
                        descriptor = queue.pop() => descriptor,
                    };

                    debug!(worker, job_id = %descriptor.job_id, "Dispatching job");
                    busy_workers.fetch_add(1, Ordering::SeqCst);
                    let result = dispatcher.dispatch(descriptor).await;
                    busy_workers.fetch_sub(1, Ordering::SeqCst);
                    debug!(worker, ?result, "Dispatch finished");
                }

                debug!(worker, "Worker shutting down");
            });
        }
    }

    /// Stop accepting new jobs and wait for in-flight dispatches to finish.
    ///
    /// Dropping the returned future early aborts the workers, which kills any
    /// running pipeline; those jobs stay "started".
    pub async fn stop(&self) {
        info!("Stopping extraction worker pool");
        self.cancellation_token.cancel();

        let join_set = {
            let mut tasks = self.tasks.lock();
            tasks.take()
        };

        if let Some(mut join_set) = join_set {
            while join_set.join_next().await.is_some() {}
        }

        info!("Extraction worker pool stopped");
    }

    /// Number of workers in the pool.
    pub fn worker_count(&self) -> usize {
        self.config.workers
    }

    /// Number of workers currently processing a job.
    pub fn busy_count(&self) -> usize {
        self.busy_workers.load(Ordering::SeqCst)
    }

    /// Check if the pool is running.
    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_pool_config_default() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.workers, 1);
        assert_eq!(config.oom_cooldown, Duration::from_secs(30));
    }
}
