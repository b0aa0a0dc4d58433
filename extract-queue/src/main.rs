use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use extract_queue::api::{ApiServer, AppState};
use extract_queue::config::AppConfig;
use extract_queue::database::{self, repositories::JobRepository, repositories::SqlxJobRepository};
use extract_queue::logging;
use extract_queue::pipeline::{
    NvidiaSmiProbe, SubprocessRunner, WorkQueue, WorkerPool, WorkerPoolConfig, worker_count,
};
use extract_queue::services::JobService;

/// How long in-flight jobs get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    let _log_guard = logging::init_logging(&config.log_dir)?;
    if let Err(e) = logging::cleanup_old_logs(&config.log_dir).await {
        warn!(error = %e, "Failed to clean up old log files");
    }

    tokio::fs::create_dir_all(&config.data_dir).await?;

    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;

    let repository: Arc<dyn JobRepository> = Arc::new(SqlxJobRepository::new(pool.clone()));
    let queue = Arc::new(WorkQueue::new());
    let job_service = Arc::new(JobService::new(
        repository.clone(),
        queue.clone(),
        config.data_dir.clone(),
    ));

    // The queue is in memory; put back whatever was accepted but never dispatched.
    job_service.recover_pending().await?;

    let workers = match config.worker_override {
        Some(workers) => {
            info!(workers, "Using configured worker count");
            workers
        }
        None => worker_count(&NvidiaSmiProbe, config.gpu_mem_per_worker),
    };

    let worker_pool = Arc::new(WorkerPool::new(
        WorkerPoolConfig {
            workers,
            oom_cooldown: config.pipeline.oom_cooldown,
        },
        queue,
        repository,
        Arc::new(SubprocessRunner::new(config.pipeline.clone())),
    ));
    worker_pool.start();

    let server = ApiServer::new(
        config.api.clone(),
        AppState::new(job_service).with_worker_pool(worker_pool.clone()),
    );

    let cancel_token = server.cancel_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                cancel_token.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    info!("extract-queue {} started", env!("CARGO_PKG_VERSION"));
    let served = server.run().await;

    if tokio::time::timeout(SHUTDOWN_GRACE, worker_pool.stop())
        .await
        .is_err()
    {
        warn!("Workers did not finish in time, abandoning in-flight jobs");
    }
    pool.close().await;

    served?;
    Ok(())
}
