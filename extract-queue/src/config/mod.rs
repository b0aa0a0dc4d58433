//! Service configuration.
//!
//! Everything is read from the environment (after `.env` is loaded by
//! `main`), falling back to the defaults below.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `DATABASE_URL` | `sqlite:extract-queue.db?mode=rwc` | Job record store |
//! | `EXTRACT_DATA_DIR` | `<tmp>/extract-queue` | Per-job document and output directories |
//! | `EXTRACT_PIPELINE_PROGRAM` | `python3` | Extraction executable |
//! | `EXTRACT_PIPELINE_ARGS` | `process.py` | Arguments placed before the job arguments |
//! | `EXTRACT_GPU_MEM_PER_WORKER` | `4000000000` | Device memory budget per worker (bytes) |
//! | `EXTRACT_OOM_EXIT_CODE` | `2` | Exit code meaning "out of GPU memory, retry later" |
//! | `EXTRACT_OOM_COOLDOWN_SECS` | `30` | Delay before an OOM job is requeued |
//! | `EXTRACT_JOB_TIMEOUT_SECS` | unset | Kill a run after this long (no limit when unset) |
//! | `EXTRACT_WORKERS` | unset | Force the worker count instead of sizing from the GPU |
//! | `LOG_DIR` | `logs` | Rolling log file directory |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::api::server::ApiServerConfig;
use crate::{Error, Result};

/// Approximate device memory one extraction run needs.
pub const DEFAULT_GPU_MEM_PER_WORKER: u64 = 4_000_000_000;

/// Exit code the extraction pipeline uses to report GPU exhaustion.
pub const DEFAULT_OOM_EXIT_CODE: i32 = 2;

/// Delay before a job that ran out of GPU memory is queued again.
pub const DEFAULT_OOM_COOLDOWN: Duration = Duration::from_secs(30);

const DEFAULT_DATABASE_URL: &str = "sqlite:extract-queue.db?mode=rwc";
const DEFAULT_PIPELINE_PROGRAM: &str = "python3";
const DEFAULT_PIPELINE_ARGS: &str = "process.py";
const DEFAULT_LOG_DIR: &str = "logs";

/// How the external extraction pipeline is launched and interpreted.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Executable to launch.
    pub program: String,
    /// Arguments placed before `<output_dir> <job_id> <options>`.
    pub args: Vec<String>,
    /// Exit code meaning transient GPU exhaustion.
    pub oom_exit_code: i32,
    /// Sleep before requeueing an OOM job.
    pub oom_cooldown: Duration,
    /// Optional wall-clock limit per run. `None` waits forever.
    pub job_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_PIPELINE_PROGRAM.to_string(),
            args: vec![DEFAULT_PIPELINE_ARGS.to_string()],
            oom_exit_code: DEFAULT_OOM_EXIT_CODE,
            oom_cooldown: DEFAULT_OOM_COOLDOWN,
            job_timeout: None,
        }
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    /// Parent of the per-job directories.
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Device memory budget per worker, in bytes.
    pub gpu_mem_per_worker: u64,
    /// Explicit worker count; skips GPU sizing when set.
    pub worker_override: Option<usize>,
    pub pipeline: PipelineConfig,
    pub api: ApiServerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            data_dir: std::env::temp_dir().join("extract-queue"),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            gpu_mem_per_worker: DEFAULT_GPU_MEM_PER_WORKER,
            worker_override: None,
            pipeline: PipelineConfig::default(),
            api: ApiServerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(dir) = get("EXTRACT_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(program) = get("EXTRACT_PIPELINE_PROGRAM") {
            config.pipeline.program = program;
        }
        if let Some(args) = lookup("EXTRACT_PIPELINE_ARGS") {
            config.pipeline.args = args.split_whitespace().map(str::to_string).collect();
        }
        if let Some(bytes) = get("EXTRACT_GPU_MEM_PER_WORKER") {
            let bytes: u64 = parse_var("EXTRACT_GPU_MEM_PER_WORKER", &bytes)?;
            if bytes == 0 {
                return Err(Error::config("EXTRACT_GPU_MEM_PER_WORKER must be positive"));
            }
            config.gpu_mem_per_worker = bytes;
        }
        if let Some(code) = get("EXTRACT_OOM_EXIT_CODE") {
            let code: i32 = parse_var("EXTRACT_OOM_EXIT_CODE", &code)?;
            if code == 0 {
                return Err(Error::config("EXTRACT_OOM_EXIT_CODE cannot be 0"));
            }
            config.pipeline.oom_exit_code = code;
        }
        if let Some(secs) = get("EXTRACT_OOM_COOLDOWN_SECS") {
            config.pipeline.oom_cooldown =
                Duration::from_secs(parse_var("EXTRACT_OOM_COOLDOWN_SECS", &secs)?);
        }
        if let Some(secs) = get("EXTRACT_JOB_TIMEOUT_SECS") {
            let secs: u64 = parse_var("EXTRACT_JOB_TIMEOUT_SECS", &secs)?;
            config.pipeline.job_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(workers) = get("EXTRACT_WORKERS") {
            let workers: usize = parse_var("EXTRACT_WORKERS", &workers)?;
            config.worker_override = Some(workers.max(1));
        }

        config.api = ApiServerConfig::from_lookup(&lookup)?;

        Ok(config)
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::config(format!("Invalid {} '{}': {}", key, value, e)))
}
