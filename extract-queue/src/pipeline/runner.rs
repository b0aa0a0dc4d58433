//! Invocation of the external extraction pipeline.
//!
//! The pipeline is a black box run as a separate OS process:
//!
//! ```text
//! <program> <args...> <output_dir> <job_id> <compress_images>
//! ```
//!
//! Exit code 0 means the result archive is in `output_dir`, the configured
//! OOM exit code means "out of GPU memory, try again later", and anything else
//! is a permanent failure for this attempt.

use async_trait::async_trait;
use parking_lot::Mutex;
use process_utils::{ExitKind, tokio_command};
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::job_queue::JobDescriptor;
use crate::config::PipelineConfig;
use crate::{Error, Result};

/// Number of trailing stderr lines kept for error messages.
const STDERR_TAIL_LINES: usize = 5;

/// How long output is still read once the pipeline has exited.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Outcome of one pipeline run, as far as the dispatch loop cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Exit code 0.
    Success,
    /// The OOM exit code; the job should be queued again.
    OutOfMemory,
    /// Any other ending, with a diagnostic for the job record.
    Failed(String),
}

/// Something that can run the extraction pipeline for a job.
#[async_trait]
pub trait ExtractionRunner: Send + Sync {
    /// Run the pipeline to completion.
    ///
    /// `Err` means the pipeline could not be launched or awaited at all.
    async fn run(&self, descriptor: &JobDescriptor) -> Result<RunOutcome>;
}

/// Runs the pipeline as a child process.
pub struct SubprocessRunner {
    config: PipelineConfig,
}

impl SubprocessRunner {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Full argument list for a descriptor, excluding the program.
    pub fn arguments(&self, descriptor: &JobDescriptor) -> Vec<String> {
        let mut args = self.config.args.clone();
        args.push(descriptor.output_dir.to_string_lossy().into_owned());
        args.push(descriptor.job_id.clone());
        args.push(descriptor.options.to_arg());
        args
    }

    /// Map an exit status to a dispatch outcome.
    pub fn classify(&self, exit: ExitKind, stderr_tail: &[String]) -> RunOutcome {
        match exit {
            ExitKind::Code(0) => RunOutcome::Success,
            ExitKind::Code(code) if code == self.config.oom_exit_code => RunOutcome::OutOfMemory,
            other => {
                let mut message = format!("Extraction pipeline failed with {}", other);
                if !stderr_tail.is_empty() {
                    message.push_str(": ");
                    message.push_str(&stderr_tail.join("\n"));
                }
                RunOutcome::Failed(message)
            }
        }
    }
}

/// Last few non-empty lines of a child stream.
type StreamTail = Arc<Mutex<VecDeque<String>>>;

/// Forward a child stream to the log, keeping its last few lines in `tail`.
fn spawn_line_reader<R>(stream: R, label: &'static str, tail: StreamTail) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!("{}: {}", label, line);
            if line.trim().is_empty() {
                continue;
            }
            let mut tail = tail.lock();
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    })
}

/// Wait up to `grace` for the readers to hit EOF, then abort them.
///
/// Background processes left by the pipeline can hold its pipes open after
/// it exits.
async fn drain_readers(handles: Vec<JoinHandle<()>>, grace: Duration) {
    let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
    let joined = async {
        for handle in handles {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(grace, joined).await.is_err() {
        debug!("Pipeline output still open after exit, detaching readers");
        for abort in aborts {
            abort.abort();
        }
    }
}

#[async_trait]
impl ExtractionRunner for SubprocessRunner {
    async fn run(&self, descriptor: &JobDescriptor) -> Result<RunOutcome> {
        let start = Instant::now();
        let args = self.arguments(descriptor);

        info!(
            job_id = %descriptor.job_id,
            program = %self.config.program,
            "Launching extraction pipeline"
        );

        let mut child = tokio_command(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::Subprocess(format!(
                    "Failed to spawn '{}': {}",
                    self.config.program, e
                ))
            })?;

        let stderr_tail = StreamTail::default();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_line_reader(stdout, "stdout", StreamTail::default()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_line_reader(stderr, "stderr", stderr_tail.clone()));
        }

        let waited = match self.config.job_timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
            None => Some(child.wait().await),
        };

        let Some(status) = waited else {
            warn!(job_id = %descriptor.job_id, "Extraction pipeline timed out, killing it");
            let _ = child.kill().await;
            for reader in readers {
                reader.abort();
            }
            let limit = self.config.job_timeout.unwrap_or_default();
            return Ok(RunOutcome::Failed(format!(
                "Extraction pipeline timed out after {}s",
                limit.as_secs()
            )));
        };

        drain_readers(readers, OUTPUT_DRAIN_GRACE).await;
        let stderr_tail: Vec<String> = stderr_tail.lock().iter().cloned().collect();

        let status = status
            .map_err(|e| Error::Subprocess(format!("Failed to wait for pipeline: {}", e)))?;
        let exit = ExitKind::from_status(&status);

        info!(
            job_id = %descriptor.job_id,
            exit = %exit,
            exit_code = ?exit.code(),
            elapsed_secs = start.elapsed().as_secs_f64(),
            "Extraction pipeline exited"
        );

        Ok(self.classify(exit, &stderr_tail))
    }
}
