//! Job lifecycle: submit, status, result.
//!
//! Submission never waits on the workers. A cache miss persists the document
//! under `<data_dir>/<job_id>/`, records the job as not started and pushes its
//! descriptor; a cache hit returns the existing id and enqueues nothing.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use super::cache::{ContentCache, fingerprint_blocking};
use crate::database::models::JobRecord;
use crate::database::repositories::JobRepository;
use crate::database::time::now_ms;
use crate::pipeline::{JobDescriptor, ProcessingOptions, WorkQueue};
use crate::{Error, Result};

/// Per-submission options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOptions {
    pub compress_images: bool,
    /// Return an existing job for identical content instead of creating one.
    pub use_cache: bool,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            compress_images: true,
            use_cache: true,
        }
    }
}

/// Result of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub job_id: String,
    /// True when an existing job was returned.
    pub cached: bool,
}

/// Status snapshot of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    #[serde(rename = "job_started")]
    pub started: bool,
    #[serde(rename = "job_completed")]
    pub completed: bool,
    /// Seconds between submission and first dispatch.
    pub time_in_queue: f64,
    /// Seconds since first dispatch, frozen once terminal.
    pub time_processing: Option<f64>,
    pub error: Option<String>,
}

impl JobStatus {
    fn from_record(job: &JobRecord, now: i64) -> Self {
        Self {
            started: job.started,
            completed: job.completed,
            time_in_queue: job.time_in_queue_secs(now),
            time_processing: job.time_processing_secs(now),
            error: job.error.clone(),
        }
    }
}

/// Strip any directory part and a trailing `.pdf` from an upload's file name.
///
/// Returns `None` when nothing usable remains.
pub fn display_name_from_file_name(file_name: &str) -> Option<String> {
    let base = Path::new(file_name.trim()).file_name()?.to_str()?;
    let name = base.strip_suffix(".pdf").unwrap_or(base).trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Front door for job submission and queries.
#[derive(Clone)]
pub struct JobService {
    repository: Arc<dyn JobRepository>,
    cache: ContentCache,
    queue: Arc<WorkQueue>,
    data_dir: PathBuf,
    submit_lock: Arc<Mutex<()>>,
}

impl JobService {
    pub fn new(
        repository: Arc<dyn JobRepository>,
        queue: Arc<WorkQueue>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cache: ContentCache::new(repository.clone()),
            repository,
            queue,
            data_dir: data_dir.into(),
            submit_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Submit a document for extraction.
    ///
    /// Lookup and record creation run under `submit_lock`, so identical
    /// documents submitted at the same time resolve to one job.
    pub async fn submit(
        &self,
        content: impl Into<Bytes>,
        file_name: &str,
        options: SubmitOptions,
    ) -> Result<SubmitOutcome> {
        let content = content.into();
        if content.is_empty() {
            return Err(Error::validation("Uploaded document is empty"));
        }
        let display_name = display_name_from_file_name(file_name)
            .ok_or_else(|| Error::validation("Uploaded document has no file name"))?;

        let fingerprint = fingerprint_blocking(content.clone()).await?;

        let guard = self.submit_lock.lock().await;
        let lookup = self.cache.lookup(fingerprint).await?;
        if options.use_cache
            && let Some(job_id) = lookup.existing_job_id
        {
            info!(%job_id, %display_name, "Existing extraction job found for document");
            return Ok(SubmitOutcome {
                job_id,
                cached: true,
            });
        }

        let job_id = Uuid::new_v4().to_string();
        let output_dir = self.data_dir.join(&job_id);
        let job = JobRecord::new(
            &job_id,
            &display_name,
            &lookup.fingerprint,
            output_dir.to_string_lossy(),
        )
        .with_compress_images(options.compress_images);

        let stored = async {
            tokio::fs::create_dir_all(&output_dir).await?;
            tokio::fs::write(output_dir.join(format!("{}.pdf", display_name)), &content).await?;
            self.repository.create_job(&job).await
        }
        .await;

        if let Err(e) = stored {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&output_dir).await {
                warn!(%job_id, error = %cleanup, "Failed to remove job directory");
            }
            return Err(e);
        }
        drop(guard);

        self.queue.push(JobDescriptor::new(
            &job_id,
            output_dir,
            ProcessingOptions {
                compress_images: options.compress_images,
            },
        ));

        info!(
            %job_id,
            %display_name,
            content_length = lookup.fingerprint.length,
            queue_depth = self.queue.len(),
            "Extraction job queued"
        );

        Ok(SubmitOutcome {
            job_id,
            cached: false,
        })
    }

    /// Current status of a job.
    pub async fn status(&self, job_id: &str) -> Result<JobStatus> {
        let job = self.repository.get_job(job_id).await?;
        Ok(JobStatus::from_record(&job, now_ms()))
    }

    /// Location of a completed job's result archive.
    ///
    /// Errored jobs are `NotReady` too; their status carries the error.
    pub async fn result(&self, job_id: &str) -> Result<PathBuf> {
        let job = self.repository.get_job(job_id).await?;
        if !job.completed {
            return Err(Error::not_ready(job_id));
        }
        Ok(job.archive_path())
    }

    /// Push descriptors for jobs that were recorded but never dispatched.
    ///
    /// Jobs stuck in "started" are left as they are.
    pub async fn recover_pending(&self) -> Result<usize> {
        let pending = self.repository.list_not_started().await?;
        let count = pending.len();

        for job in pending {
            self.queue.push(JobDescriptor::new(
                job.id,
                job.output_dir,
                ProcessingOptions {
                    compress_images: job.compress_images,
                },
            ));
        }

        if count > 0 {
            info!(count, "Requeued jobs that were never started");
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name() {
        assert_eq!(display_name_from_file_name("doc1.pdf").as_deref(), Some("doc1"));
        assert_eq!(
            display_name_from_file_name("report.final").as_deref(),
            Some("report.final")
        );
        assert_eq!(
            display_name_from_file_name("../../etc/paper.pdf").as_deref(),
            Some("paper")
        );
        assert_eq!(display_name_from_file_name(".pdf"), None);
        assert_eq!(display_name_from_file_name("  "), None);
        assert_eq!(display_name_from_file_name(""), None);
    }

    #[test]
    fn test_submit_options_default() {
        let options = SubmitOptions::default();
        assert!(options.compress_images);
        assert!(options.use_cache);
    }

    #[test]
    fn test_status_serialization() {
        let status = JobStatus {
            started: true,
            completed: false,
            time_in_queue: 1.5,
            time_processing: Some(2.0),
            error: None,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["job_started"], true);
        assert_eq!(json["job_completed"], false);
        assert_eq!(json["time_processing"], 2.0);
    }
}
