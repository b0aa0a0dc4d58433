//! Extraction job database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::path::PathBuf;

use crate::database::time::{elapsed_secs, now_ms};

/// File name suffix of the archive the extraction pipeline leaves in the output directory.
pub const RESULT_ARCHIVE_SUFFIX: &str = "_output.zip";

/// Content fingerprint: SHA-256 digest (lower-case hex) plus byte length.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub digest: String,
    pub length: i64,
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.digest, self.length)
    }
}

/// Extraction job database model.
///
/// One row per submitted document. Lifecycle flags only ever move forward:
/// `started` is set by the worker that dequeues the job, then exactly one of
/// `completed` or `error` is set.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    /// Document name without the `.pdf` extension
    pub display_name: String,
    /// Hex SHA-256 of the submitted bytes
    pub fingerprint: String,
    pub content_length: i64,
    /// Directory holding the submitted document and, later, the result archive
    pub output_dir: String,
    /// Pipeline option, kept so pending jobs can be requeued after a restart
    pub compress_images: bool,
    pub started: bool,
    pub completed: bool,
    pub error: Option<String>,
    /// Epoch ms when the job entered the queue
    pub queued_at: i64,
    /// Epoch ms of the first dispatch
    pub started_at: Option<i64>,
    /// Epoch ms of the terminal transition
    pub finished_at: Option<i64>,
}

impl JobRecord {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        fingerprint: &Fingerprint,
        output_dir: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            fingerprint: fingerprint.digest.clone(),
            content_length: fingerprint.length,
            output_dir: output_dir.into(),
            compress_images: true,
            started: false,
            completed: false,
            error: None,
            queued_at: now_ms(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn with_compress_images(mut self, compress_images: bool) -> Self {
        self.compress_images = compress_images;
        self
    }

    /// Current lifecycle state derived from the flags.
    pub fn state(&self) -> JobState {
        match (self.started, self.completed, self.error.is_some()) {
            (_, true, _) => JobState::Completed,
            (_, _, true) => JobState::Errored,
            (true, _, _) => JobState::Started,
            _ => JobState::NotStarted,
        }
    }

    /// Seconds spent waiting for the first dispatch (still growing while not started).
    pub fn time_in_queue_secs(&self, now: i64) -> f64 {
        elapsed_secs(self.queued_at, self.started_at.unwrap_or(now))
    }

    /// Seconds since the first dispatch, frozen once the job is terminal.
    pub fn time_processing_secs(&self, now: i64) -> Option<f64> {
        self.started_at
            .map(|started| elapsed_secs(started, self.finished_at.unwrap_or(now)))
    }

    /// File name of the result archive.
    pub fn archive_name(&self) -> String {
        format!("{}{}", self.display_name, RESULT_ARCHIVE_SUFFIX)
    }

    /// Location of the result archive inside the output directory.
    pub fn archive_path(&self) -> PathBuf {
        PathBuf::from(&self.output_dir).join(self.archive_name())
    }
}

/// Job lifecycle states.
///
/// An OOM requeue keeps a job in `Started`; there is no separate retry state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    NotStarted,
    Started,
    Completed,
    Errored,
}

impl JobState {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Errored)
    }
}
