//! Request and response bodies.

use serde::{Deserialize, Serialize};

/// Response to a document submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCreationResponse {
    pub message: String,
    pub job_id: String,
    pub status_endpoint: String,
    pub result_endpoint: String,
}

/// Build information.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: Option<String>,
    pub git_hash: Option<String>,
}

/// Liveness report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    /// Descriptors waiting for a worker.
    pub queue_depth: usize,
    pub workers: usize,
    /// Workers currently running a job.
    pub busy_workers: usize,
}
