//! Submission-side services.

pub mod cache;
pub mod jobs;

pub use cache::{CacheLookup, ContentCache, fingerprint};
pub use jobs::{JobService, JobStatus, SubmitOptions, SubmitOutcome, display_name_from_file_name};
