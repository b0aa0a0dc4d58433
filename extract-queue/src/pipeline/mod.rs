//! Job dispatch: queue, worker pool, pipeline runner and pool sizing.

pub mod job_queue;
pub mod runner;
pub mod sizing;
pub mod worker_pool;

pub use job_queue::{JobDescriptor, ProcessingOptions, WorkQueue};
pub use runner::{ExtractionRunner, RunOutcome, SubprocessRunner};
pub use sizing::{DeviceMemoryProbe, FixedProbe, NvidiaSmiProbe, worker_count};
pub use worker_pool::{DispatchResult, Dispatcher, WorkerPool, WorkerPoolConfig};
