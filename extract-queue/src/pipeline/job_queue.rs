//! In-memory work queue feeding the worker pool.
//!
//! Unbounded FIFO, safe for any number of producers (submissions and OOM
//! requeues) and consumers (workers). Each descriptor is handed to exactly one
//! `pop` caller, which is what keeps a job id on a single worker at a time.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use tokio::sync::Notify;

/// Options forwarded to the extraction pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingOptions {
    /// Produce compressed rather than full-resolution extraction images.
    pub compress_images: bool,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            compress_images: true,
        }
    }
}

impl ProcessingOptions {
    /// Positional argument form passed to the pipeline.
    pub fn to_arg(&self) -> String {
        self.compress_images.to_string()
    }
}

/// Everything a worker needs to (re)dispatch a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub job_id: String,
    /// Directory containing the submitted document; results are written here too.
    pub output_dir: PathBuf,
    pub options: ProcessingOptions,
}

impl JobDescriptor {
    pub fn new(
        job_id: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        options: ProcessingOptions,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            output_dir: output_dir.into(),
            options,
        }
    }
}

/// Unbounded multi-producer multi-consumer FIFO of job descriptors.
#[derive(Debug, Default)]
pub struct WorkQueue {
    items: Mutex<VecDeque<JobDescriptor>>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a descriptor to the tail. Never blocks.
    pub fn push(&self, descriptor: JobDescriptor) {
        self.items.lock().push_back(descriptor);
        self.notify.notify_one();
    }

    /// Remove the head descriptor, waiting until one is available.
    ///
    /// Cancel-safe: dropping the future before it resolves never loses an item.
    pub async fn pop(&self) -> JobDescriptor {
        loop {
            if let Some(descriptor) = self.try_pop() {
                return descriptor;
            }
            self.notify.notified().await;
        }
    }

    /// Remove the head descriptor if there is one.
    pub fn try_pop(&self) -> Option<JobDescriptor> {
        let mut items = self.items.lock();
        let descriptor = items.pop_front();
        // `notify_one` stores at most one permit, so a burst of pushes can wake
        // fewer consumers than there are items. Pass the wakeup along.
        if descriptor.is_some() && !items.is_empty() {
            self.notify.notify_one();
        }
        descriptor
    }

    /// Number of queued descriptors.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn descriptor(id: &str) -> JobDescriptor {
        JobDescriptor::new(id, format!("/tmp/{id}"), ProcessingOptions::default())
    }

    #[test]
    fn test_fifo_order() {
        let queue = WorkQueue::new();
        queue.push(descriptor("a"));
        queue.push(descriptor("b"));
        queue.push(descriptor("c"));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_pop().unwrap().job_id, "a");
        assert_eq!(queue.try_pop().unwrap().job_id, "b");
        assert_eq!(queue.try_pop().unwrap().job_id, "c");
        assert!(queue.try_pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_options_arg() {
        assert_eq!(ProcessingOptions::default().to_arg(), "true");
        assert_eq!(
            ProcessingOptions {
                compress_images: false
            }
            .to_arg(),
            "false"
        );
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(WorkQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.push(descriptor("late"));
        let got = tokio::time::timeout(Duration::from_secs(5), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.job_id, "late");
    }

    #[tokio::test]
    async fn test_burst_wakes_every_waiting_consumer() {
        let queue = Arc::new(WorkQueue::new());
        let mut consumers = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            consumers.push(tokio::spawn(async move { queue.pop().await.job_id }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        for id in ["1", "2", "3", "4"] {
            queue.push(descriptor(id));
        }

        let mut ids = Vec::new();
        for consumer in consumers {
            ids.push(
                tokio::time::timeout(Duration::from_secs(5), consumer)
                    .await
                    .unwrap()
                    .unwrap(),
            );
        }
        ids.sort();
        assert_eq!(ids, vec!["1", "2", "3", "4"]);
        assert!(queue.is_empty());
    }
}
