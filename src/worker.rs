use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::{Submission, SubmissionStatus};
use crate::queue::{Queue, QueueEntry, QueueError};
use crate::shutdown::stopped;
use crate::sink::{Sink, SinkError};
use crate::status::{STATUS_TTL, StatusStore};

/// Fixed-delay retry: `max_retries` further attempts after the first one,
/// `delay` apart. No backoff growth, no jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// What happened to one dequeued entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The sink accepted the record.
    Completed { id: Uuid, attempts: u32 },
    /// Every attempt failed.
    Failed { id: Uuid, attempts: u32 },
    /// The entry could not be decoded and was dropped.
    Discarded,
    /// Shutdown interrupted the retry wait; the entry went back to the queue.
    Released { id: Uuid, attempts: u32 },
}

enum Delivery {
    Finished(SubmissionStatus),
    Interrupted,
}

/// Consumes the queue and delivers each submission to the sink.
///
/// Dependencies are injected so several workers, each with its own backends,
/// can run side by side.
pub struct Worker {
    queue: Arc<dyn Queue>,
    sink: Arc<dyn Sink>,
    statuses: Arc<dyn StatusStore>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    status_ttl: Duration,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn Queue>,
        sink: Arc<dyn Sink>,
        statuses: Arc<dyn StatusStore>,
    ) -> Self {
        Self {
            queue,
            sink,
            statuses,
            policy: RetryPolicy::default(),
            attempt_timeout: Duration::from_secs(30),
            status_ttl: STATUS_TTL,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_status_ttl(mut self, ttl: Duration) -> Self {
        self.status_ttl = ttl;
        self
    }

    /// Dequeue and process entries until shutdown is signaled.
    ///
    /// Shutdown stops further dequeues. An entry already in hand is carried to
    /// a terminal status unless shutdown arrives while waiting between
    /// attempts, in which case it is released back to the queue.
    pub async fn run(&self, id: usize, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!("Worker {id} started on '{}'", self.queue.topic());

        loop {
            match self.queue.dequeue_until(&mut shutdown).await {
                Ok(Some(entry)) => {
                    self.process(entry, &mut shutdown).await;
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Worker {id} failed to dequeue: {e}");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                        _ = stopped(&mut shutdown) => break,
                    }
                }
            }
        }

        tracing::debug!("Worker {id} stopped");
    }

    /// Handle a single dequeued entry through to a terminal outcome.
    pub async fn process(
        &self,
        entry: QueueEntry,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Outcome {
        let submission: Submission = match serde_json::from_slice(&entry.payload) {
            Ok(submission) => submission,
            Err(e) => {
                tracing::error!("Discarding malformed queue entry {}: {e}", entry.id);
                self.ack(&entry).await;
                return Outcome::Discarded;
            }
        };

        let id = submission.id();
        if entry.deliveries > 1 {
            tracing::warn!(
                "Submission {id} redelivered (entry {}, delivery {})",
                entry.id,
                entry.deliveries
            );
        } else {
            tracing::debug!("Processing submission {id} (entry {})", entry.id);
        }

        let (delivery, attempts) = self.deliver(&submission, shutdown).await;

        let status = match delivery {
            Delivery::Finished(status) => status,
            Delivery::Interrupted => {
                tracing::info!("Submission {id} released after {attempts} attempts (shutting down)");
                match self.queue.release(&entry).await {
                    Ok(()) => {}
                    Err(e @ QueueError::ClaimLost { .. }) => tracing::warn!("{e}"),
                    Err(e) => tracing::error!("Failed to release queue entry {}: {e}", entry.id),
                }
                return Outcome::Released { id, attempts };
            }
        };

        if let Err(e) = self.statuses.set_status(id, status, self.status_ttl).await {
            tracing::error!("Failed to record status '{status}' for submission {id}: {e}");
        }
        self.ack(&entry).await;

        match status {
            SubmissionStatus::Completed => Outcome::Completed { id, attempts },
            _ => Outcome::Failed { id, attempts },
        }
    }

    async fn deliver(
        &self,
        submission: &Submission,
        shutdown: &mut watch::Receiver<bool>,
    ) -> (Delivery, u32) {
        let id = submission.id();
        let max_attempts = self.policy.max_attempts();
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.attempt(submission).await {
                Ok(()) => {
                    tracing::info!(
                        "Submission {id} delivered to {} (attempt {attempts})",
                        self.sink.name()
                    );
                    return (Delivery::Finished(SubmissionStatus::Completed), attempts);
                }
                Err(e) if attempts >= max_attempts => {
                    tracing::error!("Submission {id} failed after {attempts} attempts: {e}");
                    return (Delivery::Finished(SubmissionStatus::Failed), attempts);
                }
                Err(e) => {
                    tracing::warn!(
                        "Submission {id} attempt {attempts}/{max_attempts} failed: {e}; retrying in {:?}",
                        self.policy.delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.policy.delay) => {}
                        _ = stopped(shutdown) => return (Delivery::Interrupted, attempts),
                    }
                }
            }
        }
    }

    async fn attempt(&self, submission: &Submission) -> Result<(), SinkError> {
        match tokio::time::timeout(self.attempt_timeout, self.sink.append(submission)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout(self.attempt_timeout)),
        }
    }

    async fn ack(&self, entry: &QueueEntry) {
        match self.queue.ack(entry).await {
            Ok(()) => {}
            Err(e @ QueueError::ClaimLost { .. }) => tracing::warn!("{e}"),
            Err(e) => tracing::error!("Failed to acknowledge queue entry {}: {e}", entry.id),
        }
    }
}

/// Spawn `count` worker loops on the current runtime.
pub fn spawn(
    worker: Arc<Worker>,
    shutdown: watch::Receiver<bool>,
    count: usize,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|id| {
            let worker = worker.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { worker.run(id, shutdown).await })
        })
        .collect()
}

/// Start a worker pool on a dedicated Tokio runtime with its own thread pool.
/// This runs on a separate OS thread and blocks until shutdown is signaled.
pub fn run_pool(
    worker: Arc<Worker>,
    shutdown: watch::Receiver<bool>,
    worker_count: usize,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_count)
        .thread_name("delivery-worker")
        .enable_all()
        .build()?;

    std::thread::Builder::new()
        .name("worker-pool".into())
        .spawn(move || {
            runtime.block_on(async {
                let handles = spawn(worker, shutdown, worker_count);

                tracing::info!("Delivery worker pool started ({worker_count} workers)");

                for handle in handles {
                    let _ = handle.await;
                }

                tracing::info!("Delivery worker pool stopped");
            });
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_delivery_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.delay, Duration::from_secs(2));
        assert_eq!(policy.max_attempts(), 4);
    }

    #[test]
    fn zero_retries_still_makes_one_attempt() {
        let policy = RetryPolicy {
            max_retries: 0,
            delay: Duration::ZERO,
        };
        assert_eq!(policy.max_attempts(), 1);
    }
}
