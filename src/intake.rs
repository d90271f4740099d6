use std::sync::Arc;

use thiserror::Error;

use crate::audit::AuditLog;
use crate::models::{Submission, SubmissionFields};
use crate::queue::{Queue, QueueError};

#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("failed to write audit log: {0}")]
    Audit(#[source] std::io::Error),

    #[error("failed to serialize submission: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to enqueue submission: {0}")]
    Queue(#[from] QueueError),
}

/// Producer side of the pipeline. Stamps identity onto caller fields and
/// hands the full record to the queue without waiting for delivery.
#[derive(Clone)]
pub struct Intake {
    queue: Arc<dyn Queue>,
    audit: Option<Arc<AuditLog>>,
}

impl Intake {
    pub fn new(queue: Arc<dyn Queue>) -> Self {
        Self { queue, audit: None }
    }

    /// Record every accepted submission in `log` before it is queued.
    pub fn with_audit_log(mut self, log: Arc<AuditLog>) -> Self {
        self.audit = Some(log);
        self
    }

    /// Accept a submission and enqueue it.
    ///
    /// Identical fields submitted twice produce two submissions with distinct ids.
    /// On error nothing was enqueued and the caller may retry the whole call.
    pub async fn submit(&self, fields: SubmissionFields) -> Result<Submission, IntakeError> {
        let submission = Submission::accept(fields);
        let payload = serde_json::to_vec(&submission)?;

        if let Some(audit) = &self.audit {
            audit.record(&submission).await.map_err(IntakeError::Audit)?;
        }

        self.queue.enqueue(&payload).await?;

        tracing::debug!(
            "Queued submission {} on '{}'",
            submission.id(),
            self.queue.topic()
        );
        Ok(submission)
    }
}
