//! TTL-bounded record of each submission's final delivery outcome.

pub mod memory;
pub mod postgres;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::models::SubmissionStatus;
use crate::shutdown;

pub use memory::MemoryStatusStore;
pub use postgres::PgStatusStore;

/// Retention of a status record.
pub const STATUS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Error, Debug)]
pub enum StatusError {
    #[error("status backend error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt status record for '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

pub fn status_key(id: Uuid) -> String {
    format!("submission_status:{id}")
}

/// `get_status` returning `None` means the submission was never processed or
/// its record expired; the two cases are indistinguishable.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn set_status(
        &self,
        id: Uuid,
        status: SubmissionStatus,
        ttl: Duration,
    ) -> Result<(), StatusError>;

    async fn get_status(&self, id: Uuid) -> Result<Option<SubmissionStatus>, StatusError>;

    /// Remove expired records, returning how many were removed.
    async fn purge_expired(&self) -> Result<u64, StatusError>;
}

fn parse_status(key: &str, raw: &str) -> Result<SubmissionStatus, StatusError> {
    raw.parse().map_err(|reason| StatusError::Corrupt {
        key: key.to_string(),
        reason,
    })
}

/// Periodically sweep expired status records until shutdown is signaled.
pub fn spawn_purge(
    store: Arc<dyn StatusStore>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown::stopped(&mut stop) => break,
            }

            match store.purge_expired().await {
                Ok(0) => {}
                Ok(n) => tracing::debug!("Purged {n} expired status records"),
                Err(e) => tracing::warn!("Status purge failed: {e}"),
            }
        }
    })
}
