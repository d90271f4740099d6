//! Durable FIFO handoff between intake and the delivery workers.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

pub use memory::MemoryQueue;
pub use postgres::PgQueue;

/// Channel name used when none is configured.
pub const DEFAULT_TOPIC: &str = "form_submissions";

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue backend error: {0}")]
    Database(#[from] sqlx::Error),

    /// The entry was redelivered to another consumer after this claim lapsed.
    #[error("claim on queue entry {id} (delivery {deliveries}) is no longer held")]
    ClaimLost { id: i64, deliveries: u32 },
}

/// An entry handed to a consumer. Stays owned by that consumer until it is
/// acknowledged or released.
///
/// `deliveries` counts how many times the entry has been handed out, this
/// one included. It also identifies the claim: `ack` and `release` only
/// succeed for the latest delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: i64,
    pub payload: Vec<u8>,
    pub deliveries: u32,
}

/// A single named FIFO channel.
///
/// Entries are delivered in enqueue order. `dequeue` waits until an entry is
/// available and never returns empty-handed. An entry that is dequeued but
/// never acknowledged becomes visible again (after a lease on durable
/// backends), so delivery is at-least-once.
#[async_trait]
pub trait Queue: Send + Sync {
    fn topic(&self) -> &str;

    async fn enqueue(&self, payload: &[u8]) -> Result<(), QueueError>;

    /// Wait for the next entry, or return `None` once `stop` is set.
    ///
    /// Only the wait is interrupted by `stop`; a claim already sent to the
    /// backend always completes and is returned. Callers must not race this
    /// future against their own shutdown signal.
    async fn dequeue_until(
        &self,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<Option<QueueEntry>, QueueError>;

    /// Wait for the next entry.
    async fn dequeue(&self) -> Result<QueueEntry, QueueError> {
        let (_keep, mut never) = watch::channel(false);
        loop {
            if let Some(entry) = self.dequeue_until(&mut never).await? {
                return Ok(entry);
            }
        }
    }

    /// The entry has been fully handled and must not be delivered again.
    /// Fails with [`QueueError::ClaimLost`] if the entry was redelivered.
    async fn ack(&self, entry: &QueueEntry) -> Result<(), QueueError>;

    /// Hand an unfinished entry back so it is redelivered ahead of newer entries.
    /// Fails with [`QueueError::ClaimLost`] if the entry was redelivered.
    async fn release(&self, entry: &QueueEntry) -> Result<(), QueueError>;

    /// Entries not yet acknowledged, including ones currently claimed.
    async fn len(&self) -> Result<u64, QueueError>;
}
