use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, watch};

use super::{Queue, QueueEntry, QueueError};
use crate::shutdown::stopped;

#[derive(Default)]
struct Inner {
    next_id: i64,
    ready: VecDeque<QueueEntry>,
    claimed: HashMap<i64, QueueEntry>,
}

impl Inner {
    /// Remove the claim held by `entry`, if it is still the latest delivery.
    fn take_claim(&mut self, entry: &QueueEntry) -> Result<QueueEntry, QueueError> {
        match self.claimed.remove(&entry.id) {
            Some(held) if held.deliveries == entry.deliveries => Ok(held),
            other => {
                if let Some(held) = other {
                    self.claimed.insert(held.id, held);
                }
                Err(QueueError::ClaimLost {
                    id: entry.id,
                    deliveries: entry.deliveries,
                })
            }
        }
    }
}

/// Process-local queue. Same ordering and blocking contract as [`super::PgQueue`]
/// but entries do not survive a restart.
pub struct MemoryQueue {
    topic: String,
    inner: Mutex<Inner>,
    wakeup: Notify,
}

impl MemoryQueue {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            inner: Mutex::new(Inner::default()),
            wakeup: Notify::new(),
        }
    }

    /// Entries waiting to be dequeued.
    pub async fn ready_len(&self) -> usize {
        self.inner.lock().await.ready.len()
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn enqueue(&self, payload: &[u8]) -> Result<(), QueueError> {
        {
            let mut inner = self.inner.lock().await;
            inner.next_id += 1;
            let id = inner.next_id;
            inner.ready.push_back(QueueEntry {
                id,
                payload: payload.to_vec(),
                deliveries: 0,
            });
        }
        self.wakeup.notify_waiters();
        Ok(())
    }

    async fn dequeue_until(
        &self,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<Option<QueueEntry>, QueueError> {
        loop {
            if *stop.borrow() {
                return Ok(None);
            }

            let notified = self.wakeup.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock().await;
                if let Some(mut entry) = inner.ready.pop_front() {
                    entry.deliveries += 1;
                    inner.claimed.insert(entry.id, entry.clone());
                    return Ok(Some(entry));
                }
            }

            tokio::select! {
                _ = notified => {}
                _ = stopped(stop) => return Ok(None),
            }
        }
    }

    async fn ack(&self, entry: &QueueEntry) -> Result<(), QueueError> {
        self.inner.lock().await.take_claim(entry)?;
        Ok(())
    }

    async fn release(&self, entry: &QueueEntry) -> Result<(), QueueError> {
        {
            let mut inner = self.inner.lock().await;
            let entry = inner.take_claim(entry)?;
            inner.ready.push_front(entry);
        }
        self.wakeup.notify_waiters();
        Ok(())
    }

    async fn len(&self) -> Result<u64, QueueError> {
        let inner = self.inner.lock().await;
        Ok((inner.ready.len() + inner.claimed.len()) as u64)
    }
}
