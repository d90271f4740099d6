use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use uuid::Uuid;

use super::{StatusError, StatusStore, status_key};
use crate::models::SubmissionStatus;

/// In-process status store. Expiry follows the tokio clock, so paused-time
/// tests can advance past the TTL.
pub struct MemoryStatusStore {
    /// key -> (status, expires_at)
    entries: DashMap<String, (SubmissionStatus, Instant)>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl Default for MemoryStatusStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn set_status(
        &self,
        id: Uuid,
        status: SubmissionStatus,
        ttl: Duration,
    ) -> Result<(), StatusError> {
        self.entries
            .insert(status_key(id), (status, Instant::now() + ttl));
        Ok(())
    }

    async fn get_status(&self, id: Uuid) -> Result<Option<SubmissionStatus>, StatusError> {
        let key = status_key(id);
        let now = Instant::now();

        if let Some(entry) = self.entries.get(&key) {
            let (status, expires_at) = *entry.value();
            if now < expires_at {
                return Ok(Some(status));
            }
        }

        self.entries
            .remove_if(&key, |_, (_, expires_at)| now >= *expires_at);
        Ok(None)
    }

    async fn purge_expired(&self) -> Result<u64, StatusError> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires_at)| now < *expires_at);
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }
}
