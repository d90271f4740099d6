use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use super::{Queue, QueueEntry, QueueError};
use crate::shutdown::stopped;

/// How often an idle consumer re-checks for entries whose lease expired.
const RECHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Postgres-backed queue.
///
/// Entries are rows in `queue_entries` ordered by their sequence id. A dequeue
/// claims the oldest visible row with `FOR UPDATE SKIP LOCKED`, so several
/// consumers never receive the same entry at once. Claimed rows are deleted on
/// ack; a row whose claim is older than the lease becomes visible again.
/// Each claim bumps `deliveries`, and ack/release match on it so a consumer
/// whose lease lapsed cannot touch the newer claim.
/// Idle consumers sleep on a `LISTEN` channel that every enqueue notifies.
pub struct PgQueue {
    pool: PgPool,
    topic: String,
    channel: String,
    lease: Duration,
    wakeup: Arc<Notify>,
    listener: JoinHandle<()>,
}

impl PgQueue {
    pub async fn connect(
        pool: PgPool,
        topic: impl Into<String>,
        lease: Duration,
    ) -> Result<Self, QueueError> {
        let topic = topic.into();
        let channel = format!("queue_{topic}");

        let mut listener = PgListener::connect_with(&pool).await?;
        listener.listen(&channel).await?;

        let wakeup = Arc::new(Notify::new());
        let listener = tokio::spawn(listen(listener, wakeup.clone()));

        tracing::info!("Queue '{topic}' connected (lease {}s)", lease.as_secs());

        Ok(Self {
            pool,
            topic,
            channel,
            lease,
            wakeup,
            listener,
        })
    }

    async fn claim(&self) -> Result<Option<QueueEntry>, QueueError> {
        let row = sqlx::query_as::<_, (i64, Vec<u8>, i32)>(
            "UPDATE queue_entries SET claimed_at = now(), deliveries = deliveries + 1
             WHERE id = (
                 SELECT id FROM queue_entries
                 WHERE topic = $1
                   AND (claimed_at IS NULL
                        OR claimed_at < now() - make_interval(secs => $2::double precision))
                 ORDER BY id ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, payload, deliveries",
        )
        .bind(&self.topic)
        .bind(self.lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, payload, deliveries)| QueueEntry {
            id,
            payload,
            deliveries: deliveries.max(0) as u32,
        }))
    }

    fn claim_lost(entry: &QueueEntry) -> QueueError {
        QueueError::ClaimLost {
            id: entry.id,
            deliveries: entry.deliveries,
        }
    }
}

impl Drop for PgQueue {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

async fn listen(mut listener: PgListener, wakeup: Arc<Notify>) {
    loop {
        match listener.recv().await {
            Ok(_) => wakeup.notify_waiters(),
            Err(e) => {
                tracing::warn!("Queue listener error: {e}");
                // Notifications may have been lost while reconnecting.
                wakeup.notify_waiters();
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

#[async_trait]
impl Queue for PgQueue {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn enqueue(&self, payload: &[u8]) -> Result<(), QueueError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO queue_entries (topic, payload) VALUES ($1, $2)")
            .bind(&self.topic)
            .bind(payload)
            .execute(&mut *tx)
            .await?;

        sqlx::query("SELECT pg_notify($1, '')")
            .bind(&self.channel)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
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

            if let Some(entry) = self.claim().await? {
                return Ok(Some(entry));
            }

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(RECHECK_INTERVAL) => {}
                _ = stopped(stop) => return Ok(None),
            }
        }
    }

    async fn ack(&self, entry: &QueueEntry) -> Result<(), QueueError> {
        let result = sqlx::query("DELETE FROM queue_entries WHERE id = $1 AND deliveries = $2")
            .bind(entry.id)
            .bind(entry.deliveries as i32)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Self::claim_lost(entry));
        }
        Ok(())
    }

    async fn release(&self, entry: &QueueEntry) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE queue_entries SET claimed_at = NULL
             WHERE id = $1 AND deliveries = $2 AND claimed_at IS NOT NULL",
        )
        .bind(entry.id)
        .bind(entry.deliveries as i32)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Self::claim_lost(entry));
        }

        sqlx::query("SELECT pg_notify($1, '')")
            .bind(&self.channel)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn len(&self) -> Result<u64, QueueError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_entries WHERE topic = $1")
            .bind(&self.topic)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
