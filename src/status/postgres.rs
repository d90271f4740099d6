use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{StatusError, StatusStore, parse_status, status_key};
use crate::models::SubmissionStatus;

pub struct PgStatusStore {
    pool: PgPool,
}

impl PgStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatusStore for PgStatusStore {
    async fn set_status(
        &self,
        id: Uuid,
        status: SubmissionStatus,
        ttl: Duration,
    ) -> Result<(), StatusError> {
        sqlx::query(
            "INSERT INTO submission_status (key, status, expires_at)
             VALUES ($1, $2, now() + make_interval(secs => $3::double precision))
             ON CONFLICT (key) DO UPDATE
             SET status = EXCLUDED.status, expires_at = EXCLUDED.expires_at",
        )
        .bind(status_key(id))
        .bind(status.as_str())
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_status(&self, id: Uuid) -> Result<Option<SubmissionStatus>, StatusError> {
        let key = status_key(id);
        let raw: Option<String> = sqlx::query_scalar(
            "SELECT status FROM submission_status WHERE key = $1 AND expires_at > now()",
        )
        .bind(&key)
        .fetch_optional(&self.pool)
        .await?;

        raw.map(|s| parse_status(&key, &s)).transpose()
    }

    async fn purge_expired(&self) -> Result<u64, StatusError> {
        let result = sqlx::query("DELETE FROM submission_status WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
