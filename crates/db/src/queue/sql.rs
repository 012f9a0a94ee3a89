use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::Row;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use triage_core::domain::task::Task;
use triage_core::queue::{
    expiry_after, ClaimedTask, KeyValueCache, LeaseId, LeasedTaskQueue, Publisher, QueueError,
    TaskQueue,
};

use super::pubsub::PubSubHub;
use crate::DbPool;

/// Durable FIFO queue on the shared SQLite database.
///
/// Every state change is one SQL statement, so concurrent producers and
/// consumers in any number of processes see each task delivered once per
/// pop or claim. Waiting consumers are woken immediately for work produced
/// in this process and re-check storage every `poll_interval` otherwise.
#[derive(Clone)]
pub struct SqlTaskQueue {
    pool: DbPool,
    poll_interval: Duration,
    wakeup: Arc<Notify>,
    hub: PubSubHub,
}

impl SqlTaskQueue {
    pub fn new(pool: DbPool, poll_interval: Duration, hub: PubSubHub) -> Self {
        Self { pool, poll_interval, wakeup: Arc::new(Notify::new()), hub }
    }

    pub fn hub(&self) -> &PubSubHub {
        &self.hub
    }

    /// Round-trips the store; used at startup to refuse serving without a
    /// working queue.
    pub async fn ping(&self) -> Result<(), QueueError> {
        sqlx::query("SELECT COUNT(*) FROM task_queue").fetch_one(&self.pool).await.map_err(transport)?;
        Ok(())
    }

    async fn try_pop(&self, queue: &str) -> Result<Option<Task>, QueueError> {
        let row = sqlx::query(
            "DELETE FROM task_queue
             WHERE seq = (
                SELECT seq FROM task_queue
                WHERE queue_name = ?1
                  AND (claimed_by IS NULL OR claim_expires_at_ms <= ?2)
                ORDER BY seq ASC
                LIMIT 1
             )
             RETURNING payload_json",
        )
        .bind(queue)
        .bind(now_millis())
        .fetch_optional(&self.pool)
        .await
        .map_err(transport)?;

        match row {
            Some(row) => {
                let payload: String = row.try_get("payload_json").map_err(transport)?;
                Ok(Some(Task::from_wire(&payload)?))
            }
            None => Ok(None),
        }
    }

    async fn try_claim(
        &self,
        queue: &str,
        consumer_id: &str,
        visibility_timeout: Duration,
    ) -> Result<Option<ClaimedTask>, QueueError> {
        let now = Utc::now();
        let lease_expires_at = expiry_after(now, visibility_timeout)?;
        let lease_id = LeaseId(Uuid::new_v4().to_string());

        let row = sqlx::query(
            "UPDATE task_queue
             SET lease_id = ?3,
                 claimed_by = ?4,
                 claim_expires_at_ms = ?5,
                 delivery_count = delivery_count + 1
             WHERE seq = (
                SELECT seq FROM task_queue
                WHERE queue_name = ?1
                  AND (claimed_by IS NULL OR claim_expires_at_ms <= ?2)
                ORDER BY seq ASC
                LIMIT 1
             )
             RETURNING payload_json, delivery_count",
        )
        .bind(queue)
        .bind(now.timestamp_millis())
        .bind(&lease_id.0)
        .bind(consumer_id)
        .bind(lease_expires_at.timestamp_millis())
        .fetch_optional(&self.pool)
        .await
        .map_err(transport)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload: String = row.try_get("payload_json").map_err(transport)?;
        let delivery_count: i64 = row.try_get("delivery_count").map_err(transport)?;
        let task = Task::from_wire(&payload)?;
        debug!(
            event_name = "queue.task.claimed",
            queue,
            consumer_id,
            task_id = %task.id.0,
            lease_id = %lease_id,
            delivery_count,
            "task claimed"
        );

        Ok(Some(ClaimedTask {
            lease_id,
            task,
            delivery_count: u32::try_from(delivery_count).unwrap_or(u32::MAX),
            lease_expires_at,
        }))
    }

    async fn wait_for<T, F, Fut>(&self, wait: Duration, mut attempt: F) -> Result<Option<T>, QueueError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, QueueError>>,
    {
        // A wait too long to express as an instant has no deadline.
        let deadline = Instant::now().checked_add(wait);
        loop {
            let notified = self.wakeup.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(found) = attempt().await? {
                return Ok(Some(found));
            }

            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    self.poll_interval.min(deadline - now)
                }
                None => self.poll_interval,
            };
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}

#[async_trait]
impl TaskQueue for SqlTaskQueue {
    async fn enqueue(&self, queue: &str, task: &Task) -> Result<(), QueueError> {
        let payload = task.to_wire()?;
        sqlx::query(
            "INSERT INTO task_queue (queue_name, task_id, payload_json, enqueued_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(queue)
        .bind(&task.id.0)
        .bind(payload)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(transport)?;

        self.wakeup.notify_waiters();
        debug!(event_name = "queue.task.enqueued", queue, task_id = %task.id.0, "task enqueued");
        Ok(())
    }

    async fn dequeue(&self, queue: &str, timeout: Duration) -> Result<Option<Task>, QueueError> {
        self.wait_for(timeout, || self.try_pop(queue)).await
    }

    async fn queue_length(&self, queue: &str) -> Result<u64, QueueError> {
        let count: i64 = sqlx::query(
            "SELECT COUNT(*) AS count FROM task_queue
             WHERE queue_name = ?1
               AND (claimed_by IS NULL OR claim_expires_at_ms <= ?2)",
        )
        .bind(queue)
        .bind(now_millis())
        .fetch_one(&self.pool)
        .await
        .map_err(transport)?
        .try_get("count")
        .map_err(transport)?;

        Ok(u64::try_from(count).unwrap_or_default())
    }
}

#[async_trait]
impl LeasedTaskQueue for SqlTaskQueue {
    async fn claim(
        &self,
        queue: &str,
        consumer_id: &str,
        visibility_timeout: Duration,
        wait: Duration,
    ) -> Result<Option<ClaimedTask>, QueueError> {
        expiry_after(Utc::now(), visibility_timeout)?;
        self.wait_for(wait, || self.try_claim(queue, consumer_id, visibility_timeout)).await
    }

    /// Succeeds while the lease still owns the task, even past its expiry,
    /// as long as no other consumer has claimed it since.
    async fn ack(&self, queue: &str, lease_id: &LeaseId) -> Result<(), QueueError> {
        let result = sqlx::query("DELETE FROM task_queue WHERE queue_name = ? AND lease_id = ?")
            .bind(queue)
            .bind(&lease_id.0)
            .execute(&self.pool)
            .await
            .map_err(transport)?;

        if result.rows_affected() == 0 {
            return Err(QueueError::LeaseNotFound(lease_id.clone()));
        }
        Ok(())
    }

    async fn release(&self, queue: &str, lease_id: &LeaseId) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE task_queue
             SET lease_id = NULL, claimed_by = NULL, claim_expires_at_ms = NULL
             WHERE queue_name = ? AND lease_id = ?",
        )
        .bind(queue)
        .bind(&lease_id.0)
        .execute(&self.pool)
        .await
        .map_err(transport)?;

        if result.rows_affected() == 0 {
            return Err(QueueError::LeaseNotFound(lease_id.clone()));
        }
        self.wakeup.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl KeyValueCache for SqlTaskQueue {
    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<(), QueueError> {
        let now = Utc::now();
        let expires_at_ms = ttl
            .map(|ttl| expiry_after(now, ttl).map(|expires_at| expires_at.timestamp_millis()))
            .transpose()?;

        sqlx::query("DELETE FROM kv_cache WHERE expires_at_ms IS NOT NULL AND expires_at_ms <= ?")
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(transport)?;

        sqlx::query(
            "INSERT INTO kv_cache (cache_key, value_json, expires_at_ms)
             VALUES (?, ?, ?)
             ON CONFLICT(cache_key) DO UPDATE SET
                value_json = excluded.value_json,
                expires_at_ms = excluded.expires_at_ms",
        )
        .bind(key)
        .bind(serde_json::to_string(value)?)
        .bind(expires_at_ms)
        .execute(&self.pool)
        .await
        .map_err(transport)?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, QueueError> {
        let row = sqlx::query(
            "SELECT value_json FROM kv_cache
             WHERE cache_key = ?1 AND (expires_at_ms IS NULL OR expires_at_ms > ?2)",
        )
        .bind(key)
        .bind(now_millis())
        .fetch_optional(&self.pool)
        .await
        .map_err(transport)?;

        match row {
            Some(row) => {
                let raw: String = row.try_get("value_json").map_err(transport)?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM kv_cache WHERE cache_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(transport)?;
        Ok(())
    }
}

#[async_trait]
impl Publisher for SqlTaskQueue {
    async fn publish(&self, channel: &str, message: &Value) -> Result<usize, QueueError> {
        self.hub.publish(channel, message).await
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn transport(error: sqlx::Error) -> QueueError {
    QueueError::Transport(error.to_string())
}
