//! Ports for the shared work queue and its auxiliary cache / pub-sub facet.
//!
//! Implementations must rely on the store's own atomic push/pop primitives;
//! callers never read-then-write queue state.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::task::Task;
use crate::errors::{ApplicationError, DomainError};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub String);

impl std::fmt::Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue transport failure: {0}")]
    Transport(String),
    #[error("queue payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("lease `{0}` is not held (acknowledged, released, expired, or unknown)")]
    LeaseNotFound(LeaseId),
    #[error("duration out of range: {0}")]
    OutOfRange(String),
}

/// Longest lease a consumer may request.
pub const MAX_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// `now + span`, or `OutOfRange` when the sum is not a representable
/// timestamp. Lease and cache expiries both go through here.
pub fn expiry_after(now: DateTime<Utc>, span: Duration) -> Result<DateTime<Utc>, QueueError> {
    chrono::Duration::from_std(span)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| QueueError::OutOfRange(format!("{span:?} after {now} is not a valid time")))
}

impl From<QueueError> for ApplicationError {
    fn from(value: QueueError) -> Self {
        match value {
            QueueError::LeaseNotFound(lease_id) => {
                ApplicationError::Domain(DomainError::NotFound { entity: "lease", id: lease_id.0 })
            }
            QueueError::OutOfRange(message) => {
                ApplicationError::Domain(DomainError::InvariantViolation(message))
            }
            other => ApplicationError::Queue(other.to_string()),
        }
    }
}

/// A task handed to one consumer under a lease. The task stays in the queue
/// until the lease is acknowledged; if the lease expires first the task is
/// delivered again.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClaimedTask {
    pub lease_id: LeaseId,
    pub task: Task,
    pub delivery_count: u32,
    pub lease_expires_at: DateTime<Utc>,
}

/// Ordered FIFO queue of tasks, addressed by queue name.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Appends `task` to the tail of `queue`. Success means the task is stored.
    async fn enqueue(&self, queue: &str, task: &Task) -> Result<(), QueueError>;

    /// Destructively pops the head of `queue`, waiting up to `timeout`.
    /// `Ok(None)` means the wait elapsed with nothing to deliver.
    async fn dequeue(&self, queue: &str, timeout: Duration) -> Result<Option<Task>, QueueError>;

    /// Count of undelivered tasks. Advisory only under concurrent use.
    async fn queue_length(&self, queue: &str) -> Result<u64, QueueError>;
}

/// Claim / ack protocol layered on the same queue storage.
#[async_trait]
pub trait LeasedTaskQueue: TaskQueue {
    async fn claim(
        &self,
        queue: &str,
        consumer_id: &str,
        visibility_timeout: Duration,
        wait: Duration,
    ) -> Result<Option<ClaimedTask>, QueueError>;

    async fn ack(&self, queue: &str, lease_id: &LeaseId) -> Result<(), QueueError>;

    /// Gives a claimed task back to the queue head position it held, for
    /// immediate re-delivery.
    async fn release(&self, queue: &str, lease_id: &LeaseId) -> Result<(), QueueError>;
}

/// Expiring key-value cache for ephemeral state. Independent of queue order.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>)
        -> Result<(), QueueError>;

    /// A missing or expired key is `Ok(None)`.
    async fn get(&self, key: &str) -> Result<Option<Value>, QueueError>;

    async fn delete(&self, key: &str) -> Result<(), QueueError>;
}

/// Fire-and-forget fan-out. Only currently subscribed listeners receive a
/// message; there is no persistence or replay.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Returns how many subscribers the message reached.
    async fn publish(&self, channel: &str, message: &Value) -> Result<usize, QueueError>;
}

pub async fn set_json<C, T>(
    cache: &C,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), QueueError>
where
    C: KeyValueCache + ?Sized,
    T: Serialize + ?Sized,
{
    let value = serde_json::to_value(value)?;
    cache.set(key, &value, ttl).await
}

pub async fn get_json<C, T>(cache: &C, key: &str) -> Result<Option<T>, QueueError>
where
    C: KeyValueCache + ?Sized,
    T: DeserializeOwned,
{
    match cache.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

pub async fn publish_json<P, T>(publisher: &P, channel: &str, message: &T) -> Result<usize, QueueError>
where
    P: Publisher + ?Sized,
    T: Serialize + ?Sized,
{
    let message = serde_json::to_value(message)?;
    publisher.publish(channel, &message).await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use super::{expiry_after, LeaseId, QueueError, MAX_VISIBILITY_TIMEOUT};
    use crate::errors::{ApplicationError, DomainError};

    #[test]
    fn expiry_after_adds_span() {
        let now = Utc.with_ymd_and_hms(2026, 10, 1, 9, 0, 0).single().expect("valid timestamp");

        let expires = expiry_after(now, MAX_VISIBILITY_TIMEOUT).expect("seven days fits");

        assert_eq!(expires, now + chrono::Duration::days(7));
    }

    #[test]
    fn expiry_after_rejects_unrepresentable_time() {
        let now = Utc::now();

        for span in [Duration::from_secs(10_000_000_000_000), Duration::MAX] {
            let error = expiry_after(now, span).expect_err("span past the calendar must fail");
            assert!(matches!(error, QueueError::OutOfRange(_)));
        }
    }

    #[test]
    fn out_of_range_maps_to_invariant_violation() {
        let error = ApplicationError::from(QueueError::OutOfRange("too long".to_string()));

        assert!(matches!(error, ApplicationError::Domain(DomainError::InvariantViolation(_))));
    }

    #[test]
    fn unknown_lease_maps_to_not_found() {
        let error = ApplicationError::from(QueueError::LeaseNotFound(LeaseId("lease-9".to_string())));

        assert_eq!(
            error,
            ApplicationError::Domain(DomainError::NotFound {
                entity: "lease",
                id: "lease-9".to_string(),
            })
        );
    }

    #[test]
    fn transport_failure_maps_to_queue_error() {
        let error = ApplicationError::from(QueueError::Transport("connection refused".to_string()));

        assert!(matches!(error, ApplicationError::Queue(ref message) if message.contains("refused")));
    }
}
