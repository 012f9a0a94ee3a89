use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use triage_core::domain::task::Task;
use triage_core::queue::{
    expiry_after, ClaimedTask, KeyValueCache, LeaseId, LeasedTaskQueue, Publisher, QueueError,
    TaskQueue,
};

use super::pubsub::PubSubHub;

const RECHECK_INTERVAL: Duration = Duration::from_millis(25);

struct Lease {
    id: LeaseId,
    expires_at: DateTime<Utc>,
}

struct Entry {
    task: Task,
    lease: Option<Lease>,
    delivery_count: u32,
}

impl Entry {
    fn available(&self, now: DateTime<Utc>) -> bool {
        self.lease.as_ref().map_or(true, |lease| lease.expires_at <= now)
    }
}

#[derive(Default)]
struct State {
    queues: HashMap<String, VecDeque<Entry>>,
    cache: HashMap<String, (Value, Option<DateTime<Utc>>)>,
}

/// Single-process stand-in for [`super::SqlTaskQueue`] with the same
/// ordering, lease and expiry rules.
#[derive(Clone)]
pub struct InMemoryTaskQueue {
    state: Arc<Mutex<State>>,
    wakeup: Arc<Notify>,
    hub: PubSubHub,
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self::new(PubSubHub::new(64))
    }
}

impl InMemoryTaskQueue {
    pub fn new(hub: PubSubHub) -> Self {
        Self { state: Arc::new(Mutex::new(State::default())), wakeup: Arc::new(Notify::new()), hub }
    }

    pub fn hub(&self) -> &PubSubHub {
        &self.hub
    }

    async fn try_pop(&self, queue: &str) -> Result<Option<Task>, QueueError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let Some(entries) = state.queues.get_mut(queue) else {
            return Ok(None);
        };
        let position = entries.iter().position(|entry| entry.available(now));
        Ok(position.and_then(|position| entries.remove(position)).map(|entry| entry.task))
    }

    async fn try_claim(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> Result<Option<ClaimedTask>, QueueError> {
        let now = Utc::now();
        let expires_at = expiry_after(now, visibility_timeout)?;
        let mut state = self.state.lock().await;
        let Some(entry) = state
            .queues
            .get_mut(queue)
            .and_then(|entries| entries.iter_mut().find(|entry| entry.available(now)))
        else {
            return Ok(None);
        };

        let lease = Lease { id: LeaseId(Uuid::new_v4().to_string()), expires_at };
        entry.delivery_count += 1;
        let claimed = ClaimedTask {
            lease_id: lease.id.clone(),
            task: entry.task.clone(),
            delivery_count: entry.delivery_count,
            lease_expires_at: lease.expires_at,
        };
        entry.lease = Some(lease);
        Ok(Some(claimed))
    }

    async fn wait_until<T, F, Fut>(
        &self,
        wait: Duration,
        mut attempt: F,
    ) -> Result<Option<T>, QueueError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<Option<T>, QueueError>>,
    {
        let deadline = Instant::now().checked_add(wait);
        loop {
            let notified = self.wakeup.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(found) = attempt().await? {
                return Ok(Some(found));
            }

            // Lease expiry produces no notification, so keep re-checking.
            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    RECHECK_INTERVAL.min(deadline - now)
                }
                None => RECHECK_INTERVAL,
            };
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, queue: &str, task: &Task) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.queues.entry(queue.to_string()).or_default().push_back(Entry {
            task: task.clone(),
            lease: None,
            delivery_count: 0,
        });
        drop(state);
        self.wakeup.notify_waiters();
        Ok(())
    }

    async fn dequeue(&self, queue: &str, timeout: Duration) -> Result<Option<Task>, QueueError> {
        self.wait_until(timeout, || self.try_pop(queue)).await
    }

    async fn queue_length(&self, queue: &str) -> Result<u64, QueueError> {
        let now = Utc::now();
        let state = self.state.lock().await;
        Ok(state.queues.get(queue).map_or(0, |entries| {
            entries.iter().filter(|entry| entry.available(now)).count() as u64
        }))
    }
}

#[async_trait]
impl LeasedTaskQueue for InMemoryTaskQueue {
    async fn claim(
        &self,
        queue: &str,
        _consumer_id: &str,
        visibility_timeout: Duration,
        wait: Duration,
    ) -> Result<Option<ClaimedTask>, QueueError> {
        expiry_after(Utc::now(), visibility_timeout)?;
        self.wait_until(wait, || self.try_claim(queue, visibility_timeout)).await
    }

    async fn ack(&self, queue: &str, lease_id: &LeaseId) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let entries = state.queues.get_mut(queue);
        let position = entries.as_ref().and_then(|entries| {
            entries.iter().position(|entry| {
                entry.lease.as_ref().is_some_and(|lease| &lease.id == lease_id)
            })
        });

        match (entries, position) {
            (Some(entries), Some(position)) => {
                entries.remove(position);
                Ok(())
            }
            _ => Err(QueueError::LeaseNotFound(lease_id.clone())),
        }
    }

    async fn release(&self, queue: &str, lease_id: &LeaseId) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let entry = state.queues.get_mut(queue).and_then(|entries| {
            entries
                .iter_mut()
                .find(|entry| entry.lease.as_ref().is_some_and(|lease| &lease.id == lease_id))
        });

        let Some(entry) = entry else {
            return Err(QueueError::LeaseNotFound(lease_id.clone()));
        };
        entry.lease = None;
        drop(state);
        self.wakeup.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl KeyValueCache for InMemoryTaskQueue {
    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<(), QueueError> {
        let now = Utc::now();
        let expires_at = ttl.map(|ttl| expiry_after(now, ttl)).transpose()?;
        let mut state = self.state.lock().await;
        state.cache.retain(|_, (_, expires_at)| expires_at.map_or(true, |at| at > now));
        state.cache.insert(key.to_string(), (value.clone(), expires_at));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, QueueError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let expired = match state.cache.get(key) {
            None => return Ok(None),
            Some((_, Some(expires_at))) => *expires_at <= now,
            Some((_, None)) => false,
        };
        if expired {
            state.cache.remove(key);
            return Ok(None);
        }
        Ok(state.cache.get(key).map(|(value, _)| value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.cache.remove(key);
        Ok(())
    }
}

#[async_trait]
impl Publisher for InMemoryTaskQueue {
    async fn publish(&self, channel: &str, message: &Value) -> Result<usize, QueueError> {
        self.hub.publish(channel, message).await
    }
}
