use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use triage_core::{ConversationId, TaskDispatcher};

pub const AUTO_DISPATCH_BACKLOG: usize = 1024;

#[derive(Debug)]
struct DispatchRequest {
    conversation_id: ConversationId,
    correlation_id: String,
}

#[derive(Debug, Default)]
struct Counters {
    requested: AtomicU64,
    dispatched: AtomicU64,
    failed: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AutoDispatchStats {
    pub requested: u64,
    pub dispatched: u64,
    pub failed: u64,
}

/// Evaluation dispatch that runs as a side effect of ingestion.
///
/// Requests go through a bounded channel to a background worker. Failures,
/// including a full backlog, are logged and counted and never reach the
/// ingesting caller.
#[derive(Clone)]
pub struct AutoDispatcher {
    sender: mpsc::Sender<DispatchRequest>,
    counters: Arc<Counters>,
}

impl AutoDispatcher {
    /// The worker exits once every `AutoDispatcher` clone is dropped and the
    /// backlog is drained.
    pub fn spawn(dispatcher: TaskDispatcher, backlog: usize) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(backlog.max(1));
        let counters = Arc::new(Counters::default());
        let worker = tokio::spawn(run_worker(dispatcher, receiver, counters.clone()));
        (Self { sender, counters }, worker)
    }

    pub fn submit(&self, conversation_id: ConversationId, correlation_id: &str) {
        self.counters.requested.fetch_add(1, Ordering::Relaxed);
        let request =
            DispatchRequest { conversation_id, correlation_id: correlation_id.to_string() };

        if let Err(error) = self.sender.try_send(request) {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            let (reason, request) = match error {
                TrySendError::Full(request) => ("backlog_full", request),
                TrySendError::Closed(request) => ("worker_stopped", request),
            };
            warn!(
                event_name = "dispatch.auto.rejected",
                correlation_id = %request.correlation_id,
                conversation_id = %request.conversation_id,
                reason,
                "auto-dispatch request dropped"
            );
        }
    }

    pub fn stats(&self) -> AutoDispatchStats {
        self.counters.snapshot()
    }
}

impl Counters {
    fn snapshot(&self) -> AutoDispatchStats {
        AutoDispatchStats {
            requested: self.requested.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

async fn run_worker(
    dispatcher: TaskDispatcher,
    mut receiver: mpsc::Receiver<DispatchRequest>,
    counters: Arc<Counters>,
) {
    while let Some(request) = receiver.recv().await {
        match dispatcher.dispatch(request.conversation_id.clone(), Vec::new()).await {
            Ok(task_id) => {
                counters.dispatched.fetch_add(1, Ordering::Relaxed);
                info!(
                    event_name = "dispatch.auto.queued",
                    correlation_id = %request.correlation_id,
                    conversation_id = %request.conversation_id,
                    task_id = %task_id.0,
                    queue = dispatcher.queue_name(),
                    "evaluation task queued after ingestion"
                );
            }
            Err(error) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    event_name = "dispatch.auto.failed",
                    correlation_id = %request.correlation_id,
                    conversation_id = %request.conversation_id,
                    queue = dispatcher.queue_name(),
                    error = %error,
                    "auto-dispatch failed; conversation stays ingested"
                );
            }
        }
    }
    debug!(event_name = "dispatch.auto.stopped", "auto-dispatch worker drained");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use triage_core::{ConversationId, QueueError, Task, TaskDispatcher, TaskQueue, EVALUATIONS_QUEUE};
    use triage_db::InMemoryTaskQueue;

    use super::{AutoDispatchStats, AutoDispatcher};

    struct RefusingQueue;

    #[async_trait]
    impl TaskQueue for RefusingQueue {
        async fn enqueue(&self, _queue: &str, _task: &Task) -> Result<(), QueueError> {
            Err(QueueError::Transport("store offline".to_string()))
        }

        async fn dequeue(&self, _queue: &str, _timeout: Duration) -> Result<Option<Task>, QueueError> {
            Ok(None)
        }

        async fn queue_length(&self, _queue: &str) -> Result<u64, QueueError> {
            Ok(0)
        }
    }

    async fn drain(auto: AutoDispatcher, worker: tokio::task::JoinHandle<()>) -> AutoDispatchStats {
        let counters = auto.counters.clone();
        drop(auto);
        worker.await.expect("worker should stop cleanly");
        counters.snapshot()
    }

    #[tokio::test]
    async fn submitted_conversations_reach_the_evaluations_queue() {
        let queue = Arc::new(InMemoryTaskQueue::default());
        let (auto, worker) = AutoDispatcher::spawn(TaskDispatcher::new(queue.clone()), 8);

        auto.submit(ConversationId("conv-1".to_string()), "req-1");
        auto.submit(ConversationId("conv-2".to_string()), "req-2");

        let stats = drain(auto, worker).await;
        assert_eq!(stats, AutoDispatchStats { requested: 2, dispatched: 2, failed: 0 });
        assert_eq!(queue.queue_length(EVALUATIONS_QUEUE).await.expect("length"), 2);

        let first = queue
            .dequeue(EVALUATIONS_QUEUE, Duration::ZERO)
            .await
            .expect("dequeue")
            .expect("task");
        assert_eq!(first.conversation_id.0, "conv-1");
        assert_eq!(first.evaluator_types.len(), 4);
    }

    #[tokio::test]
    async fn enqueue_failures_are_counted_not_raised() {
        let (auto, worker) = AutoDispatcher::spawn(TaskDispatcher::new(Arc::new(RefusingQueue)), 8);

        auto.submit(ConversationId("conv-1".to_string()), "req-1");

        let stats = drain(auto, worker).await;
        assert_eq!(stats, AutoDispatchStats { requested: 1, dispatched: 0, failed: 1 });
    }

    #[tokio::test]
    async fn submissions_after_worker_stop_are_counted_as_failed() {
        let queue = Arc::new(InMemoryTaskQueue::default());
        let (auto, worker) = AutoDispatcher::spawn(TaskDispatcher::new(queue), 8);
        worker.abort();
        let _ = worker.await;

        auto.submit(ConversationId("conv-1".to_string()), "req-1");

        assert_eq!(auto.stats(), AutoDispatchStats { requested: 1, dispatched: 0, failed: 1 });
    }
}
