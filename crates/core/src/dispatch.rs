use std::sync::Arc;

use thiserror::Error;

use crate::domain::conversation::ConversationId;
use crate::domain::task::{Task, TaskId};
use crate::errors::ApplicationError;
use crate::queue::{QueueError, TaskQueue};

pub const EVALUATIONS_QUEUE: &str = "evaluations";

pub const DEFAULT_EVALUATOR_TYPES: [&str; 4] = ["llm_judge", "tool_call", "coherence", "heuristic"];

pub fn default_evaluator_types() -> Vec<String> {
    DEFAULT_EVALUATOR_TYPES.iter().map(|value| (*value).to_string()).collect()
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to enqueue task `{task_id}` for conversation `{conversation_id}`: {source}")]
    Enqueue {
        task_id: String,
        conversation_id: ConversationId,
        #[source]
        source: QueueError,
    },
}

impl From<DispatchError> for ApplicationError {
    fn from(value: DispatchError) -> Self {
        ApplicationError::Queue(value.to_string())
    }
}

/// Turns "evaluate this conversation" into a task on the evaluations queue.
#[derive(Clone)]
pub struct TaskDispatcher {
    queue: Arc<dyn TaskQueue>,
    queue_name: String,
    default_evaluator_types: Vec<String>,
}

impl TaskDispatcher {
    pub fn new(queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            queue,
            queue_name: EVALUATIONS_QUEUE.to_string(),
            default_evaluator_types: default_evaluator_types(),
        }
    }

    pub fn with_default_evaluator_types(mut self, evaluator_types: Vec<String>) -> Self {
        if !evaluator_types.is_empty() {
            self.default_evaluator_types = evaluator_types;
        }
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn build_task(&self, conversation_id: ConversationId, evaluator_types: Vec<String>) -> Task {
        let evaluator_types = if evaluator_types.is_empty() {
            self.default_evaluator_types.clone()
        } else {
            evaluator_types
        };
        Task::evaluate(conversation_id, evaluator_types)
    }

    pub async fn dispatch(
        &self,
        conversation_id: ConversationId,
        evaluator_types: Vec<String>,
    ) -> Result<TaskId, DispatchError> {
        let task = self.build_task(conversation_id, evaluator_types);
        self.queue.enqueue(&self.queue_name, &task).await.map_err(|source| {
            DispatchError::Enqueue {
                task_id: task.id.0.clone(),
                conversation_id: task.conversation_id.clone(),
                source,
            }
        })?;
        Ok(task.id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{DispatchError, TaskDispatcher, EVALUATIONS_QUEUE};
    use crate::domain::conversation::ConversationId;
    use crate::domain::task::{Task, TaskType};
    use crate::queue::{QueueError, TaskQueue};

    #[derive(Default)]
    struct RecordingQueue {
        pushed: Mutex<Vec<(String, Task)>>,
    }

    impl RecordingQueue {
        fn pushed(&self) -> Vec<(String, Task)> {
            match self.pushed.lock() {
                Ok(pushed) => pushed.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            }
        }
    }

    #[async_trait]
    impl TaskQueue for RecordingQueue {
        async fn enqueue(&self, queue: &str, task: &Task) -> Result<(), QueueError> {
            match self.pushed.lock() {
                Ok(mut pushed) => pushed.push((queue.to_string(), task.clone())),
                Err(poisoned) => poisoned.into_inner().push((queue.to_string(), task.clone())),
            }
            Ok(())
        }

        async fn dequeue(&self, _queue: &str, _timeout: Duration) -> Result<Option<Task>, QueueError> {
            Ok(None)
        }

        async fn queue_length(&self, _queue: &str) -> Result<u64, QueueError> {
            Ok(self.pushed().len() as u64)
        }
    }

    struct UnreachableQueue;

    #[async_trait]
    impl TaskQueue for UnreachableQueue {
        async fn enqueue(&self, _queue: &str, _task: &Task) -> Result<(), QueueError> {
            Err(QueueError::Transport("connection refused".to_string()))
        }

        async fn dequeue(&self, _queue: &str, _timeout: Duration) -> Result<Option<Task>, QueueError> {
            Err(QueueError::Transport("connection refused".to_string()))
        }

        async fn queue_length(&self, _queue: &str) -> Result<u64, QueueError> {
            Err(QueueError::Transport("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn empty_evaluator_types_fall_back_to_full_default_set() {
        let queue = Arc::new(RecordingQueue::default());
        let dispatcher = TaskDispatcher::new(queue.clone());

        let task_id = dispatcher
            .dispatch(ConversationId("conv-1".to_string()), Vec::new())
            .await
            .expect("dispatch");

        let pushed = queue.pushed();
        assert_eq!(pushed.len(), 1);
        let (queue_name, task) = &pushed[0];
        assert_eq!(queue_name, EVALUATIONS_QUEUE);
        assert_eq!(task.id, task_id);
        assert_eq!(task.task_type, TaskType::Evaluate);
        assert_eq!(task.evaluator_types, vec!["llm_judge", "tool_call", "coherence", "heuristic"]);
    }

    #[tokio::test]
    async fn explicit_evaluator_types_are_kept() {
        let queue = Arc::new(RecordingQueue::default());
        let dispatcher = TaskDispatcher::new(queue.clone());

        dispatcher
            .dispatch(ConversationId("conv-2".to_string()), vec!["coherence".to_string()])
            .await
            .expect("dispatch");

        assert_eq!(queue.pushed()[0].1.evaluator_types, vec!["coherence"]);
    }

    #[tokio::test]
    async fn each_dispatch_gets_a_fresh_task_id() {
        let queue = Arc::new(RecordingQueue::default());
        let dispatcher = TaskDispatcher::new(queue.clone());
        let conversation_id = ConversationId("conv-3".to_string());

        let first = dispatcher.dispatch(conversation_id.clone(), Vec::new()).await.expect("first");
        let second = dispatcher.dispatch(conversation_id, Vec::new()).await.expect("second");

        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn configured_defaults_replace_builtin_set() {
        let queue = Arc::new(RecordingQueue::default());
        let dispatcher = TaskDispatcher::new(queue.clone())
            .with_default_evaluator_types(vec!["heuristic".to_string()]);

        dispatcher.dispatch(ConversationId("conv-4".to_string()), Vec::new()).await.expect("dispatch");

        assert_eq!(queue.pushed()[0].1.evaluator_types, vec!["heuristic"]);
    }

    #[tokio::test]
    async fn enqueue_failure_is_reported_with_context() {
        let dispatcher = TaskDispatcher::new(Arc::new(UnreachableQueue));

        let error = dispatcher
            .dispatch(ConversationId("conv-5".to_string()), Vec::new())
            .await
            .expect_err("transport failure must surface");

        let DispatchError::Enqueue { conversation_id, source, .. } = error;
        assert_eq!(conversation_id.0, "conv-5");
        assert!(matches!(source, QueueError::Transport(_)));
    }
}
