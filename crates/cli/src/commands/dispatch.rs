use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::info;
use triage_core::config::AppConfig;
use triage_core::{ConversationId, TaskDispatcher, TaskId};
use triage_db::repositories::SqlConversationRepository;
use triage_db::{ConversationRepository, DbPool, PubSubHub, SqlTaskQueue};

use crate::commands::{
    load_config, open_store, runtime, CommandFailure, CommandResult, ErrorClass,
};

/// Queues an evaluation for a stored conversation. With no `--evaluator`
/// flags the configured default evaluator set is used.
pub fn run(conversation_id: &str, evaluator_types: &[String]) -> CommandResult {
    match dispatch(conversation_id, evaluator_types) {
        Ok((task_id, queue)) => CommandResult::success_with_data(
            "dispatch",
            format!("queued task `{}` for conversation `{conversation_id}`", task_id.0),
            Some(json!({
                "task_id": task_id,
                "conversation_id": conversation_id,
                "queue": queue,
                "status": "queued",
            })),
        ),
        Err(failure) => CommandResult::failure("dispatch", failure),
    }
}

fn dispatch(
    conversation_id: &str,
    evaluator_types: &[String],
) -> Result<(TaskId, String), CommandFailure> {
    let conversation_id = conversation_id.trim();
    if conversation_id.is_empty() {
        return Err(CommandFailure::new(
            ErrorClass::InvalidInput,
            "conversation id must not be empty",
        ));
    }
    let evaluator_types: Vec<String> =
        evaluator_types.iter().map(|value| value.trim().to_string()).collect();
    if evaluator_types.iter().any(String::is_empty) {
        return Err(CommandFailure::new(
            ErrorClass::InvalidInput,
            "evaluator types must not be empty",
        ));
    }

    let config = load_config()?;
    runtime()?.block_on(async {
        let pool = open_store(&config).await?;
        let outcome = enqueue(&config, &pool, conversation_id, evaluator_types).await;
        pool.close().await;
        outcome
    })
}

async fn enqueue(
    config: &AppConfig,
    pool: &DbPool,
    conversation_id: &str,
    evaluator_types: Vec<String>,
) -> Result<(TaskId, String), CommandFailure> {
    let conversation_id = ConversationId(conversation_id.to_string());
    let conversations = SqlConversationRepository::new(pool.clone());
    let exists = conversations
        .find(&conversation_id)
        .await
        .map_err(|error| CommandFailure::new(ErrorClass::DbConnectivity, error.to_string()))?
        .is_some();
    if !exists {
        return Err(CommandFailure::new(
            ErrorClass::NotFound,
            format!("conversation `{}` not found", conversation_id.0),
        ));
    }

    let queue = Arc::new(SqlTaskQueue::new(
        pool.clone(),
        Duration::from_millis(config.queue.poll_interval_ms),
        PubSubHub::new(config.queue.pubsub_capacity),
    ));
    let dispatcher = TaskDispatcher::new(queue)
        .with_default_evaluator_types(config.evaluation.default_evaluator_types.clone());
    let task_id = dispatcher
        .dispatch(conversation_id.clone(), evaluator_types)
        .await
        .map_err(|error| CommandFailure::new(ErrorClass::Queue, error.to_string()))?;

    info!(
        event_name = "cli.dispatch.queued",
        correlation_id = "cli",
        conversation_id = %conversation_id,
        task_id = %task_id.0,
        queue = dispatcher.queue_name(),
        "evaluation task queued from the command line"
    );
    Ok((task_id, dispatcher.queue_name().to_string()))
}
