use std::time::Duration;

use serde_json::json;
use triage_core::TaskQueue;
use triage_db::{PubSubHub, SqlTaskQueue};

use crate::commands::{
    load_config, open_store, runtime, CommandFailure, CommandResult, ErrorClass,
};

/// Reports how many tasks are waiting to be claimed on `queue`.
pub fn run(queue: &str) -> CommandResult {
    match length(queue) {
        Ok(length) => CommandResult::success_with_data(
            "queue-status",
            format!("queue `{queue}` has {length} available task(s)"),
            Some(json!({ "queue": queue, "length": length })),
        ),
        Err(failure) => CommandResult::failure("queue-status", failure),
    }
}

fn length(queue: &str) -> Result<u64, CommandFailure> {
    if queue.trim().is_empty() {
        return Err(CommandFailure::new(ErrorClass::InvalidInput, "queue name must not be empty"));
    }

    let config = load_config()?;
    runtime()?.block_on(async {
        let pool = open_store(&config).await?;
        let store = SqlTaskQueue::new(
            pool.clone(),
            Duration::from_millis(config.queue.poll_interval_ms),
            PubSubHub::new(config.queue.pubsub_capacity),
        );
        let length = store
            .queue_length(queue)
            .await
            .map_err(|error| CommandFailure::new(ErrorClass::Queue, error.to_string()));
        pool.close().await;
        length
    })
}
