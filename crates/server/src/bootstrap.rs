use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;
use triage_core::config::{AppConfig, ConfigError, LoadOptions};
use triage_core::QueueError;
use triage_db::{connect_with_config, migrations, DbPool, PubSubHub, SqlTaskQueue};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub queue: Arc<SqlTaskQueue>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("task queue unavailable: {0}")]
    Queue(#[source] QueueError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

/// Connects storage and refuses to continue unless the queue answers.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        max_connections = config.database.max_connections,
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let queue = Arc::new(SqlTaskQueue::new(
        db_pool.clone(),
        Duration::from_millis(config.queue.poll_interval_ms),
        PubSubHub::new(config.queue.pubsub_capacity),
    ));
    queue.ping().await.map_err(BootstrapError::Queue)?;
    info!(
        event_name = "system.bootstrap.queue_ready",
        correlation_id = "bootstrap",
        poll_interval_ms = config.queue.poll_interval_ms,
        visibility_timeout_secs = config.queue.visibility_timeout_secs,
        "task queue reachable"
    );

    Ok(Application { config, db_pool, queue })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use triage_core::config::{ConfigOverrides, LoadOptions};
    use triage_core::{ConversationId, LeasedTaskQueue, TaskDispatcher, TaskQueue, EVALUATIONS_QUEUE};

    use super::{bootstrap, BootstrapError};

    fn options(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_invalid_configuration() {
        let mut invalid = options("sqlite::memory:");
        invalid.overrides.agreement_threshold = Some(1.5);

        let error = bootstrap(invalid).await.err().expect("invalid threshold must fail");

        assert!(matches!(error, BootstrapError::Config(_)));
        assert!(error.to_string().contains("agreement_threshold"));
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_when_database_is_unreachable() {
        let error = bootstrap(options("sqlite:///nonexistent-triage-dir/triage.db"))
            .await
            .err()
            .expect("missing database directory must fail");

        assert!(matches!(error, BootstrapError::DatabaseConnect(_)));
    }

    #[tokio::test]
    async fn bootstrapped_queue_carries_tasks_end_to_end() {
        let app = bootstrap(options("sqlite::memory:")).await.expect("bootstrap should succeed");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master
             WHERE type = 'table' AND name IN ('conversations', 'evaluations', 'annotations', 'task_queue')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("tables should exist after bootstrap");
        assert_eq!(table_count, 4);

        let dispatcher = TaskDispatcher::new(app.queue.clone());
        let task_id = dispatcher
            .dispatch(ConversationId("conv-1".to_string()), Vec::new())
            .await
            .expect("dispatch");

        let claimed = app
            .queue
            .claim(EVALUATIONS_QUEUE, "worker-1", Duration::from_secs(30), Duration::ZERO)
            .await
            .expect("claim")
            .expect("task should be claimable");
        assert_eq!(claimed.task.id, task_id);

        app.queue.ack(EVALUATIONS_QUEUE, &claimed.lease_id).await.expect("ack");
        assert_eq!(app.queue.queue_length(EVALUATIONS_QUEUE).await.expect("length"), 0);

        app.db_pool.close().await;
    }
}
