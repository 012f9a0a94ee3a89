use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::Serialize;
use triage_core::LeasedTaskQueue;
use triage_db::DbPool;

use crate::dispatch_worker::{AutoDispatchStats, AutoDispatcher};

#[derive(Clone)]
pub struct HealthState {
    db_pool: Option<DbPool>,
    queue: Arc<dyn LeasedTaskQueue>,
    queue_name: String,
    auto_dispatcher: AutoDispatcher,
}

impl HealthState {
    pub fn new(
        db_pool: Option<DbPool>,
        queue: Arc<dyn LeasedTaskQueue>,
        queue_name: String,
        auto_dispatcher: AutoDispatcher,
    ) -> Self {
        Self { db_pool, queue, queue_name, auto_dispatcher }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueueCheck {
    pub status: &'static str,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u64>,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub queue: QueueCheck,
    pub auto_dispatch: AutoDispatchStats,
    pub checked_at: String,
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(state.db_pool.as_ref()).await;
    let queue = queue_check(state.queue.as_ref(), &state.queue_name).await;
    let ready = database.status == "ready" && queue.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        database,
        queue,
        auto_dispatch: state.auto_dispatcher.stats(),
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: Option<&DbPool>) -> HealthCheck {
    let Some(pool) = pool else {
        return HealthCheck { status: "ready", detail: "in-memory repositories".to_string() };
    };

    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

async fn queue_check(queue: &dyn LeasedTaskQueue, name: &str) -> QueueCheck {
    match queue.queue_length(name).await {
        Ok(depth) => QueueCheck {
            status: "ready",
            name: name.to_string(),
            depth: Some(depth),
            detail: "queue length read".to_string(),
        },
        Err(error) => QueueCheck {
            status: "degraded",
            name: name.to_string(),
            depth: None,
            detail: format!("queue length failed: {error}"),
        },
    }
}
