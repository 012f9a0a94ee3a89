//! Lease protocol for evaluator workers that reach the queue over HTTP:
//! claim a task, process it, then ack. A lease left to expire makes the
//! task claimable again.

use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use triage_core::{LeaseId, MAX_VISIBILITY_TIMEOUT};

use super::{ApiError, AppState, CorrelationId};

pub const MAX_CLAIM_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub consumer_id: String,
    pub visibility_timeout_secs: Option<u64>,
    #[serde(default)]
    pub wait_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct QueueLength {
    pub queue: String,
    pub length: u64,
}

pub async fn length(
    State(state): State<AppState>,
    correlation: CorrelationId,
    Path(queue): Path<String>,
) -> Result<Json<QueueLength>, ApiError> {
    let length =
        state.queue.queue_length(&queue).await.map_err(|error| correlation.reject(error))?;
    Ok(Json(QueueLength { queue, length }))
}

/// `204 No Content` when nothing became available within `wait_ms`.
pub async fn claim(
    State(state): State<AppState>,
    correlation: CorrelationId,
    Path(queue): Path<String>,
    body: Result<Json<ClaimRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body.map_err(|rejection| correlation.bad_request(rejection.body_text()))?;
    let consumer_id = request.consumer_id.trim();
    if consumer_id.is_empty() {
        return Err(correlation.bad_request("consumer_id must not be empty"));
    }
    let max_visibility = MAX_VISIBILITY_TIMEOUT.as_secs();
    if let Some(secs) = request.visibility_timeout_secs {
        if !(1..=max_visibility).contains(&secs) {
            return Err(correlation.bad_request(format!(
                "visibility_timeout_secs must be in range 1..={max_visibility}"
            )));
        }
    }

    let visibility = request
        .visibility_timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(state.visibility_timeout);
    let wait = Duration::from_millis(request.wait_ms).min(MAX_CLAIM_WAIT);

    let claimed = state
        .queue
        .claim(&queue, consumer_id, visibility, wait)
        .await
        .map_err(|error| correlation.reject(error))?;

    match claimed {
        Some(claimed) => {
            info!(
                event_name = "queue.task.claimed",
                correlation_id = %correlation.as_str(),
                queue = %queue,
                consumer_id,
                task_id = %claimed.task.id.0,
                lease_id = %claimed.lease_id,
                delivery_count = claimed.delivery_count,
                "task claimed"
            );
            Ok(Json(claimed).into_response())
        }
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

pub async fn ack(
    State(state): State<AppState>,
    correlation: CorrelationId,
    Path((queue, lease_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let lease_id = LeaseId(lease_id);
    state.queue.ack(&queue, &lease_id).await.map_err(|error| correlation.reject(error))?;

    info!(
        event_name = "queue.task.acked",
        correlation_id = %correlation.as_str(),
        queue = %queue,
        lease_id = %lease_id,
        "task acknowledged"
    );
    Ok(StatusCode::NO_CONTENT)
}

pub async fn release(
    State(state): State<AppState>,
    correlation: CorrelationId,
    Path((queue, lease_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let lease_id = LeaseId(lease_id);
    state.queue.release(&queue, &lease_id).await.map_err(|error| correlation.reject(error))?;

    info!(
        event_name = "queue.task.released",
        correlation_id = %correlation.as_str(),
        queue = %queue,
        lease_id = %lease_id,
        "task released for re-delivery"
    );
    Ok(StatusCode::NO_CONTENT)
}
