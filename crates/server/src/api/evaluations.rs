use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use triage_core::queue::publish_json;
use triage_core::{ConversationId, Evaluation, EvaluationId, TaskId};
use triage_db::EvaluationFilter;

use super::{page_limit, stats, ApiError, AppState, CorrelationId};

pub const EVALUATIONS_CHANNEL: &str = "evaluations";
pub const EVALUATION_COMPLETED: &str = "evaluation.completed";

#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub evaluator_types: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub task_id: TaskId,
    pub conversation_id: ConversationId,
    pub status: &'static str,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub conversation_id: Option<String>,
    pub min_score: Option<f64>,
    pub max_score: Option<f64>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct EvaluationSummary {
    pub evaluation_id: EvaluationId,
    pub conversation_id: ConversationId,
    pub overall_score: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct EvaluationList {
    pub evaluations: Vec<EvaluationSummary>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
struct CompletedEvent<'a> {
    event: &'static str,
    evaluation_id: &'a EvaluationId,
    conversation_id: &'a ConversationId,
    overall_score: f64,
    needs_human_review: bool,
    created_at: DateTime<Utc>,
}

/// Explicit dispatch. Unlike ingestion, a failed enqueue is the caller's
/// error.
pub async fn trigger(
    State(state): State<AppState>,
    correlation: CorrelationId,
    body: Result<Json<TriggerRequest>, JsonRejection>,
) -> Result<Json<TriggerResponse>, ApiError> {
    let Json(request) = body.map_err(|rejection| correlation.bad_request(rejection.body_text()))?;
    if request.conversation_id.0.trim().is_empty() {
        return Err(correlation.bad_request("conversation_id must not be empty"));
    }

    let exists = state
        .stores
        .conversations
        .find(&request.conversation_id)
        .await
        .map_err(|error| correlation.reject(error))?
        .is_some();
    if !exists {
        return Err(correlation.not_found("conversation", request.conversation_id.0));
    }

    let task_id = state
        .dispatcher
        .dispatch(request.conversation_id.clone(), request.evaluator_types)
        .await
        .map_err(|error| correlation.reject(error))?;

    info!(
        event_name = "dispatch.trigger.queued",
        correlation_id = %correlation.as_str(),
        conversation_id = %request.conversation_id,
        task_id = %task_id.0,
        queue = state.dispatcher.queue_name(),
        "evaluation task queued on request"
    );

    Ok(Json(TriggerResponse {
        task_id,
        conversation_id: request.conversation_id,
        status: "queued",
    }))
}

/// Evaluator workers post finished evaluations here. Subscribers on the
/// `evaluations` channel are notified after the record is stored.
pub async fn submit(
    State(state): State<AppState>,
    correlation: CorrelationId,
    body: Result<Json<Evaluation>, JsonRejection>,
) -> Result<(StatusCode, Json<Evaluation>), ApiError> {
    let Json(evaluation) =
        body.map_err(|rejection| correlation.bad_request(rejection.body_text()))?;
    evaluation.validate().map_err(|error| correlation.reject(error))?;

    let exists = state
        .stores
        .conversations
        .find(&evaluation.conversation_id)
        .await
        .map_err(|error| correlation.reject(error))?
        .is_some();
    if !exists {
        return Err(correlation.not_found("conversation", evaluation.conversation_id.0.clone()));
    }

    state
        .stores
        .evaluations
        .append(evaluation.clone())
        .await
        .map_err(|error| correlation.reject(error))?;

    info!(
        event_name = "evaluation.recorded",
        correlation_id = %correlation.as_str(),
        conversation_id = %evaluation.conversation_id,
        evaluation_id = %evaluation.evaluation_id.0,
        overall_score = evaluation.overall_score,
        "evaluation recorded"
    );

    let decision = state.routing.route(&evaluation.conversation_id, &evaluation);
    let event = CompletedEvent {
        event: EVALUATION_COMPLETED,
        evaluation_id: &evaluation.evaluation_id,
        conversation_id: &evaluation.conversation_id,
        overall_score: evaluation.overall_score,
        needs_human_review: decision.needs_human_review,
        created_at: evaluation.created_at,
    };
    if let Err(error) = publish_json(state.publisher.as_ref(), EVALUATIONS_CHANNEL, &event).await {
        warn!(
            event_name = "evaluation.publish.failed",
            correlation_id = %correlation.as_str(),
            evaluation_id = %evaluation.evaluation_id.0,
            error = %error,
            "completion notification not published"
        );
    }
    stats::invalidate(&state, &correlation).await;

    Ok((StatusCode::CREATED, Json(evaluation)))
}

pub async fn list(
    State(state): State<AppState>,
    correlation: CorrelationId,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<EvaluationList>, ApiError> {
    let Query(params) = params.map_err(|rejection| correlation.bad_request(rejection.body_text()))?;
    let filter = EvaluationFilter {
        conversation_id: params
            .conversation_id
            .filter(|value| !value.is_empty())
            .map(ConversationId),
        min_score: params.min_score,
        max_score: params.max_score,
    };

    let evaluations = state
        .stores
        .evaluations
        .list(&filter, page_limit(params.limit), params.offset.unwrap_or(0))
        .await
        .map_err(|error| correlation.reject(error))?;

    let evaluations: Vec<EvaluationSummary> = evaluations
        .into_iter()
        .map(|evaluation| EvaluationSummary {
            evaluation_id: evaluation.evaluation_id,
            conversation_id: evaluation.conversation_id,
            overall_score: evaluation.overall_score,
            created_at: evaluation.created_at,
        })
        .collect();

    Ok(Json(EvaluationList { count: evaluations.len(), evaluations }))
}

pub async fn fetch(
    State(state): State<AppState>,
    correlation: CorrelationId,
    Path(evaluation_id): Path<String>,
) -> Result<Json<Evaluation>, ApiError> {
    state
        .stores
        .evaluations
        .find(&EvaluationId(evaluation_id.clone()))
        .await
        .map_err(|error| correlation.reject(error))?
        .map(Json)
        .ok_or_else(|| correlation.not_found("evaluation", evaluation_id))
}
