use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use triage_core::domain::improvement::{
    validate_min_confidence, DEFAULT_MIN_SUGGESTION_CONFIDENCE,
};
use triage_core::{
    EvaluatorCalibration, FailurePattern, FailurePatternFilter, IssueSeverity, StoredSuggestion,
    SuggestionId,
};

use super::{stats, ApiError, AppState, CorrelationId, MAX_PAGE_LIMIT};

pub const DEFAULT_PATTERN_LIMIT: u32 = 50;

#[derive(Debug, Default, Deserialize)]
pub struct SuggestionParams {
    pub min_confidence: Option<f64>,
    pub suggestion_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PatternParams {
    pub resolved: Option<bool>,
    pub severity: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PerformanceParams {
    pub evaluator_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ImplementRequest {
    #[serde(default)]
    pub before_metrics: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct SuggestionList {
    pub suggestions: Vec<StoredSuggestion>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct SuggestionImplemented {
    pub status: &'static str,
    pub suggestion_id: SuggestionId,
    pub suggestion: StoredSuggestion,
}

#[derive(Debug, Serialize)]
pub struct PatternList {
    pub patterns: Vec<FailurePattern>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct EvaluatorPerformance {
    pub evaluators: Vec<EvaluatorCalibration>,
    pub count: usize,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

pub async fn pending_suggestions(
    State(state): State<AppState>,
    correlation: CorrelationId,
    params: Result<Query<SuggestionParams>, QueryRejection>,
) -> Result<Json<SuggestionList>, ApiError> {
    let Query(params) = params.map_err(|rejection| correlation.bad_request(rejection.body_text()))?;
    let min_confidence = params.min_confidence.unwrap_or(DEFAULT_MIN_SUGGESTION_CONFIDENCE);
    validate_min_confidence(min_confidence).map_err(|error| correlation.reject(error))?;
    let suggestion_type = non_blank(params.suggestion_type);

    let suggestions = state
        .stores
        .suggestions
        .pending(min_confidence, suggestion_type.as_deref())
        .await
        .map_err(|error| correlation.reject(error))?;

    Ok(Json(SuggestionList { count: suggestions.len(), suggestions }))
}

/// The body is optional; an empty one records no baseline metrics.
pub async fn mark_implemented(
    State(state): State<AppState>,
    correlation: CorrelationId,
    Path(suggestion_id): Path<String>,
    body: Bytes,
) -> Result<Json<SuggestionImplemented>, ApiError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        ImplementRequest::default()
    } else {
        let Json(request) = Json::<ImplementRequest>::from_bytes(&body)
            .map_err(|rejection| correlation.bad_request(rejection.body_text()))?;
        request
    };
    let suggestion_id = SuggestionId(suggestion_id);

    let suggestion = state
        .stores
        .suggestions
        .mark_implemented(&suggestion_id, request.before_metrics, Utc::now())
        .await
        .map_err(|error| correlation.reject(error))?;

    info!(
        event_name = "suggestion.implemented",
        correlation_id = %correlation.as_str(),
        suggestion_id = %suggestion_id,
        suggestion_type = %suggestion.suggestion_type,
        "suggestion marked implemented"
    );
    stats::invalidate(&state, &correlation).await;

    Ok(Json(SuggestionImplemented { status: "success", suggestion_id, suggestion }))
}

pub async fn failure_patterns(
    State(state): State<AppState>,
    correlation: CorrelationId,
    params: Result<Query<PatternParams>, QueryRejection>,
) -> Result<Json<PatternList>, ApiError> {
    let Query(params) = params.map_err(|rejection| correlation.bad_request(rejection.body_text()))?;
    let severity = non_blank(params.severity)
        .map(|value| {
            IssueSeverity::parse(&value)
                .ok_or_else(|| correlation.bad_request(format!("unknown severity `{value}`")))
        })
        .transpose()?;
    let filter = FailurePatternFilter { resolved: params.resolved, severity };
    let limit = params.limit.unwrap_or(DEFAULT_PATTERN_LIMIT).clamp(1, MAX_PAGE_LIMIT);

    let patterns = state
        .stores
        .patterns
        .list(&filter, limit)
        .await
        .map_err(|error| correlation.reject(error))?;

    debug!(
        event_name = "improvement.patterns.listed",
        correlation_id = %correlation.as_str(),
        count = patterns.len(),
        "failure patterns listed"
    );

    Ok(Json(PatternList { count: patterns.len(), patterns }))
}

pub async fn evaluator_performance(
    State(state): State<AppState>,
    correlation: CorrelationId,
    params: Result<Query<PerformanceParams>, QueryRejection>,
) -> Result<Json<EvaluatorPerformance>, ApiError> {
    let Query(params) = params.map_err(|rejection| correlation.bad_request(rejection.body_text()))?;
    let evaluator_type = non_blank(params.evaluator_type);

    let evaluators = state
        .stores
        .calibrations
        .list(evaluator_type.as_deref())
        .await
        .map_err(|error| correlation.reject(error))?;

    Ok(Json(EvaluatorPerformance { count: evaluators.len(), evaluators }))
}
