use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::{debug, info};
use triage_core::{Annotation, AnnotationCreate, AnnotatorAgreement, ConversationId, RoutingDecision};

use super::{stats, ApiError, AppState, CorrelationId};

#[derive(Debug, Default, Deserialize)]
pub struct AgreementParams {
    pub annotation_type: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    correlation: CorrelationId,
    body: Result<Json<AnnotationCreate>, JsonRejection>,
) -> Result<(StatusCode, Json<Annotation>), ApiError> {
    let Json(input) = body.map_err(|rejection| correlation.bad_request(rejection.body_text()))?;
    input.validate().map_err(|error| correlation.reject(error))?;

    let annotation = state
        .stores
        .annotations
        .create(input)
        .await
        .map_err(|error| correlation.reject(error))?;

    info!(
        event_name = "annotation.recorded",
        correlation_id = %correlation.as_str(),
        conversation_id = %annotation.conversation_id,
        annotator_id = %annotation.annotator_id,
        annotation_type = %annotation.annotation_type,
        "annotation recorded"
    );
    stats::invalidate(&state, &correlation).await;

    Ok((StatusCode::CREATED, Json(annotation)))
}

pub async fn agreement(
    State(state): State<AppState>,
    correlation: CorrelationId,
    Path(conversation_id): Path<String>,
    params: Result<Query<AgreementParams>, QueryRejection>,
) -> Result<Json<AnnotatorAgreement>, ApiError> {
    let Query(params) = params.map_err(|rejection| correlation.bad_request(rejection.body_text()))?;
    let annotation_type = params
        .annotation_type
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| correlation.bad_request("annotation_type is required"))?;
    let conversation_id = ConversationId(conversation_id);

    let annotations = state
        .stores
        .annotations
        .list_for_conversation(&conversation_id, Some(&annotation_type))
        .await
        .map_err(|error| correlation.reject(error))?;

    let agreement = state
        .analyzer
        .compute(&conversation_id, &annotation_type, &annotations)
        .map_err(|error| correlation.reject(error))?;

    debug!(
        event_name = "annotation.agreement.computed",
        correlation_id = %correlation.as_str(),
        conversation_id = %conversation_id,
        annotation_type = %annotation_type,
        annotators = agreement.annotators.len(),
        agreement_score = agreement.agreement_score,
        needs_tiebreaker = agreement.needs_tiebreaker,
        "annotator agreement computed"
    );

    Ok(Json(agreement))
}

pub async fn routing(
    State(state): State<AppState>,
    correlation: CorrelationId,
    Path(conversation_id): Path<String>,
) -> Result<Json<RoutingDecision>, ApiError> {
    let conversation_id = ConversationId(conversation_id);

    let latest = state
        .stores
        .evaluations
        .latest_for_conversation(&conversation_id)
        .await
        .map_err(|error| correlation.reject(error))?
        .ok_or_else(|| correlation.not_found("evaluation for conversation", conversation_id.0.clone()))?;

    let decision = state.routing.route(&conversation_id, &latest);
    debug!(
        event_name = "annotation.routing.decided",
        correlation_id = %correlation.as_str(),
        conversation_id = %conversation_id,
        evaluation_id = %latest.evaluation_id.0,
        needs_human_review = decision.needs_human_review,
        priority = decision.priority.as_str(),
        "routing decision computed"
    );

    Ok(Json(decision))
}
