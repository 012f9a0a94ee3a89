use axum::{extract::rejection::JsonRejection, extract::State, http::StatusCode, Json};
use serde::Serialize;
use tracing::info;
use triage_core::{ConversationId, FeedbackSubmission};

use super::{stats, ApiError, AppState, CorrelationId};

#[derive(Debug, Serialize)]
pub struct FeedbackAccepted {
    pub status: &'static str,
    pub conversation_id: ConversationId,
}

pub async fn submit(
    State(state): State<AppState>,
    correlation: CorrelationId,
    body: Result<Json<FeedbackSubmission>, JsonRejection>,
) -> Result<(StatusCode, Json<FeedbackAccepted>), ApiError> {
    let Json(submission) = body.map_err(|rejection| correlation.bad_request(rejection.body_text()))?;
    submission.validate().map_err(|error| correlation.reject(error))?;

    let conversation_id = submission.conversation_id.clone();
    let user_rating = submission.feedback.user_rating;
    state.stores.feedback.add(submission).await.map_err(|error| correlation.reject(error))?;

    info!(
        event_name = "feedback.recorded",
        correlation_id = %correlation.as_str(),
        conversation_id = %conversation_id,
        user_rating = ?user_rating,
        "feedback recorded"
    );
    stats::invalidate(&state, &correlation).await;

    Ok((StatusCode::CREATED, Json(FeedbackAccepted { status: "success", conversation_id })))
}
