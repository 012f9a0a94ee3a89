use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use triage_core::{Conversation, ConversationCreate, ConversationId};

use super::{page_limit, stats, ApiError, AppState, CorrelationId};

#[derive(Debug, Default, Deserialize)]
pub struct IngestParams {
    pub auto_evaluate: Option<bool>,
}

impl IngestParams {
    fn auto_evaluate(&self) -> bool {
        self.auto_evaluate.unwrap_or(true)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub agent_version: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ConversationList {
    pub conversations: Vec<Conversation>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct BatchIngestResponse {
    pub ingested: usize,
    pub conversation_ids: Vec<ConversationId>,
}

pub async fn ingest(
    State(state): State<AppState>,
    correlation: CorrelationId,
    params: Result<Query<IngestParams>, QueryRejection>,
    body: Result<Json<ConversationCreate>, JsonRejection>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    let Query(params) = params.map_err(|rejection| correlation.bad_request(rejection.body_text()))?;
    let Json(input) = body.map_err(|rejection| correlation.bad_request(rejection.body_text()))?;
    input.validate().map_err(|error| correlation.reject(error))?;

    let created = state
        .stores
        .conversations
        .create(input)
        .await
        .map_err(|error| correlation.reject(error))?;

    info!(
        event_name = "conversation.ingested",
        correlation_id = %correlation.as_str(),
        conversation_id = %created.conversation_id,
        agent_version = %created.agent_version,
        turns = created.turns.len(),
        "conversation ingested"
    );

    if params.auto_evaluate() {
        state.auto_dispatcher.submit(created.conversation_id.clone(), correlation.as_str());
    }
    stats::invalidate(&state, &correlation).await;

    Ok((StatusCode::CREATED, Json(created)))
}

/// Items that fail validation or storage are skipped; the response lists
/// only the conversations that were stored.
pub async fn ingest_batch(
    State(state): State<AppState>,
    correlation: CorrelationId,
    params: Result<Query<IngestParams>, QueryRejection>,
    body: Result<Json<Vec<ConversationCreate>>, JsonRejection>,
) -> Result<(StatusCode, Json<BatchIngestResponse>), ApiError> {
    let Query(params) = params.map_err(|rejection| correlation.bad_request(rejection.body_text()))?;
    let Json(inputs) = body.map_err(|rejection| correlation.bad_request(rejection.body_text()))?;
    let submitted = inputs.len();

    let mut conversation_ids = Vec::with_capacity(submitted);
    for input in inputs {
        let conversation_id = input.conversation_id.clone();
        if let Err(error) = input.validate() {
            warn!(
                event_name = "conversation.batch.skipped",
                correlation_id = %correlation.as_str(),
                conversation_id = %conversation_id,
                error = %error,
                "batch item failed validation"
            );
            continue;
        }

        match state.stores.conversations.create(input).await {
            Ok(created) => {
                if params.auto_evaluate() {
                    state
                        .auto_dispatcher
                        .submit(created.conversation_id.clone(), correlation.as_str());
                }
                conversation_ids.push(created.conversation_id);
            }
            Err(error) => warn!(
                event_name = "conversation.batch.skipped",
                correlation_id = %correlation.as_str(),
                conversation_id = %conversation_id,
                error = %error,
                "batch item could not be stored"
            ),
        }
    }

    info!(
        event_name = "conversation.batch.ingested",
        correlation_id = %correlation.as_str(),
        submitted,
        ingested = conversation_ids.len(),
        "conversation batch ingested"
    );
    if !conversation_ids.is_empty() {
        stats::invalidate(&state, &correlation).await;
    }

    Ok((
        StatusCode::CREATED,
        Json(BatchIngestResponse { ingested: conversation_ids.len(), conversation_ids }),
    ))
}

pub async fn list(
    State(state): State<AppState>,
    correlation: CorrelationId,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<ConversationList>, ApiError> {
    let Query(params) = params.map_err(|rejection| correlation.bad_request(rejection.body_text()))?;
    let agent_version = params.agent_version.as_deref().filter(|value| !value.is_empty());

    let conversations = state
        .stores
        .conversations
        .list(agent_version, page_limit(params.limit), params.offset.unwrap_or(0))
        .await
        .map_err(|error| correlation.reject(error))?;

    Ok(Json(ConversationList { count: conversations.len(), conversations }))
}

pub async fn fetch(
    State(state): State<AppState>,
    correlation: CorrelationId,
    Path(conversation_id): Path<String>,
) -> Result<Json<Conversation>, ApiError> {
    state
        .stores
        .conversations
        .find(&ConversationId(conversation_id.clone()))
        .await
        .map_err(|error| correlation.reject(error))?
        .map(Json)
        .ok_or_else(|| correlation.not_found("conversation", conversation_id))
}
