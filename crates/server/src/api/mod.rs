//! JSON API served under `/api/v1`.
//!
//! - `POST /conversations`                        ingest, optional auto-evaluate
//! - `POST /conversations/batch`                  ingest many, skipping failures
//! - `GET  /conversations`, `/conversations/{id}`
//! - `POST /evaluations/trigger`                  explicit dispatch
//! - `POST /evaluations`                          evaluator workers submit results
//! - `GET  /evaluations`, `/evaluations/{id}`
//! - `POST /annotations`
//! - `GET  /annotations/agreement/{conversation_id}?annotation_type=`
//! - `GET  /annotations/routing/{conversation_id}`
//! - `POST /feedback`                             feedback after ingestion
//! - `GET  /improvements/suggestions?min_confidence=&suggestion_type=`
//! - `POST /improvements/suggestions/{suggestion_id}/implement`
//! - `GET  /improvements/patterns?resolved=&severity=&limit=`
//! - `GET  /meta-evaluation/performance?evaluator_type=`
//! - `GET  /queues/{name}`, `POST /queues/{name}/claim`
//! - `POST /queues/{name}/leases/{lease_id}/ack|release`
//! - `GET  /stats`, `GET /health`

use std::convert::Infallible;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::{error, warn};
use triage_core::{ApplicationError, DomainError, InterfaceError};
use uuid::Uuid;

mod annotations;
mod conversations;
mod evaluations;
mod feedback;
mod improvements;
mod queues;
mod state;
mod stats;


pub use state::{AppState, Stores};

use crate::health;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/conversations",
            post(conversations::ingest).get(conversations::list),
        )
        .route("/conversations/batch", post(conversations::ingest_batch))
        .route("/conversations/{conversation_id}", get(conversations::fetch))
        .route("/evaluations", post(evaluations::submit).get(evaluations::list))
        .route("/evaluations/trigger", post(evaluations::trigger))
        .route("/evaluations/{evaluation_id}", get(evaluations::fetch))
        .route("/annotations", post(annotations::create))
        .route("/annotations/agreement/{conversation_id}", get(annotations::agreement))
        .route("/annotations/routing/{conversation_id}", get(annotations::routing))
        .route("/feedback", post(feedback::submit))
        .route("/improvements/suggestions", get(improvements::pending_suggestions))
        .route(
            "/improvements/suggestions/{suggestion_id}/implement",
            post(improvements::mark_implemented),
        )
        .route("/improvements/patterns", get(improvements::failure_patterns))
        .route("/meta-evaluation/performance", get(improvements::evaluator_performance))
        .route("/queues/{queue}", get(queues::length))
        .route("/queues/{queue}/claim", post(queues::claim))
        .route("/queues/{queue}/leases/{lease_id}/ack", post(queues::ack))
        .route("/queues/{queue}/leases/{lease_id}/release", post(queues::release))
        .route("/stats", get(stats::system_stats))
        .route("/health", get(health::health));

    Router::new()
        .route("/health", get(health::health))
        .nest("/api/v1", api)
        .with_state(state)
}

/// Request-scoped id echoed in error bodies and log events. Taken from the
/// `x-correlation-id` header when the caller supplies one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrelationId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for CorrelationId {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let supplied = parts
            .headers
            .get(CORRELATION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty());

        Ok(Self(match supplied {
            Some(value) => value.to_string(),
            None => format!("req-{}", Uuid::new_v4()),
        }))
    }
}

impl CorrelationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn reject<E: Into<ApplicationError>>(&self, error: E) -> ApiError {
        ApiError(error.into().into_interface(self.0.clone()))
    }

    pub fn bad_request(&self, message: impl Into<String>) -> ApiError {
        self.reject(DomainError::InvariantViolation(message.into()))
    }

    pub fn not_found(&self, entity: &'static str, id: impl Into<String>) -> ApiError {
        self.reject(DomainError::NotFound { entity, id: id.into() })
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub correlation_id: String,
}

#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
            InterfaceError::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let correlation_id = self.0.correlation_id().to_string();

        if status.is_server_error() {
            error!(
                event_name = "api.request.failed",
                correlation_id = %correlation_id,
                status = status.as_u16(),
                error = %self.0,
                "request failed"
            );
        } else {
            warn!(
                event_name = "api.request.rejected",
                correlation_id = %correlation_id,
                status = status.as_u16(),
                error = %self.0,
                "request rejected"
            );
        }

        let body = ErrorBody { error: self.0.message().to_string(), correlation_id };
        (status, Json(body)).into_response()
    }
}

pub(crate) const DEFAULT_PAGE_LIMIT: u32 = 100;
pub(crate) const MAX_PAGE_LIMIT: u32 = 1000;

pub(crate) fn page_limit(requested: Option<u32>) -> u32 {
    requested.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT)
}
