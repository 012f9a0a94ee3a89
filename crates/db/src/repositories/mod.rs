use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use triage_core::domain::annotation::{Annotation, AnnotationCreate};
use serde_json::Value;
use triage_core::domain::conversation::{
    Conversation, ConversationCreate, ConversationId, FeedbackSubmission,
};
use triage_core::domain::evaluation::{Evaluation, EvaluationId};
use triage_core::domain::improvement::{
    EvaluatorCalibration, FailurePattern, FailurePatternFilter, StoredSuggestion, SuggestionId,
};
use triage_core::errors::{ApplicationError, DomainError};

pub mod annotation;
pub mod conversation;
pub mod evaluation;
pub mod feedback;
pub mod improvement;
pub mod memory;
pub mod stats;

pub use annotation::SqlAnnotationRepository;
pub use conversation::SqlConversationRepository;
pub use evaluation::SqlEvaluationRepository;
pub use feedback::SqlFeedbackRepository;
pub use improvement::SqlImprovementRepository;
pub use memory::InMemoryRepository;
pub use stats::SqlStatsRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{entity} `{id}` already exists")]
    Conflict { entity: &'static str, id: String },
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict { entity, id } => {
                ApplicationError::Domain(DomainError::Conflict { entity, id })
            }
            RepositoryError::NotFound { entity, id } => {
                ApplicationError::Domain(DomainError::NotFound { entity, id })
            }
            other => ApplicationError::Persistence(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct EvaluationFilter {
    pub conversation_id: Option<ConversationId>,
    pub min_score: Option<f64>,
    pub max_score: Option<f64>,
}

impl EvaluationFilter {
    pub fn matches(&self, evaluation: &Evaluation) -> bool {
        self.conversation_id.as_ref().map_or(true, |id| &evaluation.conversation_id == id)
            && self.min_score.map_or(true, |min| evaluation.overall_score >= min)
            && self.max_score.map_or(true, |max| evaluation.overall_score <= max)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub total_conversations: u64,
    pub total_evaluations: u64,
    pub total_annotations: u64,
    pub average_quality_score: Option<f64>,
    pub average_user_rating: Option<f64>,
    pub open_issues_count: u64,
    pub pending_suggestions_count: u64,
    pub evaluations_last_24h: u64,
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Stores the conversation and any feedback captured with it. A second
    /// create for the same id is a `Conflict`.
    async fn create(&self, input: ConversationCreate) -> Result<Conversation, RepositoryError>;

    async fn find(&self, id: &ConversationId) -> Result<Option<Conversation>, RepositoryError>;

    /// Newest first.
    async fn list(
        &self,
        agent_version: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Conversation>, RepositoryError>;
}

#[async_trait]
pub trait EvaluationRepository: Send + Sync {
    async fn append(&self, evaluation: Evaluation) -> Result<(), RepositoryError>;

    async fn find(&self, id: &EvaluationId) -> Result<Option<Evaluation>, RepositoryError>;

    /// Greatest `created_at`; on equal timestamps the later append wins.
    async fn latest_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Evaluation>, RepositoryError>;

    async fn list(
        &self,
        filter: &EvaluationFilter,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Evaluation>, RepositoryError>;
}

#[async_trait]
pub trait AnnotationRepository: Send + Sync {
    async fn create(&self, input: AnnotationCreate) -> Result<Annotation, RepositoryError>;

    /// Newest first, ties broken by reverse insertion order, so repeated
    /// reads feed agreement analysis in a stable order.
    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
        annotation_type: Option<&str>,
    ) -> Result<Vec<Annotation>, RepositoryError>;
}

#[async_trait]
pub trait FeedbackRepository: Send + Sync {
    /// Appends feedback to an ingested conversation; `NotFound` when the
    /// conversation is unknown.
    async fn add(&self, submission: FeedbackSubmission) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait SuggestionRepository: Send + Sync {
    async fn record(&self, suggestion: StoredSuggestion) -> Result<(), RepositoryError>;

    /// Pending suggestions at or above `min_confidence`, most confident first.
    async fn pending(
        &self,
        min_confidence: f64,
        suggestion_type: Option<&str>,
    ) -> Result<Vec<StoredSuggestion>, RepositoryError>;

    async fn mark_implemented(
        &self,
        id: &SuggestionId,
        before_metrics: Option<Value>,
        now: DateTime<Utc>,
    ) -> Result<StoredSuggestion, RepositoryError>;
}

#[async_trait]
pub trait FailurePatternRepository: Send + Sync {
    async fn record(&self, pattern: FailurePattern) -> Result<(), RepositoryError>;

    /// Most frequent first.
    async fn list(
        &self,
        filter: &FailurePatternFilter,
        limit: u32,
    ) -> Result<Vec<FailurePattern>, RepositoryError>;
}

#[async_trait]
pub trait CalibrationRepository: Send + Sync {
    async fn record(&self, calibration: EvaluatorCalibration) -> Result<(), RepositoryError>;

    /// Newest first.
    async fn list(
        &self,
        evaluator_type: Option<&str>,
    ) -> Result<Vec<EvaluatorCalibration>, RepositoryError>;
}

#[async_trait]
pub trait StatsRepository: Send + Sync {
    async fn stats(&self, now: DateTime<Utc>) -> Result<SystemStats, RepositoryError>;
}

/// Fixed-width UTC encoding so stored timestamps sort lexicographically.
pub(crate) fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_json<T: DeserializeOwned>(
    column: &str,
    value: &str,
) -> Result<T, RepositoryError> {
    serde_json::from_str(value)
        .map_err(|error| RepositoryError::Decode(format!("invalid json in `{column}`: {error}")))
}

pub(crate) fn encode_json<T: Serialize + ?Sized>(
    column: &str,
    value: &T,
) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|error| RepositoryError::Decode(format!("cannot encode `{column}`: {error}")))
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!("column `{column}` is out of range for u32: {value}"))
    })
}

pub(crate) fn parse_u64(column: &str, value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!("column `{column}` is out of range for u64: {value}"))
    })
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|value| parse_timestamp(column, value)).transpose()
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db_error) if db_error.is_unique_violation())
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::json;

    use triage_core::domain::annotation::AnnotationCreate;
    use triage_core::domain::conversation::{
        ConversationCreate, ConversationId, ConversationMetadata, Feedback, OpsReview, Turn,
    };
    use triage_core::domain::evaluation::{Evaluation, EvaluationId, Issue, IssueSeverity};
    use triage_core::domain::improvement::{
        EvaluatorCalibration, FailurePattern, StoredSuggestion, SuggestionId, SuggestionStatus,
    };

    use crate::{connect_with_settings, migrations, DbPool};

    pub async fn setup_pool() -> DbPool {
        let pool =
            connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect to sqlite");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    pub fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 1, 9, 0, 0).single().expect("valid base timestamp")
            + Duration::minutes(minutes)
    }

    pub fn conversation(id: &str, agent_version: &str) -> ConversationCreate {
        ConversationCreate {
            conversation_id: ConversationId(id.to_string()),
            agent_version: agent_version.to_string(),
            turns: vec![Turn {
                turn_id: 1,
                role: "user".to_string(),
                content: "where is my order?".to_string(),
                tool_calls: Vec::new(),
                timestamp: at(0),
            }],
            feedback: Some(Feedback {
                user_rating: Some(4),
                ops_review: Some(OpsReview { quality: "good".to_string(), notes: None }),
                annotations: Vec::new(),
            }),
            metadata: Some(ConversationMetadata {
                total_latency_ms: Some(1200),
                mission_completed: Some(true),
            }),
        }
    }

    pub fn evaluation(id: &str, conversation_id: &str, score: f64, minutes: i64) -> Evaluation {
        Evaluation {
            evaluation_id: EvaluationId(id.to_string()),
            conversation_id: ConversationId(conversation_id.to_string()),
            overall_score: score,
            response_quality_score: score,
            tool_accuracy_score: score,
            coherence_score: score,
            tool_evaluation: json!({"tools_called": 1}),
            issues_detected: if score < 0.5 {
                vec![Issue {
                    issue_type: "tool_execution_failure".to_string(),
                    severity: IssueSeverity::High,
                    description: "order lookup timed out".to_string(),
                    turn_id: Some(1),
                }]
            } else {
                Vec::new()
            },
            improvement_suggestions: Vec::new(),
            evaluator_version: "judge-1.0".to_string(),
            duration_ms: 840,
            created_at: at(minutes),
        }
    }

    pub fn annotation(conversation_id: &str, annotator: &str, label: &str) -> AnnotationCreate {
        AnnotationCreate {
            conversation_id: ConversationId(conversation_id.to_string()),
            annotator_id: annotator.to_string(),
            annotation_type: "general_quality".to_string(),
            label: label.to_string(),
            score: Some(0.7),
            confidence: Some(0.9),
            notes: None,
            time_spent_seconds: Some(45),
        }
    }

    pub fn suggestion(id: &str, suggestion_type: &str, confidence: f64) -> StoredSuggestion {
        StoredSuggestion {
            suggestion_id: SuggestionId(id.to_string()),
            suggestion_type: suggestion_type.to_string(),
            suggestion: "Ask for the order number before calling the lookup tool".to_string(),
            rationale: "lookups without an order number time out".to_string(),
            confidence,
            pattern_detected: json!({"issue": "tool_execution_failure"}),
            affected_conversations: vec![ConversationId("conv-1".to_string())],
            frequency: 2,
            status: SuggestionStatus::Pending,
            implemented_at: None,
            impact_measured: false,
            before_metrics: None,
            after_metrics: None,
            created_at: at(0),
            updated_at: at(0),
        }
    }

    pub fn failure_pattern(
        id: &str,
        severity: IssueSeverity,
        occurrences: u32,
        resolved: bool,
    ) -> FailurePattern {
        FailurePattern {
            pattern_id: id.to_string(),
            pattern_type: "tool_timeout".to_string(),
            description: "order lookup times out".to_string(),
            severity,
            first_seen: at(0),
            last_seen: at(30),
            occurrence_count: occurrences,
            affected_versions: vec!["v1".to_string()],
            example_conversations: vec![ConversationId("conv-1".to_string())],
            resolved,
            resolution_notes: resolved.then(|| "retry budget raised".to_string()),
            related_suggestion_id: None,
            created_at: at(0),
            updated_at: at(30),
        }
    }

    pub fn calibration(evaluator_type: &str, minutes: i64) -> EvaluatorCalibration {
        EvaluatorCalibration {
            evaluator_type: evaluator_type.to_string(),
            evaluator_version: Some("judge-1.0".to_string()),
            precision: Some(0.82),
            recall: Some(0.74),
            f1_score: Some(0.78),
            correlation_with_human: Some(0.69),
            calibration_samples: 120,
            false_positive_rate: Some(0.11),
            false_negative_rate: None,
            missed_patterns: json!(["sarcasm"]),
            created_at: at(minutes),
            updated_at: at(minutes),
        }
    }
}
