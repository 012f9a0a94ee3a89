use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub turn_id: i64,
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mission_completed: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpsReview {
    pub quality: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Inline label captured together with user feedback at ingestion time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedbackLabel {
    #[serde(rename = "type")]
    pub label_type: String,
    pub label: String,
    pub annotator_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_rating: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ops_review: Option<OpsReview>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<FeedbackLabel>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationCreate {
    pub conversation_id: ConversationId,
    pub agent_version: String,
    pub turns: Vec<Turn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ConversationMetadata>,
}

impl ConversationCreate {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.conversation_id.0.trim().is_empty() {
            return Err(DomainError::InvariantViolation(
                "conversation_id must not be empty".to_string(),
            ));
        }
        if self.agent_version.trim().is_empty() {
            return Err(DomainError::InvariantViolation(
                "agent_version must not be empty".to_string(),
            ));
        }
        if self.turns.is_empty() {
            return Err(DomainError::InvariantViolation(
                "a conversation needs at least one turn".to_string(),
            ));
        }
        if let Some(feedback) = self.feedback.as_ref() {
            feedback.validate()?;
        }
        Ok(())
    }
}

impl Feedback {
    pub fn validate(&self) -> Result<(), DomainError> {
        if let Some(rating) = self.user_rating {
            if !(1..=5).contains(&rating) {
                return Err(DomainError::InvariantViolation(format!(
                    "user_rating must be in range 1..=5, got {rating}"
                )));
            }
        }
        Ok(())
    }
}

/// Feedback that arrives after the conversation was ingested.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSubmission {
    pub conversation_id: ConversationId,
    pub feedback: Feedback,
}

impl FeedbackSubmission {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.conversation_id.0.trim().is_empty() {
            return Err(DomainError::InvariantViolation(
                "conversation_id must not be empty".to_string(),
            ));
        }
        self.feedback.validate()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: ConversationId,
    pub agent_version: String,
    pub turns: Vec<Turn>,
    pub metadata: ConversationMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
