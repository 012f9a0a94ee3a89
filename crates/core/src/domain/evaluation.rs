use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::conversation::ConversationId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvaluationId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl IssueSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(rename = "type")]
    pub issue_type: String,
    pub severity: IssueSeverity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    #[serde(rename = "type")]
    pub suggestion_type: String,
    pub suggestion: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_impact: Option<String>,
}

/// Scored assessment of one conversation. Records are append-only; the
/// latest one for a conversation is the one with the greatest `created_at`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub evaluation_id: EvaluationId,
    pub conversation_id: ConversationId,
    pub overall_score: f64,
    pub response_quality_score: f64,
    pub tool_accuracy_score: f64,
    pub coherence_score: f64,
    #[serde(default)]
    pub tool_evaluation: Value,
    #[serde(default)]
    pub issues_detected: Vec<Issue>,
    #[serde(default)]
    pub improvement_suggestions: Vec<Suggestion>,
    pub evaluator_version: String,
    #[serde(default)]
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl Evaluation {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.evaluation_id.0.trim().is_empty() {
            return Err(DomainError::InvariantViolation(
                "evaluation_id must not be empty".to_string(),
            ));
        }
        if self.conversation_id.0.trim().is_empty() {
            return Err(DomainError::InvariantViolation(
                "conversation_id must not be empty".to_string(),
            ));
        }

        let scores = [
            ("overall_score", self.overall_score),
            ("response_quality_score", self.response_quality_score),
            ("tool_accuracy_score", self.tool_accuracy_score),
            ("coherence_score", self.coherence_score),
        ];
        for (field, score) in scores {
            if !score.is_finite() || !(0.0..=1.0).contains(&score) {
                return Err(DomainError::InvariantViolation(format!(
                    "{field} must be within [0, 1], got {score}"
                )));
            }
        }

        Ok(())
    }

    pub fn critical_issue_count(&self) -> usize {
        self.issues_detected.iter().filter(|issue| issue.severity == IssueSeverity::Critical).count()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{evaluation, issue};
    use super::{Evaluation, IssueSeverity};

    #[test]
    fn severity_round_trips_from_storage_encoding() {
        let cases =
            [IssueSeverity::Low, IssueSeverity::Medium, IssueSeverity::High, IssueSeverity::Critical];

        for severity in cases {
            assert_eq!(IssueSeverity::parse(severity.as_str()), Some(severity));
        }
        assert_eq!(IssueSeverity::parse("catastrophic"), None);
    }

    #[test]
    fn out_of_range_score_is_rejected() {
        let mut record = evaluation(0.8, Vec::new());
        record.coherence_score = 1.4;

        let error = record.validate().expect_err("score above 1 must fail");
        assert!(error.to_string().contains("coherence_score"));
    }

    #[test]
    fn nan_score_is_rejected() {
        assert!(evaluation(f64::NAN, Vec::new()).validate().is_err());
    }

    #[test]
    fn counts_only_critical_issues() {
        let record = evaluation(
            0.7,
            vec![
                issue("tool", IssueSeverity::Critical),
                issue("coherence", IssueSeverity::High),
                issue("context_loss", IssueSeverity::Critical),
            ],
        );

        assert_eq!(record.critical_issue_count(), 2);
    }

    #[test]
    fn worker_payload_with_unknown_severity_fails_to_decode() {
        let raw = r#"{
            "evaluation_id": "e-1",
            "conversation_id": "c-1",
            "overall_score": 0.5,
            "response_quality_score": 0.5,
            "tool_accuracy_score": 0.5,
            "coherence_score": 0.5,
            "issues_detected": [{"type": "tool", "severity": "apocalyptic", "description": "x"}],
            "evaluator_version": "1",
            "created_at": "2026-10-01T09:00:00Z"
        }"#;

        assert!(serde_json::from_str::<Evaluation>(raw).is_err());
    }
}
