//! Records written by the offline analysis jobs: recurring failure patterns,
//! the improvement suggestions derived from them, and how well each
//! evaluator agrees with human reviewers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::conversation::ConversationId;
use crate::domain::evaluation::IssueSeverity;
use crate::errors::DomainError;

pub const DEFAULT_MIN_SUGGESTION_CONFIDENCE: f64 = 0.7;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SuggestionId(pub String);

impl std::fmt::Display for SuggestionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionStatus {
    Pending,
    Implemented,
    Rejected,
}

impl SuggestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Implemented => "implemented",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "implemented" => Some(Self::Implemented),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredSuggestion {
    pub suggestion_id: SuggestionId,
    pub suggestion_type: String,
    pub suggestion: String,
    pub rationale: String,
    pub confidence: f64,
    #[serde(default)]
    pub pattern_detected: Value,
    #[serde(default)]
    pub affected_conversations: Vec<ConversationId>,
    pub frequency: u32,
    pub status: SuggestionStatus,
    pub implemented_at: Option<DateTime<Utc>>,
    pub impact_measured: bool,
    pub before_metrics: Option<Value>,
    pub after_metrics: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredSuggestion {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.suggestion_id.0.trim().is_empty() {
            return Err(DomainError::InvariantViolation(
                "suggestion_id must not be empty".to_string(),
            ));
        }
        validate_min_confidence(self.confidence)
    }

    /// Moves the suggestion to `implemented`, recording the metrics it is
    /// later measured against.
    pub fn mark_implemented(&mut self, before_metrics: Option<Value>, now: DateTime<Utc>) {
        self.status = SuggestionStatus::Implemented;
        self.implemented_at = Some(now);
        self.before_metrics = before_metrics;
        self.updated_at = now;
    }
}

/// Confidence thresholds and stored confidences share the `[0, 1]` range.
pub fn validate_min_confidence(value: f64) -> Result<(), DomainError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(DomainError::InvariantViolation(format!(
            "confidence must be within [0, 1], got {value}"
        )));
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailurePattern {
    pub pattern_id: String,
    pub pattern_type: String,
    pub description: String,
    pub severity: IssueSeverity,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub occurrence_count: u32,
    #[serde(default)]
    pub affected_versions: Vec<String>,
    #[serde(default)]
    pub example_conversations: Vec<ConversationId>,
    pub resolved: bool,
    pub resolution_notes: Option<String>,
    pub related_suggestion_id: Option<SuggestionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FailurePatternFilter {
    pub resolved: Option<bool>,
    pub severity: Option<IssueSeverity>,
}

impl FailurePatternFilter {
    pub fn matches(&self, pattern: &FailurePattern) -> bool {
        self.resolved.map_or(true, |resolved| pattern.resolved == resolved)
            && self.severity.map_or(true, |severity| pattern.severity == severity)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorCalibration {
    pub evaluator_type: String,
    pub evaluator_version: Option<String>,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1_score: Option<f64>,
    pub correlation_with_human: Option<f64>,
    pub calibration_samples: u32,
    pub false_positive_rate: Option<f64>,
    pub false_negative_rate: Option<f64>,
    #[serde(default)]
    pub missed_patterns: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    use super::{
        validate_min_confidence, FailurePattern, FailurePatternFilter, StoredSuggestion,
        SuggestionId, SuggestionStatus,
    };
    use crate::domain::evaluation::IssueSeverity;

    fn suggestion(confidence: f64) -> StoredSuggestion {
        let created = Utc.with_ymd_and_hms(2026, 10, 1, 8, 0, 0).single().expect("timestamp");
        StoredSuggestion {
            suggestion_id: SuggestionId("sugg-1".to_string()),
            suggestion_type: "prompt".to_string(),
            suggestion: "Confirm the booking reference before calling the rebook tool".to_string(),
            rationale: "rebook failures follow missing references".to_string(),
            confidence,
            pattern_detected: json!({"issue": "tool_execution_failure"}),
            affected_conversations: Vec::new(),
            frequency: 3,
            status: SuggestionStatus::Pending,
            implemented_at: None,
            impact_measured: false,
            before_metrics: None,
            after_metrics: None,
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn confidence_outside_unit_range_is_rejected() {
        assert!(validate_min_confidence(1.2).is_err());
        assert!(validate_min_confidence(f64::NAN).is_err());
        assert!(suggestion(-0.1).validate().is_err());
        assert_eq!(suggestion(0.8).validate(), Ok(()));
    }

    #[test]
    fn marking_implemented_stamps_time_and_metrics() {
        let mut stored = suggestion(0.9);
        let now = stored.created_at + Duration::hours(2);

        stored.mark_implemented(Some(json!({"avg_score": 0.61})), now);

        assert_eq!(stored.status, SuggestionStatus::Implemented);
        assert_eq!(stored.implemented_at, Some(now));
        assert_eq!(stored.updated_at, now);
        assert_eq!(stored.before_metrics, Some(json!({"avg_score": 0.61})));
    }

    #[test]
    fn status_round_trips_through_its_text_form() {
        for status in
            [SuggestionStatus::Pending, SuggestionStatus::Implemented, SuggestionStatus::Rejected]
        {
            assert_eq!(SuggestionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SuggestionStatus::parse("PENDING"), None);
    }

    #[test]
    fn pattern_filter_combines_resolution_and_severity() {
        let seen = Utc.with_ymd_and_hms(2026, 10, 1, 8, 0, 0).single().expect("timestamp");
        let pattern = FailurePattern {
            pattern_id: "pat-1".to_string(),
            pattern_type: "tool_timeout".to_string(),
            description: "booking tool times out under load".to_string(),
            severity: IssueSeverity::High,
            first_seen: seen,
            last_seen: seen,
            occurrence_count: 4,
            affected_versions: vec!["agent-2.3.0".to_string()],
            example_conversations: Vec::new(),
            resolved: false,
            resolution_notes: None,
            related_suggestion_id: None,
            created_at: seen,
            updated_at: seen,
        };

        assert!(FailurePatternFilter::default().matches(&pattern));
        let open_high =
            FailurePatternFilter { resolved: Some(false), severity: Some(IssueSeverity::High) };
        assert!(open_high.matches(&pattern));
        let resolved = FailurePatternFilter { resolved: Some(true), ..FailurePatternFilter::default() };
        assert!(!resolved.matches(&pattern));
        let low = FailurePatternFilter { severity: Some(IssueSeverity::Low), ..FailurePatternFilter::default() };
        assert!(!low.matches(&pattern));
    }
}
