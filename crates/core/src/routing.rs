//! Human-review routing over a single evaluation snapshot.
//!
//! Stateless and recomputed on every request; never cached, never written
//! back to the evaluation.

use serde::{Deserialize, Serialize};

use crate::domain::conversation::ConversationId;
use crate::domain::evaluation::{Evaluation, IssueSeverity};

pub const DEFAULT_LOW_SCORE_THRESHOLD: f64 = 0.4;

pub const LOW_QUALITY_REASON: &str = "Low quality score";
pub const CRITICAL_ISSUES_REASON: &str = "Critical issues detected";

pub const GENERAL_QUALITY: &str = "general_quality";
pub const TOOL_ACCURACY: &str = "tool_accuracy";
pub const COHERENCE: &str = "coherence";

const TOOL_ISSUE_TYPES: [&str; 2] = ["tool", "tool_execution_failure"];
const COHERENCE_ISSUE_TYPES: [&str; 2] = ["context_loss", "coherence"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewPriority {
    Low,
    High,
}

impl ReviewPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::High => "high",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub conversation_id: ConversationId,
    pub needs_human_review: bool,
    pub priority: ReviewPriority,
    pub routing_reason: Vec<String>,
    pub auto_label: bool,
    pub suggested_annotation_types: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RoutingEngine {
    low_score_threshold: f64,
}

impl Default for RoutingEngine {
    fn default() -> Self {
        Self::new(DEFAULT_LOW_SCORE_THRESHOLD)
    }
}

impl RoutingEngine {
    pub fn new(low_score_threshold: f64) -> Self {
        Self { low_score_threshold }
    }

    pub fn low_score_threshold(&self) -> f64 {
        self.low_score_threshold
    }

    pub fn route(&self, conversation_id: &ConversationId, latest: &Evaluation) -> RoutingDecision {
        let mut needs_human_review = false;
        let mut priority = ReviewPriority::Low;
        let mut routing_reason = Vec::new();

        if latest.overall_score < self.low_score_threshold {
            needs_human_review = true;
            priority = ReviewPriority::High;
            routing_reason.push(LOW_QUALITY_REASON.to_string());
        }

        let has_critical =
            latest.issues_detected.iter().any(|issue| issue.severity == IssueSeverity::Critical);
        if has_critical {
            needs_human_review = true;
            priority = ReviewPriority::High;
            routing_reason.push(CRITICAL_ISSUES_REASON.to_string());
        }

        let mut suggested_annotation_types = vec![GENERAL_QUALITY.to_string()];
        for issue in &latest.issues_detected {
            let issue_type = issue.issue_type.as_str();
            if TOOL_ISSUE_TYPES.contains(&issue_type) {
                push_unique(&mut suggested_annotation_types, TOOL_ACCURACY);
            }
            if COHERENCE_ISSUE_TYPES.contains(&issue_type) {
                push_unique(&mut suggested_annotation_types, COHERENCE);
            }
        }

        RoutingDecision {
            conversation_id: conversation_id.clone(),
            needs_human_review,
            priority,
            routing_reason,
            auto_label: !needs_human_review,
            suggested_annotation_types,
        }
    }
}

fn push_unique(values: &mut Vec<String>, value: &str) {
    if !values.iter().any(|existing| existing == value) {
        values.push(value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ReviewPriority, RoutingEngine, CRITICAL_ISSUES_REASON, LOW_QUALITY_REASON,
    };
    use crate::domain::conversation::ConversationId;
    use crate::domain::evaluation::fixtures::{evaluation, issue};
    use crate::domain::evaluation::IssueSeverity;

    fn conversation() -> ConversationId {
        ConversationId("conv-route".to_string())
    }

    #[test]
    fn low_score_routes_to_high_priority_review() {
        let decision = RoutingEngine::default().route(&conversation(), &evaluation(0.3, Vec::new()));

        assert!(decision.needs_human_review);
        assert_eq!(decision.priority, ReviewPriority::High);
        assert_eq!(decision.routing_reason, vec![LOW_QUALITY_REASON]);
        assert!(!decision.auto_label);
    }

    #[test]
    fn healthy_evaluation_is_auto_labelled() {
        let decision = RoutingEngine::default().route(&conversation(), &evaluation(0.9, Vec::new()));

        assert!(!decision.needs_human_review);
        assert_eq!(decision.priority, ReviewPriority::Low);
        assert!(decision.routing_reason.is_empty());
        assert_eq!(decision.suggested_annotation_types, vec!["general_quality"]);
        assert!(decision.auto_label);
    }

    #[test]
    fn score_at_threshold_is_not_low_quality() {
        let decision = RoutingEngine::default().route(&conversation(), &evaluation(0.4, Vec::new()));

        assert!(!decision.needs_human_review);
    }

    #[test]
    fn critical_issue_forces_review_even_with_good_score() {
        let decision = RoutingEngine::default().route(
            &conversation(),
            &evaluation(0.95, vec![issue("hallucination", IssueSeverity::Critical)]),
        );

        assert!(decision.needs_human_review);
        assert_eq!(decision.priority, ReviewPriority::High);
        assert_eq!(decision.routing_reason, vec![CRITICAL_ISSUES_REASON]);
    }

    #[test]
    fn both_triggers_keep_priority_high_and_list_both_reasons_in_order() {
        let decision = RoutingEngine::default().route(
            &conversation(),
            &evaluation(
                0.1,
                vec![
                    issue("tool", IssueSeverity::Critical),
                    issue("coherence", IssueSeverity::Critical),
                ],
            ),
        );

        assert_eq!(decision.priority, ReviewPriority::High);
        assert_eq!(decision.routing_reason, vec![LOW_QUALITY_REASON, CRITICAL_ISSUES_REASON]);
    }

    #[test]
    fn tool_execution_failure_suggests_tool_accuracy_at_any_severity() {
        for severity in
            [IssueSeverity::Low, IssueSeverity::Medium, IssueSeverity::High, IssueSeverity::Critical]
        {
            let decision = RoutingEngine::default().route(
                &conversation(),
                &evaluation(0.8, vec![issue("tool_execution_failure", severity)]),
            );
            assert!(decision.suggested_annotation_types.contains(&"tool_accuracy".to_string()));
        }
    }

    #[test]
    fn suggested_types_are_unique_and_ordered() {
        let decision = RoutingEngine::default().route(
            &conversation(),
            &evaluation(
                0.8,
                vec![
                    issue("context_loss", IssueSeverity::Low),
                    issue("tool", IssueSeverity::Medium),
                    issue("coherence", IssueSeverity::Low),
                    issue("tool_execution_failure", IssueSeverity::High),
                ],
            ),
        );

        assert_eq!(
            decision.suggested_annotation_types,
            vec!["general_quality", "coherence", "tool_accuracy"]
        );
    }

    #[test]
    fn unrelated_issue_types_do_not_add_suggestions() {
        let decision = RoutingEngine::default().route(
            &conversation(),
            &evaluation(0.8, vec![issue("latency", IssueSeverity::High)]),
        );

        assert_eq!(decision.suggested_annotation_types, vec!["general_quality"]);
        assert!(!decision.needs_human_review);
    }

    #[test]
    fn custom_threshold_is_respected() {
        let decision =
            RoutingEngine::new(0.7).route(&conversation(), &evaluation(0.65, Vec::new()));

        assert!(decision.needs_human_review);
    }

    #[test]
    fn routing_is_idempotent() {
        let engine = RoutingEngine::default();
        let snapshot = evaluation(
            0.2,
            vec![issue("tool", IssueSeverity::Critical), issue("context_loss", IssueSeverity::Low)],
        );

        let first = engine.route(&conversation(), &snapshot);
        let second = engine.route(&conversation(), &snapshot);

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).expect("serialize"),
            serde_json::to_string(&second).expect("serialize")
        );
    }

    #[test]
    fn priority_serializes_lowercase() {
        let decision = RoutingEngine::default().route(&conversation(), &evaluation(0.3, Vec::new()));
        let json = serde_json::to_value(&decision).expect("serialize");

        assert_eq!(json["priority"], "high");
        assert_eq!(json["conversation_id"], "conv-route");
    }
}
