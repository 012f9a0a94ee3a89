use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::conversation::ConversationId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Evaluate,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Evaluate => "evaluate",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "evaluate" => Some(Self::Evaluate),
            _ => None,
        }
    }
}

/// Unit of dispatched work. The serialized form is the wire contract shared
/// with external evaluator workers, so field names must not change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub conversation_id: ConversationId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evaluator_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Map<String, Value>>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Builds an `evaluate` task with a fresh id. Evaluator types keep their
    /// first-seen order and duplicates are dropped.
    pub fn evaluate(conversation_id: ConversationId, evaluator_types: Vec<String>) -> Self {
        Self {
            id: TaskId::generate(),
            task_type: TaskType::Evaluate,
            conversation_id,
            evaluator_types: ordered_unique(evaluator_types),
            payload: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_wire(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

pub(crate) fn ordered_unique(values: Vec<String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        if !unique.contains(&value) {
            unique.push(value);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{Task, TaskType};
    use crate::domain::conversation::ConversationId;

    #[test]
    fn task_type_round_trips_from_wire_encoding() {
        assert_eq!(TaskType::parse(TaskType::Evaluate.as_str()), Some(TaskType::Evaluate));
        assert_eq!(TaskType::parse(" EVALUATE "), Some(TaskType::Evaluate));
        assert_eq!(TaskType::parse("summarize"), None);
    }

    #[test]
    fn wire_format_uses_fixed_field_names() {
        let task = Task::evaluate(
            ConversationId("conv-001".to_string()),
            vec!["llm_judge".to_string(), "coherence".to_string()],
        );

        let wire: Value = serde_json::from_str(&task.to_wire().expect("serialize"))
            .expect("wire payload is json");

        assert_eq!(wire["id"], json!(task.id.0));
        assert_eq!(wire["type"], "evaluate");
        assert_eq!(wire["conversation_id"], "conv-001");
        assert_eq!(wire["evaluator_types"], json!(["llm_judge", "coherence"]));
        assert!(wire.get("payload").is_none(), "absent payload is omitted");
        let created_at = wire["created_at"].as_str().expect("created_at is a string");
        assert!(chrono::DateTime::parse_from_rfc3339(created_at).is_ok());
    }

    #[test]
    fn wire_payload_from_external_producer_is_accepted() {
        let raw = r#"{
            "id": "0b6f7c1e-2a4d-4d55-9d0b-7f1e3c1f9a10",
            "type": "evaluate",
            "conversation_id": "conv-ext",
            "payload": {"priority": "backfill"},
            "created_at": "2026-10-01T08:30:00Z"
        }"#;

        let task = Task::from_wire(raw).expect("deserialize");
        assert_eq!(task.task_type, TaskType::Evaluate);
        assert!(task.evaluator_types.is_empty());
        assert_eq!(
            task.payload.as_ref().and_then(|payload| payload.get("priority")),
            Some(&json!("backfill"))
        );
    }

    #[test]
    fn evaluator_types_are_deduplicated_in_first_seen_order() {
        let task = Task::evaluate(
            ConversationId("conv-002".to_string()),
            vec![
                "tool_call".to_string(),
                "heuristic".to_string(),
                "tool_call".to_string(),
            ],
        );

        assert_eq!(task.evaluator_types, vec!["tool_call", "heuristic"]);
    }
}
