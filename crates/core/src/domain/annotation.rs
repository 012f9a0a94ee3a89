use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::conversation::ConversationId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub conversation_id: ConversationId,
    pub annotator_id: String,
    pub annotation_type: String,
    pub label: String,
    pub score: Option<f64>,
    pub confidence: Option<f64>,
    pub notes: Option<String>,
    pub time_spent_seconds: Option<u32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnnotationCreate {
    pub conversation_id: ConversationId,
    pub annotator_id: String,
    pub annotation_type: String,
    pub label: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub time_spent_seconds: Option<u32>,
}

impl AnnotationCreate {
    pub fn validate(&self) -> Result<(), DomainError> {
        let required = [
            ("conversation_id", self.conversation_id.0.as_str()),
            ("annotator_id", self.annotator_id.as_str()),
            ("annotation_type", self.annotation_type.as_str()),
            ("label", self.label.as_str()),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(DomainError::InvariantViolation(format!("{field} must not be empty")));
            }
        }

        if let Some(confidence) = self.confidence {
            if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
                return Err(DomainError::InvariantViolation(format!(
                    "confidence must be within [0, 1], got {confidence}"
                )));
            }
        }

        Ok(())
    }

    pub fn into_annotation(self, created_at: DateTime<Utc>) -> Annotation {
        Annotation {
            conversation_id: self.conversation_id,
            annotator_id: self.annotator_id,
            annotation_type: self.annotation_type,
            label: self.label,
            score: self.score,
            confidence: self.confidence,
            notes: self.notes.filter(|notes| !notes.trim().is_empty()),
            time_spent_seconds: self.time_spent_seconds,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::AnnotationCreate;
    use crate::domain::conversation::ConversationId;

    fn input(label: &str) -> AnnotationCreate {
        AnnotationCreate {
            conversation_id: ConversationId("conv-7".to_string()),
            annotator_id: "ann-1".to_string(),
            annotation_type: "general_quality".to_string(),
            label: label.to_string(),
            score: Some(0.5),
            confidence: None,
            notes: Some("  ".to_string()),
            time_spent_seconds: Some(42),
        }
    }

    #[test]
    fn blank_label_is_rejected() {
        assert!(input(" ").validate().is_err());
    }

    #[test]
    fn confidence_outside_unit_interval_is_rejected() {
        let mut create = input("good");
        create.confidence = Some(1.5);
        assert!(create.validate().is_err());
    }

    #[test]
    fn blank_notes_are_not_stored() {
        let annotation = input("good").into_annotation(Utc::now());
        assert_eq!(annotation.notes, None);
        assert_eq!(annotation.time_spent_seconds, Some(42));
    }
}
