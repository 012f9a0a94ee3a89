//! Inter-annotator agreement for one `(conversation, annotation type)` pair.
//!
//! The result depends only on the supplied annotations and their order, so
//! callers that need reproducible majority labels must pass annotations in a
//! fixed order (the repositories return newest first).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::annotation::Annotation;
use crate::domain::conversation::ConversationId;
use crate::errors::{ApplicationError, DomainError};

pub const DEFAULT_AGREEMENT_THRESHOLD: f64 = 0.8;

/// What to report when no annotations exist for the pair yet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyAnnotationPolicy {
    /// Score 1.0, empty majority label, no tiebreaker.
    #[default]
    AssumeAgreement,
    /// Refuse to compute and return `AgreementError::InsufficientData`.
    InsufficientData,
}

impl EmptyAnnotationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AssumeAgreement => "assume_agreement",
            Self::InsufficientData => "insufficient_data",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "assume_agreement" => Some(Self::AssumeAgreement),
            "insufficient_data" => Some(Self::InsufficientData),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnnotatorAgreement {
    pub conversation_id: ConversationId,
    pub annotation_type: String,
    pub annotators: Vec<String>,
    pub agreement_score: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub majority_label: String,
    pub needs_tiebreaker: bool,
    pub individual_annotations: Vec<Annotation>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AgreementError {
    #[error("no `{annotation_type}` annotations recorded for conversation `{conversation_id}`")]
    InsufficientData { conversation_id: ConversationId, annotation_type: String },
}

impl From<AgreementError> for DomainError {
    fn from(value: AgreementError) -> Self {
        DomainError::InsufficientData(value.to_string())
    }
}

impl From<AgreementError> for ApplicationError {
    fn from(value: AgreementError) -> Self {
        ApplicationError::Domain(value.into())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AgreementAnalyzer {
    threshold: f64,
    empty_policy: EmptyAnnotationPolicy,
}

impl Default for AgreementAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_AGREEMENT_THRESHOLD)
    }
}

impl AgreementAnalyzer {
    pub fn new(threshold: f64) -> Self {
        Self { threshold, empty_policy: EmptyAnnotationPolicy::default() }
    }

    pub fn with_empty_policy(mut self, empty_policy: EmptyAnnotationPolicy) -> Self {
        self.empty_policy = empty_policy;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn empty_policy(&self) -> EmptyAnnotationPolicy {
        self.empty_policy
    }

    /// Annotations belonging to other conversations or types are ignored.
    /// Majority ties go to the label encountered first in `annotations`.
    pub fn compute(
        &self,
        conversation_id: &ConversationId,
        annotation_type: &str,
        annotations: &[Annotation],
    ) -> Result<AnnotatorAgreement, AgreementError> {
        let relevant: Vec<Annotation> = annotations
            .iter()
            .filter(|annotation| {
                &annotation.conversation_id == conversation_id
                    && annotation.annotation_type == annotation_type
            })
            .cloned()
            .collect();

        if relevant.is_empty() && self.empty_policy == EmptyAnnotationPolicy::InsufficientData {
            return Err(AgreementError::InsufficientData {
                conversation_id: conversation_id.clone(),
                annotation_type: annotation_type.to_string(),
            });
        }

        let annotators = relevant.iter().map(|annotation| annotation.annotator_id.clone()).collect();

        // (label, count) in first-encountered order.
        let mut tally: Vec<(&str, usize)> = Vec::new();
        for annotation in &relevant {
            match tally.iter_mut().find(|(label, _)| *label == annotation.label) {
                Some((_, count)) => *count += 1,
                None => tally.push((annotation.label.as_str(), 1)),
            }
        }

        let mut majority: Option<(&str, usize)> = None;
        for &(label, count) in &tally {
            if majority.map_or(true, |(_, best)| count > best) {
                majority = Some((label, count));
            }
        }
        let (majority_label, majority_count) =
            majority.map(|(label, count)| (label.to_string(), count)).unwrap_or_default();

        let total = relevant.len();
        let agreement_score =
            if total <= 1 { 1.0 } else { majority_count as f64 / total as f64 };

        Ok(AnnotatorAgreement {
            conversation_id: conversation_id.clone(),
            annotation_type: annotation_type.to_string(),
            annotators,
            agreement_score,
            majority_label,
            needs_tiebreaker: agreement_score < self.threshold,
            individual_annotations: relevant,
        })
    }
}
