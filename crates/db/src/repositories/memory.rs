use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use triage_core::domain::annotation::{Annotation, AnnotationCreate};
use triage_core::domain::conversation::{
    Conversation, ConversationCreate, ConversationId, Feedback, FeedbackSubmission,
};
use triage_core::domain::evaluation::{Evaluation, EvaluationId};
use triage_core::domain::improvement::{
    EvaluatorCalibration, FailurePattern, FailurePatternFilter, StoredSuggestion, SuggestionId,
    SuggestionStatus,
};

use super::{
    AnnotationRepository, CalibrationRepository, ConversationRepository, EvaluationFilter,
    EvaluationRepository, FailurePatternRepository, FeedbackRepository, RepositoryError,
    StatsRepository, SuggestionRepository, SystemStats,
};

#[derive(Default)]
struct Store {
    conversations: HashMap<String, Conversation>,
    conversation_order: Vec<String>,
    feedback: Vec<(ConversationId, Feedback)>,
    evaluations: Vec<Evaluation>,
    annotations: Vec<Annotation>,
    suggestions: Vec<StoredSuggestion>,
    patterns: Vec<FailurePattern>,
    calibrations: Vec<EvaluatorCalibration>,
}

/// Process-local implementation of every repository port, used by tests and
/// by the server when no database is wired in.
#[derive(Default)]
pub struct InMemoryRepository {
    store: RwLock<Store>,
}

fn window<T>(items: impl Iterator<Item = T>, limit: u32, offset: u32) -> Vec<T> {
    items.skip(offset as usize).take(limit as usize).collect()
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryRepository {
    async fn create(&self, input: ConversationCreate) -> Result<Conversation, RepositoryError> {
        let mut store = self.store.write().await;
        if store.conversations.contains_key(&input.conversation_id.0) {
            return Err(RepositoryError::Conflict {
                entity: "conversation",
                id: input.conversation_id.0,
            });
        }

        let now = Utc::now();
        let conversation = Conversation {
            conversation_id: input.conversation_id.clone(),
            agent_version: input.agent_version,
            turns: input.turns,
            metadata: input.metadata.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };

        if let Some(feedback) = input.feedback {
            store.feedback.push((input.conversation_id.clone(), feedback));
        }
        store.conversation_order.push(input.conversation_id.0.clone());
        store.conversations.insert(input.conversation_id.0, conversation.clone());
        Ok(conversation)
    }

    async fn find(&self, id: &ConversationId) -> Result<Option<Conversation>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store.conversations.get(&id.0).cloned())
    }

    async fn list(
        &self,
        agent_version: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let store = self.store.read().await;
        let newest_first = store
            .conversation_order
            .iter()
            .rev()
            .filter_map(|id| store.conversations.get(id))
            .filter(|conversation| {
                agent_version.map_or(true, |version| conversation.agent_version == version)
            })
            .cloned();
        Ok(window(newest_first, limit, offset))
    }
}

#[async_trait::async_trait]
impl EvaluationRepository for InMemoryRepository {
    async fn append(&self, evaluation: Evaluation) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        if store.evaluations.iter().any(|existing| existing.evaluation_id == evaluation.evaluation_id)
        {
            return Err(RepositoryError::Conflict {
                entity: "evaluation",
                id: evaluation.evaluation_id.0,
            });
        }
        store.evaluations.push(evaluation);
        Ok(())
    }

    async fn find(&self, id: &EvaluationId) -> Result<Option<Evaluation>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store.evaluations.iter().find(|evaluation| &evaluation.evaluation_id == id).cloned())
    }

    async fn latest_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Evaluation>, RepositoryError> {
        let store = self.store.read().await;
        // `max_by_key` keeps the last maximum, so equal timestamps resolve to
        // the most recent append.
        Ok(store
            .evaluations
            .iter()
            .filter(|evaluation| &evaluation.conversation_id == conversation_id)
            .max_by_key(|evaluation| evaluation.created_at)
            .cloned())
    }

    async fn list(
        &self,
        filter: &EvaluationFilter,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Evaluation>, RepositoryError> {
        let store = self.store.read().await;
        let mut matching: Vec<(usize, &Evaluation)> = store
            .evaluations
            .iter()
            .enumerate()
            .filter(|(_, evaluation)| filter.matches(evaluation))
            .collect();
        matching.sort_by(|(left_seq, left), (right_seq, right)| {
            right.created_at.cmp(&left.created_at).then(right_seq.cmp(left_seq))
        });
        Ok(window(matching.into_iter().map(|(_, evaluation)| evaluation.clone()), limit, offset))
    }
}

#[async_trait::async_trait]
impl AnnotationRepository for InMemoryRepository {
    async fn create(&self, input: AnnotationCreate) -> Result<Annotation, RepositoryError> {
        let annotation = input.into_annotation(Utc::now());
        let mut store = self.store.write().await;
        store.annotations.push(annotation.clone());
        Ok(annotation)
    }

    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
        annotation_type: Option<&str>,
    ) -> Result<Vec<Annotation>, RepositoryError> {
        let store = self.store.read().await;
        let mut matching: Vec<(usize, &Annotation)> = store
            .annotations
            .iter()
            .enumerate()
            .filter(|(_, annotation)| {
                &annotation.conversation_id == conversation_id
                    && annotation_type.map_or(true, |kind| annotation.annotation_type == kind)
            })
            .collect();
        matching.sort_by(|(left_seq, left), (right_seq, right)| {
            right.created_at.cmp(&left.created_at).then(right_seq.cmp(left_seq))
        });
        Ok(matching.into_iter().map(|(_, annotation)| annotation.clone()).collect())
    }
}

#[async_trait::async_trait]
impl FeedbackRepository for InMemoryRepository {
    async fn add(&self, submission: FeedbackSubmission) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        if !store.conversations.contains_key(&submission.conversation_id.0) {
            return Err(RepositoryError::NotFound {
                entity: "conversation",
                id: submission.conversation_id.0,
            });
        }
        store.feedback.push((submission.conversation_id, submission.feedback));
        Ok(())
    }
}

#[async_trait::async_trait]
impl SuggestionRepository for InMemoryRepository {
    async fn record(&self, suggestion: StoredSuggestion) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        if store.suggestions.iter().any(|existing| existing.suggestion_id == suggestion.suggestion_id)
        {
            return Err(RepositoryError::Conflict {
                entity: "suggestion",
                id: suggestion.suggestion_id.0,
            });
        }
        store.suggestions.push(suggestion);
        Ok(())
    }

    async fn pending(
        &self,
        min_confidence: f64,
        suggestion_type: Option<&str>,
    ) -> Result<Vec<StoredSuggestion>, RepositoryError> {
        let store = self.store.read().await;
        let mut matching: Vec<StoredSuggestion> = store
            .suggestions
            .iter()
            .filter(|suggestion| {
                suggestion.status == SuggestionStatus::Pending
                    && suggestion.confidence >= min_confidence
                    && suggestion_type.map_or(true, |kind| suggestion.suggestion_type == kind)
            })
            .cloned()
            .collect();
        // Stable sort keeps insertion order among equal confidences.
        matching.sort_by(|left, right| right.confidence.total_cmp(&left.confidence));
        Ok(matching)
    }

    async fn mark_implemented(
        &self,
        id: &SuggestionId,
        before_metrics: Option<Value>,
        now: DateTime<Utc>,
    ) -> Result<StoredSuggestion, RepositoryError> {
        let mut store = self.store.write().await;
        let suggestion = store
            .suggestions
            .iter_mut()
            .find(|suggestion| &suggestion.suggestion_id == id)
            .ok_or_else(|| RepositoryError::NotFound { entity: "suggestion", id: id.0.clone() })?;
        suggestion.mark_implemented(before_metrics, now);
        Ok(suggestion.clone())
    }
}

#[async_trait::async_trait]
impl FailurePatternRepository for InMemoryRepository {
    async fn record(&self, pattern: FailurePattern) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        if store.patterns.iter().any(|existing| existing.pattern_id == pattern.pattern_id) {
            return Err(RepositoryError::Conflict {
                entity: "failure pattern",
                id: pattern.pattern_id,
            });
        }
        store.patterns.push(pattern);
        Ok(())
    }

    async fn list(
        &self,
        filter: &FailurePatternFilter,
        limit: u32,
    ) -> Result<Vec<FailurePattern>, RepositoryError> {
        let store = self.store.read().await;
        let mut matching: Vec<&FailurePattern> =
            store.patterns.iter().filter(|pattern| filter.matches(pattern)).collect();
        matching.sort_by(|left, right| right.occurrence_count.cmp(&left.occurrence_count));
        Ok(window(matching.into_iter().cloned(), limit, 0))
    }
}

#[async_trait::async_trait]
impl CalibrationRepository for InMemoryRepository {
    async fn record(&self, calibration: EvaluatorCalibration) -> Result<(), RepositoryError> {
        self.store.write().await.calibrations.push(calibration);
        Ok(())
    }

    async fn list(
        &self,
        evaluator_type: Option<&str>,
    ) -> Result<Vec<EvaluatorCalibration>, RepositoryError> {
        let store = self.store.read().await;
        let mut matching: Vec<(usize, &EvaluatorCalibration)> = store
            .calibrations
            .iter()
            .enumerate()
            .filter(|(_, calibration)| {
                evaluator_type.map_or(true, |kind| calibration.evaluator_type == kind)
            })
            .collect();
        matching.sort_by(|(left_seq, left), (right_seq, right)| {
            right.created_at.cmp(&left.created_at).then(right_seq.cmp(left_seq))
        });
        Ok(matching.into_iter().map(|(_, calibration)| calibration.clone()).collect())
    }
}

#[async_trait::async_trait]
impl StatsRepository for InMemoryRepository {
    async fn stats(&self, now: DateTime<Utc>) -> Result<SystemStats, RepositoryError> {
        let store = self.store.read().await;
        let cutoff = now - Duration::hours(24);

        let average = |values: Vec<f64>| {
            (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
        };
        let ratings: Vec<f64> = store
            .feedback
            .iter()
            .filter_map(|(_, feedback)| feedback.user_rating.map(f64::from))
            .collect();

        Ok(SystemStats {
            total_conversations: store.conversations.len() as u64,
            total_evaluations: store.evaluations.len() as u64,
            total_annotations: store.annotations.len() as u64,
            average_quality_score: average(
                store.evaluations.iter().map(|evaluation| evaluation.overall_score).collect(),
            ),
            average_user_rating: average(ratings),
            open_issues_count: store
                .evaluations
                .iter()
                .filter(|evaluation| !evaluation.issues_detected.is_empty())
                .count() as u64,
            pending_suggestions_count: store
                .suggestions
                .iter()
                .filter(|suggestion| suggestion.status == SuggestionStatus::Pending)
                .count() as u64,
            evaluations_last_24h: store
                .evaluations
                .iter()
                .filter(|evaluation| evaluation.created_at >= cutoff)
                .count() as u64,
        })
    }
}
