use chrono::Utc;

use triage_core::domain::conversation::{Feedback, FeedbackSubmission};

use super::{encode_json, format_timestamp, FeedbackRepository, RepositoryError};
use crate::DbPool;

pub struct SqlFeedbackRepository {
    pool: DbPool,
}

impl SqlFeedbackRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// `ops_review_json` and `labels_json` column values for `feedback`.
pub(crate) fn feedback_columns(
    feedback: &Feedback,
) -> Result<(Option<String>, String), RepositoryError> {
    let ops_review_json = feedback
        .ops_review
        .as_ref()
        .map(|review| encode_json("ops_review_json", review))
        .transpose()?;
    let labels_json = encode_json("labels_json", &feedback.annotations)?;
    Ok((ops_review_json, labels_json))
}

#[async_trait::async_trait]
impl FeedbackRepository for SqlFeedbackRepository {
    async fn add(&self, submission: FeedbackSubmission) -> Result<(), RepositoryError> {
        let (ops_review_json, labels_json) = feedback_columns(&submission.feedback)?;

        let inserted = sqlx::query(
            "INSERT INTO feedback (conversation_id, user_rating, ops_review_json, labels_json, created_at)
             SELECT ?1, ?2, ?3, ?4, ?5
             WHERE EXISTS (SELECT 1 FROM conversations WHERE conversation_id = ?1)",
        )
        .bind(&submission.conversation_id.0)
        .bind(submission.feedback.user_rating.map(i64::from))
        .bind(ops_review_json)
        .bind(labels_json)
        .bind(format_timestamp(&Utc::now()))
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(RepositoryError::NotFound {
                entity: "conversation",
                id: submission.conversation_id.0,
            });
        }
        Ok(())
    }
}
