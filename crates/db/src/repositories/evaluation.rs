use sqlx::{sqlite::SqliteRow, Row};

use triage_core::domain::conversation::ConversationId;
use triage_core::domain::evaluation::{Evaluation, EvaluationId};

use super::{
    encode_json, format_timestamp, is_unique_violation, parse_json, parse_timestamp, parse_u64,
    EvaluationFilter, EvaluationRepository, RepositoryError,
};
use crate::DbPool;

const SELECT_EVALUATION: &str = "SELECT
        evaluation_id,
        conversation_id,
        overall_score,
        response_quality_score,
        tool_accuracy_score,
        coherence_score,
        tool_evaluation_json,
        issues_json,
        suggestions_json,
        evaluator_version,
        duration_ms,
        created_at
     FROM evaluations";

pub struct SqlEvaluationRepository {
    pool: DbPool,
}

impl SqlEvaluationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl EvaluationRepository for SqlEvaluationRepository {
    async fn append(&self, evaluation: Evaluation) -> Result<(), RepositoryError> {
        let duration_ms = i64::try_from(evaluation.duration_ms).map_err(|_| {
            RepositoryError::Decode(format!(
                "duration_ms is out of range for storage: {}",
                evaluation.duration_ms
            ))
        })?;

        let inserted = sqlx::query(
            "INSERT INTO evaluations (
                evaluation_id,
                conversation_id,
                overall_score,
                response_quality_score,
                tool_accuracy_score,
                coherence_score,
                tool_evaluation_json,
                issues_json,
                suggestions_json,
                evaluator_version,
                duration_ms,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&evaluation.evaluation_id.0)
        .bind(&evaluation.conversation_id.0)
        .bind(evaluation.overall_score)
        .bind(evaluation.response_quality_score)
        .bind(evaluation.tool_accuracy_score)
        .bind(evaluation.coherence_score)
        .bind(encode_json("tool_evaluation_json", &evaluation.tool_evaluation)?)
        .bind(encode_json("issues_json", &evaluation.issues_detected)?)
        .bind(encode_json("suggestions_json", &evaluation.improvement_suggestions)?)
        .bind(&evaluation.evaluator_version)
        .bind(duration_ms)
        .bind(format_timestamp(&evaluation.created_at))
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(()),
            Err(error) if is_unique_violation(&error) => Err(RepositoryError::Conflict {
                entity: "evaluation",
                id: evaluation.evaluation_id.0,
            }),
            Err(error) => Err(error.into()),
        }
    }

    async fn find(&self, id: &EvaluationId) -> Result<Option<Evaluation>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_EVALUATION} WHERE evaluation_id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(evaluation_from_row).transpose()
    }

    async fn latest_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Evaluation>, RepositoryError> {
        let row = sqlx::query(&format!(
            "{SELECT_EVALUATION}
             WHERE conversation_id = ?
             ORDER BY created_at DESC, seq DESC
             LIMIT 1"
        ))
        .bind(&conversation_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(evaluation_from_row).transpose()
    }

    async fn list(
        &self,
        filter: &EvaluationFilter,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Evaluation>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_EVALUATION}
             WHERE (?1 IS NULL OR conversation_id = ?1)
               AND (?2 IS NULL OR overall_score >= ?2)
               AND (?3 IS NULL OR overall_score <= ?3)
             ORDER BY created_at DESC, seq DESC
             LIMIT ?4 OFFSET ?5"
        ))
        .bind(filter.conversation_id.as_ref().map(|id| id.0.as_str()))
        .bind(filter.min_score)
        .bind(filter.max_score)
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(evaluation_from_row).collect()
    }
}

fn evaluation_from_row(row: SqliteRow) -> Result<Evaluation, RepositoryError> {
    let tool_evaluation_json: String = row.try_get("tool_evaluation_json")?;
    let issues_json: String = row.try_get("issues_json")?;
    let suggestions_json: String = row.try_get("suggestions_json")?;

    Ok(Evaluation {
        evaluation_id: EvaluationId(row.try_get("evaluation_id")?),
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        overall_score: row.try_get("overall_score")?,
        response_quality_score: row.try_get("response_quality_score")?,
        tool_accuracy_score: row.try_get("tool_accuracy_score")?,
        coherence_score: row.try_get("coherence_score")?,
        tool_evaluation: parse_json("tool_evaluation_json", &tool_evaluation_json)?,
        issues_detected: parse_json("issues_json", &issues_json)?,
        improvement_suggestions: parse_json("suggestions_json", &suggestions_json)?,
        evaluator_version: row.try_get("evaluator_version")?,
        duration_ms: parse_u64("duration_ms", row.try_get("duration_ms")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
