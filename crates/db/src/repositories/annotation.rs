use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use triage_core::domain::annotation::{Annotation, AnnotationCreate};
use triage_core::domain::conversation::ConversationId;

use super::{
    format_timestamp, parse_timestamp, parse_u32, AnnotationRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlAnnotationRepository {
    pool: DbPool,
}

impl SqlAnnotationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AnnotationRepository for SqlAnnotationRepository {
    async fn create(&self, input: AnnotationCreate) -> Result<Annotation, RepositoryError> {
        let annotation = input.into_annotation(Utc::now());

        sqlx::query(
            "INSERT INTO annotations (
                conversation_id,
                annotator_id,
                annotation_type,
                label,
                score,
                confidence,
                notes,
                time_spent_seconds,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&annotation.conversation_id.0)
        .bind(&annotation.annotator_id)
        .bind(&annotation.annotation_type)
        .bind(&annotation.label)
        .bind(annotation.score)
        .bind(annotation.confidence)
        .bind(annotation.notes.as_deref())
        .bind(annotation.time_spent_seconds.map(i64::from))
        .bind(format_timestamp(&annotation.created_at))
        .execute(&self.pool)
        .await?;

        Ok(annotation)
    }

    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
        annotation_type: Option<&str>,
    ) -> Result<Vec<Annotation>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                conversation_id,
                annotator_id,
                annotation_type,
                label,
                score,
                confidence,
                notes,
                time_spent_seconds,
                created_at
             FROM annotations
             WHERE conversation_id = ?1
               AND (?2 IS NULL OR annotation_type = ?2)
             ORDER BY created_at DESC, seq DESC",
        )
        .bind(&conversation_id.0)
        .bind(annotation_type)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(annotation_from_row).collect()
    }
}

fn annotation_from_row(row: SqliteRow) -> Result<Annotation, RepositoryError> {
    let time_spent_seconds: Option<i64> = row.try_get("time_spent_seconds")?;

    Ok(Annotation {
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        annotator_id: row.try_get("annotator_id")?,
        annotation_type: row.try_get("annotation_type")?,
        label: row.try_get("label")?,
        score: row.try_get("score")?,
        confidence: row.try_get("confidence")?,
        notes: row.try_get("notes")?,
        time_spent_seconds: time_spent_seconds
            .map(|value| parse_u32("time_spent_seconds", value))
            .transpose()?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
