use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use triage_core::domain::conversation::{
    Conversation, ConversationCreate, ConversationId, ConversationMetadata, Feedback,
};

use super::feedback::feedback_columns;
use super::{
    encode_json, format_timestamp, is_unique_violation, parse_json, parse_timestamp,
    ConversationRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn create(&self, input: ConversationCreate) -> Result<Conversation, RepositoryError> {
        let now = Utc::now();
        let metadata = input.metadata.unwrap_or_default();
        let turns_json = encode_json("turns_json", &input.turns)?;
        let metadata_json = encode_json("metadata_json", &metadata)?;
        let stamp = format_timestamp(&now);

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO conversations (
                conversation_id,
                agent_version,
                turns_json,
                metadata_json,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&input.conversation_id.0)
        .bind(&input.agent_version)
        .bind(&turns_json)
        .bind(&metadata_json)
        .bind(&stamp)
        .bind(&stamp)
        .execute(&mut *tx)
        .await;

        if let Err(error) = inserted {
            if is_unique_violation(&error) {
                return Err(RepositoryError::Conflict {
                    entity: "conversation",
                    id: input.conversation_id.0,
                });
            }
            return Err(error.into());
        }

        if let Some(feedback) = input.feedback.as_ref() {
            insert_feedback(&mut tx, &input.conversation_id, feedback, &stamp).await?;
        }

        tx.commit().await?;

        Ok(Conversation {
            conversation_id: input.conversation_id,
            agent_version: input.agent_version,
            turns: input.turns,
            metadata,
            created_at: now,
            updated_at: now,
        })
    }

    async fn find(&self, id: &ConversationId) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT conversation_id, agent_version, turns_json, metadata_json, created_at, updated_at
             FROM conversations
             WHERE conversation_id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(conversation_from_row).transpose()
    }

    async fn list(
        &self,
        agent_version: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT conversation_id, agent_version, turns_json, metadata_json, created_at, updated_at
             FROM conversations
             WHERE (?1 IS NULL OR agent_version = ?1)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2 OFFSET ?3",
        )
        .bind(agent_version)
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(conversation_from_row).collect()
    }
}

async fn insert_feedback(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    conversation_id: &ConversationId,
    feedback: &Feedback,
    stamp: &str,
) -> Result<(), RepositoryError> {
    let (ops_review_json, labels_json) = feedback_columns(feedback)?;

    sqlx::query(
        "INSERT INTO feedback (conversation_id, user_rating, ops_review_json, labels_json, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&conversation_id.0)
    .bind(feedback.user_rating.map(i64::from))
    .bind(ops_review_json)
    .bind(labels_json)
    .bind(stamp)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn conversation_from_row(row: SqliteRow) -> Result<Conversation, RepositoryError> {
    let turns_json: String = row.try_get("turns_json")?;
    let metadata_json: String = row.try_get("metadata_json")?;

    Ok(Conversation {
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        agent_version: row.try_get("agent_version")?,
        turns: parse_json("turns_json", &turns_json)?,
        metadata: parse_json::<ConversationMetadata>("metadata_json", &metadata_json)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
