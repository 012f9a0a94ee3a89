use chrono::{DateTime, Duration, Utc};
use sqlx::Row;

use super::{format_timestamp, parse_u64, RepositoryError, StatsRepository, SystemStats};
use crate::DbPool;

pub struct SqlStatsRepository {
    pool: DbPool,
}

impl SqlStatsRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl StatsRepository for SqlStatsRepository {
    async fn stats(&self, now: DateTime<Utc>) -> Result<SystemStats, RepositoryError> {
        let cutoff = format_timestamp(&(now - Duration::hours(24)));

        let row = sqlx::query(
            "SELECT
                (SELECT COUNT(*) FROM conversations) AS total_conversations,
                (SELECT COUNT(*) FROM evaluations) AS total_evaluations,
                (SELECT COUNT(*) FROM annotations) AS total_annotations,
                (SELECT AVG(overall_score) FROM evaluations) AS average_quality_score,
                (SELECT AVG(user_rating) FROM feedback WHERE user_rating IS NOT NULL)
                    AS average_user_rating,
                (SELECT COUNT(*) FROM evaluations WHERE json_array_length(issues_json) > 0)
                    AS open_issues_count,
                (SELECT COUNT(*) FROM improvement_suggestions WHERE status = 'pending')
                    AS pending_suggestions_count,
                (SELECT COUNT(*) FROM evaluations WHERE created_at >= ?) AS evaluations_last_24h",
        )
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await?;

        Ok(SystemStats {
            total_conversations: parse_u64(
                "total_conversations",
                row.try_get("total_conversations")?,
            )?,
            total_evaluations: parse_u64("total_evaluations", row.try_get("total_evaluations")?)?,
            total_annotations: parse_u64("total_annotations", row.try_get("total_annotations")?)?,
            average_quality_score: row.try_get("average_quality_score")?,
            average_user_rating: row.try_get("average_user_rating")?,
            open_issues_count: parse_u64("open_issues_count", row.try_get("open_issues_count")?)?,
            pending_suggestions_count: parse_u64(
                "pending_suggestions_count",
                row.try_get("pending_suggestions_count")?,
            )?,
            evaluations_last_24h: parse_u64(
                "evaluations_last_24h",
                row.try_get("evaluations_last_24h")?,
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::SqlStatsRepository;
    use triage_core::domain::improvement::SuggestionStatus;

    use crate::repositories::test_support::{
        annotation, at, conversation, evaluation, setup_pool, suggestion,
    };
    use crate::repositories::{
        AnnotationRepository, ConversationRepository, EvaluationRepository,
        SqlAnnotationRepository, SqlConversationRepository, SqlEvaluationRepository,
        SqlImprovementRepository, StatsRepository, SuggestionRepository,
    };

    #[tokio::test]
    async fn empty_store_reports_zero_counts_and_no_averages() {
        let pool = setup_pool().await;
        let stats = SqlStatsRepository::new(pool).stats(at(0)).await.expect("stats");

        assert_eq!(stats.total_conversations, 0);
        assert_eq!(stats.pending_suggestions_count, 0);
        assert_eq!(stats.average_quality_score, None);
        assert_eq!(stats.average_user_rating, None);
    }

    #[tokio::test]
    async fn stats_aggregate_across_tables() {
        let pool = setup_pool().await;
        let conversations = SqlConversationRepository::new(pool.clone());
        let evaluations = SqlEvaluationRepository::new(pool.clone());
        let annotations = SqlAnnotationRepository::new(pool.clone());

        conversations.create(conversation("conv-1", "v1")).await.expect("create");
        conversations.create(conversation("conv-2", "v1")).await.expect("create");
        evaluations.append(evaluation("e-old", "conv-1", 0.2, 0)).await.expect("append");
        evaluations
            .append(evaluation("e-new", "conv-2", 0.8, 60 * 30))
            .await
            .expect("append");
        annotations.create(annotation("conv-1", "ann-a", "bad")).await.expect("create");
        let improvements = SqlImprovementRepository::new(pool.clone());
        improvements.record(suggestion("s-open", "prompt", 0.8)).await.expect("record");
        let mut done = suggestion("s-done", "prompt", 0.9);
        done.status = SuggestionStatus::Implemented;
        improvements.record(done).await.expect("record");

        let now = at(60 * 30) + Duration::minutes(5);
        let stats = SqlStatsRepository::new(pool).stats(now).await.expect("stats");

        assert_eq!(stats.total_conversations, 2);
        assert_eq!(stats.total_evaluations, 2);
        assert_eq!(stats.total_annotations, 1);
        assert!((stats.average_quality_score.unwrap_or_default() - 0.5).abs() < 1e-9);
        assert_eq!(stats.average_user_rating, Some(4.0));
        assert_eq!(stats.open_issues_count, 1);
        assert_eq!(stats.pending_suggestions_count, 1);
        assert_eq!(stats.evaluations_last_24h, 1);
    }
}
