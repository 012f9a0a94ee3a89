use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row};

use triage_core::domain::evaluation::IssueSeverity;
use triage_core::domain::improvement::{
    EvaluatorCalibration, FailurePattern, FailurePatternFilter, StoredSuggestion, SuggestionId,
    SuggestionStatus,
};

use super::{
    encode_json, format_timestamp, is_unique_violation, parse_json, parse_optional_timestamp,
    parse_timestamp, parse_u32, CalibrationRepository, FailurePatternRepository, RepositoryError,
    SuggestionRepository,
};
use crate::DbPool;

const SUGGESTION_COLUMNS: &str = "suggestion_id, suggestion_type, suggestion, rationale, confidence,
    pattern_detected_json, affected_conversations_json, frequency, status, implemented_at,
    impact_measured, before_metrics_json, after_metrics_json, created_at, updated_at";

const PATTERN_COLUMNS: &str = "pattern_id, pattern_type, description, severity, first_seen,
    last_seen, occurrence_count, affected_versions_json, example_conversations_json, resolved,
    resolution_notes, related_suggestion_id, created_at, updated_at";

const CALIBRATION_COLUMNS: &str = "evaluator_type, evaluator_version, precision, recall, f1_score,
    correlation_with_human, calibration_samples, false_positive_rate, false_negative_rate,
    missed_patterns_json, created_at, updated_at";

/// Failure patterns, improvement suggestions and evaluator calibration,
/// all written by the analysis jobs and read back over the API.
pub struct SqlImprovementRepository {
    pool: DbPool,
}

impl SqlImprovementRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SuggestionRepository for SqlImprovementRepository {
    async fn record(&self, suggestion: StoredSuggestion) -> Result<(), RepositoryError> {
        let before_metrics_json = suggestion
            .before_metrics
            .as_ref()
            .map(|metrics| encode_json("before_metrics_json", metrics))
            .transpose()?;
        let after_metrics_json = suggestion
            .after_metrics
            .as_ref()
            .map(|metrics| encode_json("after_metrics_json", metrics))
            .transpose()?;

        let inserted = sqlx::query(&format!(
            "INSERT INTO improvement_suggestions ({SUGGESTION_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&suggestion.suggestion_id.0)
        .bind(&suggestion.suggestion_type)
        .bind(&suggestion.suggestion)
        .bind(&suggestion.rationale)
        .bind(suggestion.confidence)
        .bind(encode_json("pattern_detected_json", &suggestion.pattern_detected)?)
        .bind(encode_json("affected_conversations_json", &suggestion.affected_conversations)?)
        .bind(i64::from(suggestion.frequency))
        .bind(suggestion.status.as_str())
        .bind(suggestion.implemented_at.as_ref().map(format_timestamp))
        .bind(suggestion.impact_measured)
        .bind(before_metrics_json)
        .bind(after_metrics_json)
        .bind(format_timestamp(&suggestion.created_at))
        .bind(format_timestamp(&suggestion.updated_at))
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(()),
            Err(error) if is_unique_violation(&error) => Err(RepositoryError::Conflict {
                entity: "suggestion",
                id: suggestion.suggestion_id.0,
            }),
            Err(error) => Err(error.into()),
        }
    }

    async fn pending(
        &self,
        min_confidence: f64,
        suggestion_type: Option<&str>,
    ) -> Result<Vec<StoredSuggestion>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SUGGESTION_COLUMNS}
             FROM improvement_suggestions
             WHERE status = 'pending'
               AND confidence >= ?1
               AND (?2 IS NULL OR suggestion_type = ?2)
             ORDER BY confidence DESC, seq ASC"
        ))
        .bind(min_confidence)
        .bind(suggestion_type)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(suggestion_from_row).collect()
    }

    async fn mark_implemented(
        &self,
        id: &SuggestionId,
        before_metrics: Option<Value>,
        now: DateTime<Utc>,
    ) -> Result<StoredSuggestion, RepositoryError> {
        let before_metrics_json = before_metrics
            .as_ref()
            .map(|metrics| encode_json("before_metrics_json", metrics))
            .transpose()?;
        let stamp = format_timestamp(&now);

        let row = sqlx::query(&format!(
            "UPDATE improvement_suggestions
             SET status = ?1, implemented_at = ?2, before_metrics_json = ?3, updated_at = ?2
             WHERE suggestion_id = ?4
             RETURNING {SUGGESTION_COLUMNS}"
        ))
        .bind(SuggestionStatus::Implemented.as_str())
        .bind(&stamp)
        .bind(before_metrics_json)
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => suggestion_from_row(row),
            None => Err(RepositoryError::NotFound { entity: "suggestion", id: id.0.clone() }),
        }
    }
}

#[async_trait::async_trait]
impl FailurePatternRepository for SqlImprovementRepository {
    async fn record(&self, pattern: FailurePattern) -> Result<(), RepositoryError> {
        let inserted = sqlx::query(&format!(
            "INSERT INTO failure_patterns ({PATTERN_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&pattern.pattern_id)
        .bind(&pattern.pattern_type)
        .bind(&pattern.description)
        .bind(pattern.severity.as_str())
        .bind(format_timestamp(&pattern.first_seen))
        .bind(format_timestamp(&pattern.last_seen))
        .bind(i64::from(pattern.occurrence_count))
        .bind(encode_json("affected_versions_json", &pattern.affected_versions)?)
        .bind(encode_json("example_conversations_json", &pattern.example_conversations)?)
        .bind(pattern.resolved)
        .bind(pattern.resolution_notes.as_deref())
        .bind(pattern.related_suggestion_id.as_ref().map(|id| id.0.as_str()))
        .bind(format_timestamp(&pattern.created_at))
        .bind(format_timestamp(&pattern.updated_at))
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(()),
            Err(error) if is_unique_violation(&error) => Err(RepositoryError::Conflict {
                entity: "failure pattern",
                id: pattern.pattern_id,
            }),
            Err(error) => Err(error.into()),
        }
    }

    async fn list(
        &self,
        filter: &FailurePatternFilter,
        limit: u32,
    ) -> Result<Vec<FailurePattern>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {PATTERN_COLUMNS}
             FROM failure_patterns
             WHERE (?1 IS NULL OR resolved = ?1)
               AND (?2 IS NULL OR severity = ?2)
             ORDER BY occurrence_count DESC, seq ASC
             LIMIT ?3"
        ))
        .bind(filter.resolved)
        .bind(filter.severity.map(|severity| severity.as_str()))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(pattern_from_row).collect()
    }
}

#[async_trait::async_trait]
impl CalibrationRepository for SqlImprovementRepository {
    async fn record(&self, calibration: EvaluatorCalibration) -> Result<(), RepositoryError> {
        sqlx::query(&format!(
            "INSERT INTO evaluator_calibration ({CALIBRATION_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&calibration.evaluator_type)
        .bind(calibration.evaluator_version.as_deref())
        .bind(calibration.precision)
        .bind(calibration.recall)
        .bind(calibration.f1_score)
        .bind(calibration.correlation_with_human)
        .bind(i64::from(calibration.calibration_samples))
        .bind(calibration.false_positive_rate)
        .bind(calibration.false_negative_rate)
        .bind(encode_json("missed_patterns_json", &calibration.missed_patterns)?)
        .bind(format_timestamp(&calibration.created_at))
        .bind(format_timestamp(&calibration.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(
        &self,
        evaluator_type: Option<&str>,
    ) -> Result<Vec<EvaluatorCalibration>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {CALIBRATION_COLUMNS}
             FROM evaluator_calibration
             WHERE (?1 IS NULL OR evaluator_type = ?1)
             ORDER BY created_at DESC, seq DESC"
        ))
        .bind(evaluator_type)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(calibration_from_row).collect()
    }
}

fn optional_json(column: &str, value: Option<String>) -> Result<Option<Value>, RepositoryError> {
    value.map(|value| parse_json(column, &value)).transpose()
}

fn suggestion_from_row(row: SqliteRow) -> Result<StoredSuggestion, RepositoryError> {
    let status: String = row.try_get("status")?;
    let pattern_detected_json: String = row.try_get("pattern_detected_json")?;
    let affected_conversations_json: String = row.try_get("affected_conversations_json")?;

    Ok(StoredSuggestion {
        suggestion_id: SuggestionId(row.try_get("suggestion_id")?),
        suggestion_type: row.try_get("suggestion_type")?,
        suggestion: row.try_get("suggestion")?,
        rationale: row.try_get("rationale")?,
        confidence: row.try_get("confidence")?,
        pattern_detected: parse_json("pattern_detected_json", &pattern_detected_json)?,
        affected_conversations: parse_json(
            "affected_conversations_json",
            &affected_conversations_json,
        )?,
        frequency: parse_u32("frequency", row.try_get("frequency")?)?,
        status: SuggestionStatus::parse(&status).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown suggestion status `{status}`"))
        })?,
        implemented_at: parse_optional_timestamp("implemented_at", row.try_get("implemented_at")?)?,
        impact_measured: row.try_get("impact_measured")?,
        before_metrics: optional_json("before_metrics_json", row.try_get("before_metrics_json")?)?,
        after_metrics: optional_json("after_metrics_json", row.try_get("after_metrics_json")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn pattern_from_row(row: SqliteRow) -> Result<FailurePattern, RepositoryError> {
    let severity: String = row.try_get("severity")?;
    let affected_versions_json: String = row.try_get("affected_versions_json")?;
    let example_conversations_json: String = row.try_get("example_conversations_json")?;
    let related_suggestion_id: Option<String> = row.try_get("related_suggestion_id")?;

    Ok(FailurePattern {
        pattern_id: row.try_get("pattern_id")?,
        pattern_type: row.try_get("pattern_type")?,
        description: row.try_get("description")?,
        severity: IssueSeverity::parse(&severity)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown severity `{severity}`")))?,
        first_seen: parse_timestamp("first_seen", row.try_get("first_seen")?)?,
        last_seen: parse_timestamp("last_seen", row.try_get("last_seen")?)?,
        occurrence_count: parse_u32("occurrence_count", row.try_get("occurrence_count")?)?,
        affected_versions: parse_json("affected_versions_json", &affected_versions_json)?,
        example_conversations: parse_json(
            "example_conversations_json",
            &example_conversations_json,
        )?,
        resolved: row.try_get("resolved")?,
        resolution_notes: row.try_get("resolution_notes")?,
        related_suggestion_id: related_suggestion_id.map(SuggestionId),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn calibration_from_row(row: SqliteRow) -> Result<EvaluatorCalibration, RepositoryError> {
    let missed_patterns_json: String = row.try_get("missed_patterns_json")?;

    Ok(EvaluatorCalibration {
        evaluator_type: row.try_get("evaluator_type")?,
        evaluator_version: row.try_get("evaluator_version")?,
        precision: row.try_get("precision")?,
        recall: row.try_get("recall")?,
        f1_score: row.try_get("f1_score")?,
        correlation_with_human: row.try_get("correlation_with_human")?,
        calibration_samples: parse_u32("calibration_samples", row.try_get("calibration_samples")?)?,
        false_positive_rate: row.try_get("false_positive_rate")?,
        false_negative_rate: row.try_get("false_negative_rate")?,
        missed_patterns: parse_json("missed_patterns_json", &missed_patterns_json)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
