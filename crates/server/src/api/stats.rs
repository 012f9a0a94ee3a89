use std::time::Duration;

use axum::{extract::State, Json};
use chrono::Utc;
use tracing::{debug, warn};
use triage_core::queue::{get_json, set_json};
use triage_db::SystemStats;

use super::{ApiError, AppState, CorrelationId};

pub const STATS_CACHE_KEY: &str = "stats:system";
pub const STATS_CACHE_TTL: Duration = Duration::from_secs(5);

/// Aggregates are cached briefly; every write through the API drops the
/// cached copy.
pub async fn system_stats(
    State(state): State<AppState>,
    correlation: CorrelationId,
) -> Result<Json<SystemStats>, ApiError> {
    match get_json::<_, SystemStats>(state.cache.as_ref(), STATS_CACHE_KEY).await {
        Ok(Some(cached)) => return Ok(Json(cached)),
        Ok(None) => {}
        Err(error) => warn!(
            event_name = "stats.cache.read_failed",
            correlation_id = %correlation.as_str(),
            error = %error,
            "stats cache unreadable; recomputing"
        ),
    }

    let stats =
        state.stores.stats.stats(Utc::now()).await.map_err(|error| correlation.reject(error))?;

    if let Err(error) =
        set_json(state.cache.as_ref(), STATS_CACHE_KEY, &stats, Some(STATS_CACHE_TTL)).await
    {
        warn!(
            event_name = "stats.cache.write_failed",
            correlation_id = %correlation.as_str(),
            error = %error,
            "stats not cached"
        );
    }

    Ok(Json(stats))
}

pub(crate) async fn invalidate(state: &AppState, correlation: &CorrelationId) {
    match state.cache.delete(STATS_CACHE_KEY).await {
        Ok(()) => debug!(
            event_name = "stats.cache.invalidated",
            correlation_id = %correlation.as_str(),
            "stats cache invalidated"
        ),
        Err(error) => warn!(
            event_name = "stats.cache.invalidate_failed",
            correlation_id = %correlation.as_str(),
            error = %error,
            "stats cache not invalidated"
        ),
    }
}
