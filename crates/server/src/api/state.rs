use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;
use tokio::task::JoinHandle;
use triage_core::config::AppConfig;
use triage_core::{
    AgreementAnalyzer, KeyValueCache, LeasedTaskQueue, Publisher, RoutingEngine, TaskDispatcher,
};
use triage_db::repositories::{
    SqlAnnotationRepository, SqlConversationRepository, SqlEvaluationRepository,
    SqlFeedbackRepository, SqlImprovementRepository, SqlStatsRepository,
};
use triage_db::{
    AnnotationRepository, CalibrationRepository, ConversationRepository, DbPool,
    EvaluationRepository, FailurePatternRepository, FeedbackRepository, InMemoryRepository,
    StatsRepository, SuggestionRepository,
};

use crate::dispatch_worker::{AutoDispatcher, AUTO_DISPATCH_BACKLOG};
use crate::health::HealthState;

/// Repository handles the handlers read and write through.
#[derive(Clone)]
pub struct Stores {
    pub conversations: Arc<dyn ConversationRepository>,
    pub evaluations: Arc<dyn EvaluationRepository>,
    pub annotations: Arc<dyn AnnotationRepository>,
    pub feedback: Arc<dyn FeedbackRepository>,
    pub suggestions: Arc<dyn SuggestionRepository>,
    pub patterns: Arc<dyn FailurePatternRepository>,
    pub calibrations: Arc<dyn CalibrationRepository>,
    pub stats: Arc<dyn StatsRepository>,
}

impl Stores {
    pub fn sql(pool: DbPool) -> Self {
        let improvements = Arc::new(SqlImprovementRepository::new(pool.clone()));
        Self {
            conversations: Arc::new(SqlConversationRepository::new(pool.clone())),
            evaluations: Arc::new(SqlEvaluationRepository::new(pool.clone())),
            annotations: Arc::new(SqlAnnotationRepository::new(pool.clone())),
            feedback: Arc::new(SqlFeedbackRepository::new(pool.clone())),
            suggestions: improvements.clone(),
            patterns: improvements.clone(),
            calibrations: improvements,
            stats: Arc::new(SqlStatsRepository::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        let repository = Arc::new(InMemoryRepository::default());
        Self {
            conversations: repository.clone(),
            evaluations: repository.clone(),
            annotations: repository.clone(),
            feedback: repository.clone(),
            suggestions: repository.clone(),
            patterns: repository.clone(),
            calibrations: repository.clone(),
            stats: repository,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub queue: Arc<dyn LeasedTaskQueue>,
    pub cache: Arc<dyn KeyValueCache>,
    pub publisher: Arc<dyn Publisher>,
    pub dispatcher: TaskDispatcher,
    pub auto_dispatcher: AutoDispatcher,
    pub analyzer: AgreementAnalyzer,
    pub routing: RoutingEngine,
    pub visibility_timeout: Duration,
    pub db_pool: Option<DbPool>,
}

impl AppState {
    /// Wires handlers to `queue` and spawns the auto-dispatch worker. The
    /// returned handle finishes once every clone of the state is dropped.
    pub fn new<Q>(
        config: &AppConfig,
        stores: Stores,
        queue: Arc<Q>,
        db_pool: Option<DbPool>,
    ) -> (Self, JoinHandle<()>)
    where
        Q: LeasedTaskQueue + KeyValueCache + Publisher + 'static,
    {
        let dispatcher = TaskDispatcher::new(queue.clone())
            .with_default_evaluator_types(config.evaluation.default_evaluator_types.clone());
        let (auto_dispatcher, worker) =
            AutoDispatcher::spawn(dispatcher.clone(), AUTO_DISPATCH_BACKLOG);

        let state = Self {
            stores,
            queue: queue.clone(),
            cache: queue.clone(),
            publisher: queue,
            dispatcher,
            auto_dispatcher,
            analyzer: AgreementAnalyzer::new(config.evaluation.agreement_threshold)
                .with_empty_policy(config.evaluation.empty_annotations),
            routing: RoutingEngine::new(config.evaluation.low_score_threshold),
            visibility_timeout: Duration::from_secs(config.queue.visibility_timeout_secs),
            db_pool,
        };
        (state, worker)
    }
}

impl FromRef<AppState> for HealthState {
    fn from_ref(state: &AppState) -> Self {
        HealthState::new(
            state.db_pool.clone(),
            state.queue.clone(),
            state.dispatcher.queue_name().to_string(),
            state.auto_dispatcher.clone(),
        )
    }
}
