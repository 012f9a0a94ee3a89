pub mod connection;
pub mod migrations;
pub mod queue;
pub mod repositories;

pub use connection::{connect, connect_with_config, connect_with_settings, DbPool};
pub use queue::{InMemoryTaskQueue, PubSubHub, SqlTaskQueue};
pub use repositories::{
    AnnotationRepository, CalibrationRepository, ConversationRepository, EvaluationFilter,
    EvaluationRepository, FailurePatternRepository, FeedbackRepository, InMemoryRepository,
    RepositoryError, StatsRepository, SuggestionRepository, SystemStats,
};
