pub mod agreement;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod queue;
pub mod routing;

pub use agreement::{AgreementAnalyzer, AgreementError, AnnotatorAgreement, EmptyAnnotationPolicy};
pub use dispatch::{DispatchError, TaskDispatcher, EVALUATIONS_QUEUE};
pub use domain::annotation::{Annotation, AnnotationCreate};
pub use domain::conversation::{
    Conversation, ConversationCreate, ConversationId, Feedback, FeedbackSubmission,
};
pub use domain::evaluation::{Evaluation, EvaluationId, Issue, IssueSeverity};
pub use domain::improvement::{
    EvaluatorCalibration, FailurePattern, FailurePatternFilter, StoredSuggestion, SuggestionId,
    SuggestionStatus,
};
pub use domain::task::{Task, TaskId, TaskType};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use queue::{
    expiry_after, ClaimedTask, KeyValueCache, LeaseId, LeasedTaskQueue, Publisher, QueueError,
    TaskQueue, MAX_VISIBILITY_TIMEOUT,
};
pub use routing::{ReviewPriority, RoutingDecision, RoutingEngine};
