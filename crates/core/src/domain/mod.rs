pub mod annotation;
pub mod conversation;
pub mod evaluation;
pub mod improvement;
pub mod task;
