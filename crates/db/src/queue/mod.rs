//! Storage-backed implementations of the queue, cache and pub/sub ports.

pub mod memory;
pub mod pubsub;
pub mod sql;

pub use memory::InMemoryTaskQueue;
pub use pubsub::{PubSubHub, PublishedMessage};
pub use sql::SqlTaskQueue;
