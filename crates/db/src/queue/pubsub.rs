use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use triage_core::queue::{Publisher, QueueError};

#[derive(Clone, Debug, PartialEq)]
pub struct PublishedMessage {
    pub channel: String,
    pub payload: Value,
}

/// In-process fan-out keyed by channel name. Messages reach only receivers
/// subscribed at publish time; a receiver that falls more than `capacity`
/// messages behind loses the oldest ones.
#[derive(Clone)]
pub struct PubSubHub {
    capacity: usize,
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<PublishedMessage>>>>,
}

impl PubSubHub {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), channels: Arc::new(RwLock::new(HashMap::new())) }
    }

    pub async fn subscribe(&self, channel: &str) -> broadcast::Receiver<PublishedMessage> {
        let mut channels = self.channels.write().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub async fn subscriber_count(&self, channel: &str) -> usize {
        let channels = self.channels.read().await;
        channels.get(channel).map_or(0, broadcast::Sender::receiver_count)
    }
}

#[async_trait]
impl Publisher for PubSubHub {
    async fn publish(&self, channel: &str, message: &Value) -> Result<usize, QueueError> {
        let channels = self.channels.read().await;
        let Some(sender) = channels.get(channel) else {
            return Ok(0);
        };

        let delivered = sender
            .send(PublishedMessage { channel: channel.to_string(), payload: message.clone() })
            .unwrap_or(0);
        debug!(event_name = "queue.pubsub.published", channel, delivered, "message published");
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use triage_core::queue::Publisher;

    use super::PubSubHub;

    #[tokio::test]
    async fn publish_without_subscribers_reaches_nobody() {
        let hub = PubSubHub::new(8);

        let delivered = hub.publish("evaluations", &json!({"event": "x"})).await.expect("publish");

        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn every_current_subscriber_receives_the_message() {
        let hub = PubSubHub::new(8);
        let mut first = hub.subscribe("evaluations").await;
        let mut second = hub.subscribe("evaluations").await;

        let delivered =
            hub.publish("evaluations", &json!({"event": "evaluation.completed"})).await.expect("ok");

        assert_eq!(delivered, 2);
        assert_eq!(first.recv().await.expect("first").payload["event"], "evaluation.completed");
        assert_eq!(second.recv().await.expect("second").channel, "evaluations");
    }

    #[tokio::test]
    async fn late_subscribers_do_not_see_earlier_messages() {
        let hub = PubSubHub::new(8);
        let _early = hub.subscribe("calibration").await;
        hub.publish("calibration", &json!(1)).await.expect("publish");

        let mut late = hub.subscribe("calibration").await;
        hub.publish("calibration", &json!(2)).await.expect("publish");

        assert_eq!(late.recv().await.expect("late").payload, json!(2));
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let hub = PubSubHub::new(8);
        let mut other = hub.subscribe("other").await;

        hub.publish("evaluations", &json!("hello")).await.expect("publish");

        assert!(other.try_recv().is_err());
        assert_eq!(hub.subscriber_count("other").await, 1);
    }
}
