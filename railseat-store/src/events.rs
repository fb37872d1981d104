use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{error, info};

use railseat_core::{DelayedNotifier, MessagingError};
use railseat_shared::AutoCancelRequested;

/// Kafka producer for the deferred auto-cancel channel.
#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
    auto_cancel_topic: String,
}

impl EventProducer {
    pub fn new(brokers: &str, auto_cancel_topic: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self {
            producer,
            auto_cancel_topic: auto_cancel_topic.to_string(),
        })
    }

    pub async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                info!(
                    "Sent message to {}/{}: partition {} offset {}",
                    topic, key, delivery.partition, delivery.offset
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", topic, e);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl DelayedNotifier for EventProducer {
    async fn schedule_auto_cancel(&self, event: &AutoCancelRequested) -> Result<(), MessagingError> {
        let payload = serde_json::to_string(event).map_err(|e| MessagingError(e.to_string()))?;
        // Keyed by order so redeliveries land on the same partition.
        self.publish(&self.auto_cancel_topic, event.order_reference.as_str(), &payload)
            .await
            .map_err(|e| MessagingError(e.to_string()))
    }
}
