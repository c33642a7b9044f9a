//! AMQP event sink for outbound queue and match events

use crate::amqp::messages::{
    MessageEnvelope, MATCH_FORMED_ROUTING_KEY, QUEUE_SIZE_CHANGED_ROUTING_KEY,
    RANK_CHANGED_ROUTING_KEY,
};
use crate::error::{MatchmakingError, Result};
use crate::events::EventPublisher;
use crate::types::{MatchFormed, QueueSizeChanged, RankChanged};
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange_name: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub enable_deduplication: bool,
    pub publish_timeout_ms: u64,
    /// Dedup cache is reset once it holds this many message ids
    pub deduplication_capacity: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange_name: "counseling.events".to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
            enable_deduplication: true,
            publish_timeout_ms: 5000,
            deduplication_capacity: 10_000,
        }
    }
}

/// AMQP-based event publisher implementation
pub struct AmqpEventPublisher {
    channel: Channel,
    config: PublisherConfig,
    published_messages: Mutex<HashSet<String>>,
}

impl AmqpEventPublisher {
    /// Create a new event publisher and declare its exchange
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let publisher = Self {
            channel,
            config,
            published_messages: Mutex::new(HashSet::new()),
        };

        publisher.setup_exchange().await?;

        Ok(publisher)
    }

    async fn setup_exchange(&self) -> Result<()> {
        let args = ExchangeDeclareArguments::new(&self.config.exchange_name, "topic");
        self.channel.exchange_declare(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!(
                    "Failed to declare exchange '{}': {}",
                    self.config.exchange_name, e
                ),
            }
        })?;

        info!(
            "Declared AMQP topic exchange '{}'",
            self.config.exchange_name
        );
        Ok(())
    }

    /// Publish with dedup and retry
    async fn publish_envelope<T>(&self, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        if self.config.enable_deduplication && self.already_published(&envelope.correlation_id)? {
            debug!(
                "Message {} already published, skipping",
                envelope.correlation_id
            );
            return Ok(());
        }

        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(envelope).await {
                Ok(()) => {
                    if self.config.enable_deduplication {
                        self.remember(&envelope.correlation_id)?;
                    }

                    debug!(
                        "Published message {} with routing key {}",
                        envelope.correlation_id, envelope.routing_key
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish message {} after {} retries: {}",
                            envelope.correlation_id, self.config.max_retries, e
                        );
                        return Err(MatchmakingError::EventPublishFailed {
                            message: e.to_string(),
                        }
                        .into());
                    }

                    warn!(
                        "Publish attempt {} failed for message {}: {}. Retrying in {:?}",
                        retry_count, envelope.correlation_id, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }

    /// Single publish attempt
    async fn try_publish<T>(&self, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(&self.config.exchange_name, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");

        timeout(
            Duration::from_millis(self.config.publish_timeout_ms),
            self.channel.basic_publish(properties, payload, args),
        )
        .await
        .map_err(|_| MatchmakingError::EventPublishFailed {
            message: format!(
                "Publish timed out after {}ms",
                self.config.publish_timeout_ms
            ),
        })?
        .map_err(|e| MatchmakingError::AmqpConnectionFailed {
            message: format!("Failed to publish message: {}", e),
        })?;

        Ok(())
    }

    fn already_published(&self, message_id: &str) -> Result<bool> {
        let published_messages =
            self.published_messages
                .lock()
                .map_err(|_| MatchmakingError::InternalError {
                    message: "Failed to acquire published messages lock".to_string(),
                })?;
        Ok(published_messages.contains(message_id))
    }

    fn remember(&self, message_id: &str) -> Result<()> {
        let mut published_messages =
            self.published_messages
                .lock()
                .map_err(|_| MatchmakingError::InternalError {
                    message: "Failed to acquire published messages lock".to_string(),
                })?;
        if published_messages.len() >= self.config.deduplication_capacity {
            published_messages.clear();
        }
        published_messages.insert(message_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish_rank_changed(&self, event: RankChanged) -> Result<()> {
        let envelope = MessageEnvelope::new(event, RANK_CHANGED_ROUTING_KEY.to_string());
        self.publish_envelope(&envelope).await
    }

    async fn publish_queue_size_changed(&self, event: QueueSizeChanged) -> Result<()> {
        let envelope = MessageEnvelope::new(event, QUEUE_SIZE_CHANGED_ROUTING_KEY.to_string());
        self.publish_envelope(&envelope).await
    }

    async fn publish_match_formed(&self, event: MatchFormed) -> Result<()> {
        let envelope = MessageEnvelope::new(event, MATCH_FORMED_ROUTING_KEY.to_string());
        self.publish_envelope(&envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publisher_config_default() {
        let config = PublisherConfig::default();
        assert_eq!(config.exchange_name, "counseling.events");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_ms, 500);
        assert!(config.enable_deduplication);
        assert_eq!(config.publish_timeout_ms, 5000);
    }

    #[test]
    fn test_match_formed_envelope() {
        let event = MatchFormed {
            customer_id: "cust-1".to_string(),
            counselor_id: 7,
            session_token: "room-cust-1-7-abcdef01".to_string(),
            timestamp: chrono::Utc::now(),
        };

        let envelope = MessageEnvelope::new(event.clone(), MATCH_FORMED_ROUTING_KEY.to_string());
        assert_eq!(envelope.routing_key, "match.formed");
        assert_eq!(envelope.payload, event);

        let decoded = MessageEnvelope::<MatchFormed>::from_bytes(&envelope.to_bytes().unwrap())
            .unwrap();
        assert_eq!(decoded.correlation_id, envelope.correlation_id);
        assert_eq!(decoded.payload.counselor_id, 7);
    }
}
