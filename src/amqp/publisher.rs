//! AMQP event publisher for outbound events

use crate::amqp::messages::{
    MessageEnvelope, MessageUtils, CONTEST_EVENTS_EXCHANGE, COUNTER_UPDATED_ROUTING_KEY,
    GAME_EVENTS_EXCHANGE, GAME_JOIN_ROUTING_KEY, ROOM_STATE_CHANGED_ROUTING_KEY,
};
use crate::error::{ContestError, Result};
use crate::metrics::MetricsCollector;
use crate::types::*;
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Trait for publishing contest events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a batch of join counter changes
    async fn publish_counter_update(&self, event: CounterUpdate) -> Result<()>;

    /// Hand a ticket to the game-assignment service
    async fn publish_game_join(&self, event: GameJoinDispatch) -> Result<()>;

    /// Publish a room lifecycle change
    async fn publish_room_state_changed(&self, event: RoomStateChanged) -> Result<()>;
}

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub enable_deduplication: bool,
    pub publish_timeout_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 500,
            enable_deduplication: true,
            publish_timeout_ms: 5000,
        }
    }
}

/// AMQP-based event publisher implementation
pub struct AmqpEventPublisher {
    channel: Channel,
    config: PublisherConfig,
    published_messages: std::sync::Mutex<std::collections::HashSet<String>>,
}

impl AmqpEventPublisher {
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let publisher = Self {
            channel,
            config,
            published_messages: std::sync::Mutex::new(std::collections::HashSet::new()),
        };

        publisher.setup_exchanges().await?;

        Ok(publisher)
    }

    async fn setup_exchanges(&self) -> Result<()> {
        for exchange in [CONTEST_EVENTS_EXCHANGE, GAME_EVENTS_EXCHANGE] {
            let args = ExchangeDeclareArguments::new(exchange, "topic");
            self.channel.exchange_declare(args).await.map_err(|e| {
                ContestError::AmqpConnectionFailed {
                    message: format!("Failed to declare exchange {}: {}", exchange, e),
                }
            })?;
        }

        info!("Successfully set up AMQP exchanges");
        Ok(())
    }

    /// Publish one event with retry and exponential backoff
    async fn publish_event(&self, event: ContestEvent) -> Result<()> {
        let exchange = MessageUtils::exchange(&event);
        let routing_key = MessageUtils::routing_key(&event).to_string();
        let envelope = MessageEnvelope::new(event, routing_key);
        self.publish_to_exchange(exchange, &envelope).await
    }

    async fn publish_to_exchange(
        &self,
        exchange: &str,
        envelope: &MessageEnvelope<ContestEvent>,
    ) -> Result<()> {
        if self.config.enable_deduplication {
            let published_messages =
                self.published_messages
                    .lock()
                    .map_err(|_| ContestError::InternalError {
                        message: "Failed to acquire published messages lock".to_string(),
                    })?;
            if published_messages.contains(&envelope.correlation_id) {
                debug!(
                    "Message {} already published, skipping",
                    envelope.correlation_id
                );
                return Ok(());
            }
        }

        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            let attempt = tokio::time::timeout(
                Duration::from_millis(self.config.publish_timeout_ms),
                self.try_publish(exchange, envelope),
            )
            .await
            .unwrap_or_else(|_| {
                Err(ContestError::AmqpConnectionFailed {
                    message: "Publish timed out".to_string(),
                }
                .into())
            });

            match attempt {
                Ok(_) => {
                    if self.config.enable_deduplication {
                        let mut published_messages =
                            self.published_messages.lock().map_err(|_| {
                                ContestError::InternalError {
                                    message: "Failed to acquire published messages lock"
                                        .to_string(),
                                }
                            })?;
                        published_messages.insert(envelope.correlation_id.clone());
                    }

                    debug!(
                        "Published message {} to exchange {}",
                        envelope.correlation_id, exchange
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
                        return Err(e);
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

    async fn try_publish(&self, exchange: &str, envelope: &MessageEnvelope<ContestEvent>) -> Result<()> {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(exchange, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| ContestError::AmqpConnectionFailed {
                message: format!("Failed to publish message: {}", e),
            })?;

        Ok(())
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish_counter_update(&self, event: CounterUpdate) -> Result<()> {
        self.publish_event(ContestEvent::CounterUpdate(event)).await
    }

    async fn publish_game_join(&self, event: GameJoinDispatch) -> Result<()> {
        MessageUtils::validate_game_join(&event)?;
        self.publish_event(ContestEvent::GameJoinDispatch(event)).await
    }

    async fn publish_room_state_changed(&self, event: RoomStateChanged) -> Result<()> {
        self.publish_event(ContestEvent::RoomStateChanged(event)).await
    }
}

/// Publisher used when no broker is configured; events are only logged
#[derive(Debug, Default)]
pub struct LoggingEventPublisher;

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish_counter_update(&self, event: CounterUpdate) -> Result<()> {
        debug!("Counter update: {} contests changed", event.deltas.len());
        Ok(())
    }

    async fn publish_game_join(&self, event: GameJoinDispatch) -> Result<()> {
        debug!(
            "Game join: user {} -> game {} seat {}",
            event.user_id, event.ticket.game_id, event.ticket.player_pos
        );
        Ok(())
    }

    async fn publish_room_state_changed(&self, event: RoomStateChanged) -> Result<()> {
        debug!(
            "Room {} state {} -> {}",
            event.room_id, event.from, event.to
        );
        Ok(())
    }
}

/// Counts every publish outcome per routing key, then hands the result back
pub struct MeteredEventPublisher {
    inner: Arc<dyn EventPublisher>,
    metrics: Arc<MetricsCollector>,
}

impl MeteredEventPublisher {
    pub fn new(inner: Arc<dyn EventPublisher>, metrics: Arc<MetricsCollector>) -> Self {
        Self { inner, metrics }
    }

    fn observe(&self, routing_key: &str, result: Result<()>) -> Result<()> {
        self.metrics
            .record_event_published(routing_key, result.is_ok());
        result
    }
}

#[async_trait]
impl EventPublisher for MeteredEventPublisher {
    async fn publish_counter_update(&self, event: CounterUpdate) -> Result<()> {
        let result = self.inner.publish_counter_update(event).await;
        self.observe(COUNTER_UPDATED_ROUTING_KEY, result)
    }

    async fn publish_game_join(&self, event: GameJoinDispatch) -> Result<()> {
        let result = self.inner.publish_game_join(event).await;
        self.observe(GAME_JOIN_ROUTING_KEY, result)
    }

    async fn publish_room_state_changed(&self, event: RoomStateChanged) -> Result<()> {
        let result = self.inner.publish_room_state_changed(event).await;
        self.observe(ROOM_STATE_CHANGED_ROUTING_KEY, result)
    }
}

/// Mock event publisher for testing
#[derive(Debug, Default)]
pub struct MockEventPublisher {
    published_events: std::sync::Mutex<Vec<ContestEvent>>,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// All published events (for testing)
    pub fn get_published_events(&self) -> Vec<ContestEvent> {
        self.published_events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Published game joins (for testing)
    pub fn game_joins(&self) -> Vec<GameJoinDispatch> {
        self.get_published_events()
            .into_iter()
            .filter_map(|event| match event {
                ContestEvent::GameJoinDispatch(join) => Some(join),
                _ => None,
            })
            .collect()
    }

    /// Published counter batches (for testing)
    pub fn counter_updates(&self) -> Vec<CounterUpdate> {
        self.get_published_events()
            .into_iter()
            .filter_map(|event| match event {
                ContestEvent::CounterUpdate(update) => Some(update),
                _ => None,
            })
            .collect()
    }

    pub fn clear_events(&self) {
        if let Ok(mut events) = self.published_events.lock() {
            events.clear();
        }
    }

    fn record(&self, event: ContestEvent) {
        if let Ok(mut events) = self.published_events.lock() {
            events.push(event);
        }
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish_counter_update(&self, event: CounterUpdate) -> Result<()> {
        self.record(ContestEvent::CounterUpdate(event));
        Ok(())
    }

    async fn publish_game_join(&self, event: GameJoinDispatch) -> Result<()> {
        self.record(ContestEvent::GameJoinDispatch(event));
        Ok(())
    }

    async fn publish_room_state_changed(&self, event: RoomStateChanged) -> Result<()> {
        self.record(ContestEvent::RoomStateChanged(event));
        Ok(())
    }
}
