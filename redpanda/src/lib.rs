//! Redpanda event bus implementation for the circulate engine.
//!
//! Implements the [`EventBus`] trait over the Kafka protocol via rdkafka, so
//! any Kafka-compatible broker works (Redpanda, Apache Kafka, MSK, …).
//!
//! # Delivery semantics
//!
//! **At-least-once with consumer-driven commits.** Auto-commit is disabled;
//! the consumer task commits an offset only when the subscriber settles the
//! delivery with an ack. A nacked (or dropped) delivery leaves its offset
//! uncommitted, so the broker redelivers it after restart or rebalance.
//! Deliveries are handed out one at a time per subscription: the next
//! message is not read until the previous one is settled, which bounds the
//! unacked window and with it the consumer's memory.
//!
//! # Ordering
//!
//! Messages are keyed by **aggregate id**, so all events of one aggregate
//! land in one partition and arrive in version order. There is no ordering
//! guarantee across aggregates, and consumers must not assume one.
//!
//! # Wire format
//!
//! The JSON-serialized [`EventEnvelope`]. JSON end-to-end keeps the payload
//! field-addressable everywhere the envelope travels.

#![forbid(unsafe_code)]

use circulate_core::event::EventEnvelope;
use circulate_core::event_bus::{AckOutcome, Acker, Delivery, DeliveryStream, EventBus, EventBusError};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Redpanda event bus.
///
/// # Example
///
/// ```no_run
/// use circulate_redpanda::RedpandaEventBus;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = RedpandaEventBus::builder()
///     .brokers("localhost:9092")
///     .consumer_group("books-projection")
///     .producer_acks("all")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaEventBus {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    consumer_group: Option<String>,
    auto_offset_reset: String,
}

impl RedpandaEventBus {
    /// Create a bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be
    /// created.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a builder.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// The configured broker list.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for [`RedpandaEventBus`].
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
}

impl RedpandaEventBusBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Producer acknowledgment mode: `"0"`, `"1"`, or `"all"`. Default `"1"`.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Compression codec. Default `"none"`.
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Producer send timeout. Default 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Consumer group for subscriptions. Each projection/reactor gets its
    /// own group so it tracks its own durable position. When unset, a group
    /// name is derived from the subscribed topics.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Where a new consumer group starts: `"earliest"` or `"latest"`.
    /// Default `"earliest"`, so a fresh projection replays the whole log.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the bus.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] when brokers are missing
    /// or the producer cannot be created.
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self.brokers.ok_or_else(|| {
            EventBusError::ConnectionFailed("brokers not configured".to_string())
        })?;

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", self.producer_acks.as_deref().unwrap_or("1"))
            .set(
                "compression.type",
                self.compression.as_deref().unwrap_or("none"),
            );

        let producer: FutureProducer = producer_config.create().map_err(|e| {
            EventBusError::ConnectionFailed(format!("failed to create producer: {e}"))
        })?;

        tracing::info!(
            brokers = %brokers,
            acks = self.producer_acks.as_deref().unwrap_or("1"),
            auto_offset_reset = self.auto_offset_reset.as_deref().unwrap_or("earliest"),
            "RedpandaEventBus created"
        );

        Ok(RedpandaEventBus {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            consumer_group: self.consumer_group,
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "earliest".to_string()),
        })
    }
}

impl EventBus for RedpandaEventBus {
    fn publish(
        &self,
        topic: &str,
        envelope: &EventEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let envelope = envelope.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let payload = serde_json::to_vec(&envelope).map_err(|e| EventBusError::PublishFailed {
                topic: topic.clone(),
                reason: format!("failed to serialize envelope: {e}"),
            })?;

            // Keyed by aggregate id: one aggregate, one partition, version
            // order preserved.
            let key = envelope.aggregate_id.as_str().as_bytes();

            let record = FutureRecord::to(&topic).payload(&payload).key(key);

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition = partition,
                        offset = offset,
                        event = %envelope,
                        "Event published"
                    );
                    metrics::counter!("event_bus.published", "topic" => topic).increment(1);
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        error = %kafka_error,
                        "Failed to publish event"
                    );
                    Err(EventBusError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    #[allow(clippy::too_many_lines)] // The commit-on-ack loop is one piece.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let brokers = self.brokers.clone();
        let consumer_group = self.consumer_group.clone();
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            let consumer_group_id = consumer_group.unwrap_or_else(|| {
                let mut sorted = topics.clone();
                sorted.sort();
                format!("circulate-{}", sorted.join("-"))
            });

            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("failed to subscribe: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %consumer_group_id,
                manual_commit = true,
                "Subscribed to topics"
            );

            let (tx, rx) = tokio::sync::mpsc::channel::<Result<Delivery, EventBusError>>(1);

            // The consumer task owns the StreamConsumer. It hands out one
            // delivery at a time and waits for the subscriber's verdict
            // before committing and reading on.
            tokio::spawn(async move {
                use futures::StreamExt;

                let mut stream = consumer.stream();

                while let Some(msg_result) = stream.next().await {
                    match msg_result {
                        Ok(message) => {
                            let Some(payload) = message.payload() else {
                                tracing::warn!(
                                    topic = message.topic(),
                                    offset = message.offset(),
                                    "Message has no payload; committing past it"
                                );
                                if let Err(e) = consumer.commit_message(&message, CommitMode::Async)
                                {
                                    tracing::warn!(error = %e, "Commit failed");
                                }
                                continue;
                            };

                            let envelope = match serde_json::from_slice::<EventEnvelope>(payload) {
                                Ok(envelope) => envelope,
                                Err(e) => {
                                    // Not an envelope at all: surface the
                                    // error and commit past the message so
                                    // it cannot wedge the queue.
                                    let err = EventBusError::DeserializationFailed(format!(
                                        "failed to deserialize envelope: {e}"
                                    ));
                                    if tx.send(Err(err)).await.is_err() {
                                        break;
                                    }
                                    if let Err(e) =
                                        consumer.commit_message(&message, CommitMode::Async)
                                    {
                                        tracing::warn!(error = %e, "Commit failed");
                                    }
                                    continue;
                                }
                            };

                            let (acker, verdict) = Acker::channel();
                            if tx.send(Ok(Delivery::new(envelope, acker))).await.is_err() {
                                tracing::debug!("Subscriber dropped; exiting consumer task");
                                break; // Exit WITHOUT committing.
                            }

                            // Wait for the subscriber to settle before
                            // committing or reading the next message.
                            match verdict.await {
                                Ok(AckOutcome::Ack) => {
                                    if let Err(e) =
                                        consumer.commit_message(&message, CommitMode::Async)
                                    {
                                        tracing::warn!(
                                            topic = message.topic(),
                                            offset = message.offset(),
                                            error = %e,
                                            "Offset commit failed (message may be redelivered)"
                                        );
                                    }
                                }
                                Ok(AckOutcome::Nack) | Err(_) => {
                                    // Leave the offset uncommitted; the
                                    // broker redelivers after rebalance or
                                    // restart.
                                    tracing::debug!(
                                        topic = message.topic(),
                                        offset = message.offset(),
                                        "Delivery nacked; offset left uncommitted"
                                    );
                                    metrics::counter!("event_bus.nacked").increment(1);
                                }
                            }
                        }
                        Err(e) => {
                            let err = EventBusError::TransportError(format!(
                                "failed to receive message: {e}"
                            ));
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                            // rdkafka reconnects underneath; keep polling.
                        }
                    }
                }

                tracing::debug!("Consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(item) = rx.recv().await {
                    yield item;
                }
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_event_bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaEventBus>();
        assert_sync::<RedpandaEventBus>();
    }

    #[test]
    fn builder_requires_brokers() {
        let result = RedpandaEventBus::builder().build();
        assert!(matches!(result, Err(EventBusError::ConnectionFailed(_))));
    }
}
