//! Event bus abstraction for cross-service choreography.
//!
//! Events flow from the event store (the source of truth) through the bus to
//! every service whose durable queue is bound to their type. The append to
//! the store always precedes the publish; publication exists for low-latency
//! push, not for correctness.
//!
//! # Key principles
//!
//! - **Store first**: events are persisted before they are published
//! - **At-least-once delivery**: consumers see duplicates and must be
//!   idempotent
//! - **Ordered within an aggregate**: messages are keyed by aggregate id, so
//!   per-aggregate order is preserved; there is no cross-aggregate order
//! - **Manual acknowledgement**: a consumer acks only after its own write
//!   succeeded; unacked deliveries are redelivered, which bounds memory via
//!   the transport's prefetch
//!
//! # Topic naming convention
//!
//! Topics follow the pattern `{aggregate-type}-events`: `book-events`,
//! `reservation-events`, `wallet-events`.

use crate::event::EventEnvelope;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug)]
pub enum EventBusError {
    /// Failed to connect to the bus.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event to a topic.
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed.
        topic: String,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to subscribe to topics.
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe.
        topics: Vec<String>,
        /// The reason for failure.
        reason: String,
    },

    /// A message on the wire was not a valid envelope.
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Network or transport error; the transport reconnects with backoff and
    /// resumes from the durable queue.
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Anything else.
    #[error("Event bus error: {0}")]
    Other(String),
}

/// The name of the topic carrying a given aggregate type's events.
#[must_use]
pub fn topic_for(aggregate_type: &str) -> String {
    format!("{aggregate_type}-events")
}

/// Consumer verdict on a delivery.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AckOutcome {
    /// Processed (or intentionally skipped); commit the offset.
    Ack,
    /// Not processed; leave uncommitted for redelivery.
    Nack,
}

/// One-shot acknowledgement handle attached to a delivery.
///
/// Dropping the handle without calling [`Acker::settle`] counts as a nack:
/// the transport never commits an offset it was not told to commit, so the
/// message is redelivered.
#[derive(Debug)]
pub struct Acker {
    tx: Option<oneshot::Sender<AckOutcome>>,
}

impl Acker {
    /// Create an acker and the receiving half the transport waits on.
    ///
    /// A dropped acker resolves the receiver with an error, which transports
    /// treat as [`AckOutcome::Nack`].
    #[must_use]
    pub fn channel() -> (Self, oneshot::Receiver<AckOutcome>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// An acker with no transport behind it (tests, replay from the log).
    #[must_use]
    pub const fn detached() -> Self {
        Self { tx: None }
    }

    /// Report the outcome to the transport.
    pub fn settle(mut self, outcome: AckOutcome) {
        if let Some(tx) = self.tx.take() {
            // The transport may have given up waiting; nothing to do then.
            let _ = tx.send(outcome);
        }
    }
}

/// A message handed to a consumer: the envelope plus its acknowledgement
/// handle.
#[derive(Debug)]
pub struct Delivery {
    /// The recorded event.
    pub envelope: EventEnvelope,
    acker: Acker,
}

impl Delivery {
    /// Attach an acker to an envelope.
    #[must_use]
    pub const fn new(envelope: EventEnvelope, acker: Acker) -> Self {
        Self { envelope, acker }
    }

    /// Acknowledge: the consumer's write succeeded (or the event was
    /// intentionally skipped). The transport commits the offset.
    pub fn ack(self) {
        self.acker.settle(AckOutcome::Ack);
    }

    /// Negative-acknowledge: processing failed for a reason redelivery might
    /// cure. The offset stays uncommitted.
    pub fn nack(self) {
        self.acker.settle(AckOutcome::Nack);
    }
}

/// Stream of deliveries from a subscription.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, EventBusError>> + Send>>;

/// Trait for event bus implementations.
///
/// # Implementations
///
/// - `RedpandaEventBus` (in `circulate-redpanda`): production, Kafka protocol
/// - `InMemoryEventBus` (in `circulate-testing`): deterministic tests
///
/// # Dyn compatibility
///
/// Explicit `Pin<Box<dyn Future>>` returns so the bus can be shared as
/// `Arc<dyn EventBus>` across command handlers, reactors, and projections.
pub trait EventBus: Send + Sync {
    /// Publish an envelope to a topic with at-least-once semantics.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the publish fails; the
    /// caller may republish without further coordination (consumers handle
    /// duplicates).
    fn publish(
        &self,
        topic: &str,
        envelope: &EventEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Subscribe to one or more topics as a durable consumer.
    ///
    /// The returned stream yields [`Delivery`] values; the consumer must
    /// settle each one. Unsettled or nacked deliveries are redelivered.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the subscription
    /// cannot be established.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, EventBusError>> + Send + '_>>;
}
