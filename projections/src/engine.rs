//! The projection engine: consumes deliveries, dispatches on event type,
//! and applies the ack/retry/dead-letter policy.
//!
//! # Overview
//!
//! One engine instance drives one projection:
//!
//! 1. Load the projection's checkpoint
//! 2. Subscribe to the topics carrying its event types
//! 3. For each delivery, dispatch on `event_type` into the projection
//! 4. Acknowledge only after the projection write succeeded
//! 5. Save checkpoints periodically
//!
//! # Failure policy
//!
//! - **Unknown event type**: logged and acknowledged. Topics are shared per
//!   aggregate, so every projection sees types it does not handle.
//! - **Domain / decode failure**: logged and acknowledged. By the time a
//!   projection sees an event it is already a fact; redelivering it cannot
//!   change the outcome.
//! - **Transient (infrastructure) failure**: retried under a bounded policy;
//!   once exhausted, the delivery is parked in the dead-letter sink and
//!   acknowledged, or (with no sink configured) nacked for redelivery.
//!
//! A failure processing one event type never blocks consumption of another:
//! every delivery is settled individually.

use crate::checkpoint::{CheckpointStore, EventPosition};
use crate::document::{ProjectionError, Result};
use circulate_core::event::EventEnvelope;
use circulate_core::event_bus::{Delivery, EventBus, EventBusError};
use circulate_core::retry::{RetryPolicy, retry_with_predicate};
use futures::StreamExt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::watch;

/// A projection: a named set of statically typed event handlers updating one
/// read model.
pub trait Projection: Send + Sync + 'static {
    /// Unique projection name (checkpoint key, logging).
    fn name(&self) -> &str;

    /// The event types this projection folds. Everything else on the
    /// subscribed topics is acknowledged untouched.
    fn event_types(&self) -> &'static [&'static str];

    /// Fold one envelope into the read model. Must be idempotent: the same
    /// envelope may arrive more than once, and envelopes for distinct
    /// aggregates may arrive out of order.
    fn apply(&self, envelope: &EventEnvelope) -> impl Future<Output = Result<()>> + Send;
}

/// Where poison deliveries go after retries are exhausted.
pub trait DeadLetterSink: Send + Sync {
    /// Park a delivery that could not be processed.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] when the sink itself fails; the
    /// engine then nacks the delivery instead.
    fn park(
        &self,
        consumer_group: &str,
        envelope: &EventEnvelope,
        error: &str,
        retry_count: u32,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Drives one projection from the event bus.
pub struct ProjectionEngine<P: Projection> {
    projection: Arc<P>,
    bus: Arc<dyn EventBus>,
    checkpoint: Arc<dyn CheckpointStore>,
    topics: Vec<String>,
    consumer_group: String,
    retry: RetryPolicy,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
    checkpoint_interval: u64,
    shutdown: watch::Receiver<bool>,
}

impl<P: Projection> ProjectionEngine<P> {
    /// Create an engine. Returns the engine and a shutdown sender; send
    /// `true` to stop the run loop gracefully.
    ///
    /// The bus must be configured with a consumer group unique to this
    /// projection so it tracks its own progress through the stream.
    #[must_use]
    pub fn new(
        projection: P,
        bus: Arc<dyn EventBus>,
        checkpoint: Arc<dyn CheckpointStore>,
        topics: Vec<String>,
        consumer_group: impl Into<String>,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let engine = Self {
            projection: Arc::new(projection),
            bus,
            checkpoint,
            topics,
            consumer_group: consumer_group.into(),
            retry: RetryPolicy::projection_default(),
            dead_letters: None,
            checkpoint_interval: 100,
            shutdown: shutdown_rx,
        };

        (engine, shutdown_tx)
    }

    /// Override the transient-failure retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Park poison deliveries here instead of nacking them forever.
    #[must_use]
    pub fn with_dead_letter_sink(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = Some(sink);
        self
    }

    /// Save a checkpoint every `interval` processed events.
    #[must_use]
    pub fn with_checkpoint_interval(mut self, interval: u64) -> Self {
        self.checkpoint_interval = interval.max(1);
        self
    }

    /// Run until shutdown is signalled.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::EventProcessing`] when the subscription
    /// cannot be established or the checkpoint cannot be loaded. Individual
    /// delivery failures never abort the loop.
    pub async fn run(&mut self) -> Result<()> {
        let projection_name = self.projection.name().to_string();
        tracing::info!(
            projection = %projection_name,
            topics = ?self.topics,
            consumer_group = %self.consumer_group,
            "Starting projection engine"
        );

        let mut event_count = match self.checkpoint.load_position(&projection_name).await? {
            Some(position) => {
                tracing::info!(
                    projection = %projection_name,
                    offset = position.offset,
                    "Resuming from checkpoint"
                );
                position.offset
            }
            None => {
                tracing::info!(projection = %projection_name, "Starting from beginning");
                0
            }
        };

        let topic_refs: Vec<&str> = self.topics.iter().map(String::as_str).collect();
        let mut deliveries = self.bus.subscribe(&topic_refs).await.map_err(|e| match e {
            EventBusError::SubscriptionFailed { topics, reason } => ProjectionError::EventProcessing(
                format!("failed to subscribe to {topics:?}: {reason}"),
            ),
            other => ProjectionError::EventProcessing(format!("subscription error: {other}")),
        })?;

        while !*self.shutdown.borrow() {
            tokio::select! {
                delivery = deliveries.next() => {
                    match delivery {
                        Some(Ok(delivery)) => {
                            self.process_delivery(delivery, &mut event_count).await;
                        }
                        Some(Err(e)) => {
                            // Transport errors are the bus's to heal; it
                            // reconnects with backoff and resumes.
                            tracing::error!(
                                projection = %projection_name,
                                error = %e,
                                "Error receiving from bus"
                            );
                        }
                        None => {
                            tracing::info!(projection = %projection_name, "Delivery stream ended");
                            break;
                        }
                    }
                }

                changed = self.shutdown.changed() => {
                    // A dropped sender counts as shutdown too.
                    if changed.is_err() || *self.shutdown.borrow() {
                        tracing::info!(projection = %projection_name, "Shutdown signal received");
                        break;
                    }
                }
            }
        }

        // Final checkpoint so a restart resumes close to where we stopped.
        self.checkpoint
            .save_position(&projection_name, EventPosition::new(event_count, chrono::Utc::now()))
            .await
            .ok();

        tracing::info!(projection = %projection_name, "Projection engine stopped");
        Ok(())
    }

    /// Process one delivery end to end, settling it exactly once.
    async fn process_delivery(&self, delivery: Delivery, event_count: &mut u64) {
        let projection_name = self.projection.name();
        let envelope = delivery.envelope.clone();

        if !self
            .projection
            .event_types()
            .contains(&envelope.event_type.as_str())
        {
            tracing::trace!(
                projection = %projection_name,
                event_type = %envelope.event_type,
                "Skipping unhandled event type"
            );
            delivery.ack();
            return;
        }

        let result = retry_with_predicate(
            self.retry.clone(),
            || self.projection.apply(&envelope),
            ProjectionError::is_transient,
        )
        .await;

        match result {
            Ok(()) => {
                *event_count += 1;
                metrics::counter!(
                    "projection.events_applied",
                    "projection" => projection_name.to_string(),
                )
                .increment(1);

                if *event_count % self.checkpoint_interval == 0 {
                    let position = EventPosition::new(*event_count, chrono::Utc::now());
                    if let Err(e) = self
                        .checkpoint
                        .save_position(projection_name, position)
                        .await
                    {
                        tracing::warn!(
                            projection = %projection_name,
                            error = %e,
                            "Failed to save checkpoint"
                        );
                    }
                }
                delivery.ack();
            }
            Err(e) if !e.is_transient() => {
                // The event is a fact; a domain or decode failure will not
                // improve with redelivery.
                tracing::warn!(
                    projection = %projection_name,
                    event = %envelope,
                    error = %e,
                    "Dropping unprocessable event"
                );
                metrics::counter!(
                    "projection.events_dropped",
                    "projection" => projection_name.to_string(),
                )
                .increment(1);
                delivery.ack();
            }
            Err(e) => {
                self.park_or_nack(delivery, &envelope, &e).await;
            }
        }
    }

    async fn park_or_nack(&self, delivery: Delivery, envelope: &EventEnvelope, error: &ProjectionError) {
        let projection_name = self.projection.name();
        #[allow(clippy::cast_possible_truncation)]
        let retries = self.retry.max_retries as u32;

        if let Some(sink) = &self.dead_letters {
            match sink
                .park(&self.consumer_group, envelope, &error.to_string(), retries)
                .await
            {
                Ok(()) => {
                    tracing::error!(
                        projection = %projection_name,
                        event = %envelope,
                        error = %error,
                        "Delivery dead-lettered after retries"
                    );
                    metrics::counter!(
                        "projection.events_dead_lettered",
                        "projection" => projection_name.to_string(),
                    )
                    .increment(1);
                    delivery.ack();
                    return;
                }
                Err(park_error) => {
                    tracing::error!(
                        projection = %projection_name,
                        error = %park_error,
                        "Dead-letter sink unavailable; nacking for redelivery"
                    );
                }
            }
        } else {
            tracing::error!(
                projection = %projection_name,
                event = %envelope,
                error = %error,
                "Transient failure after retries; nacking for redelivery"
            );
        }
        delivery.nack();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::checkpoint::NullCheckpointStore;
    use circulate_core::event::EventMetadata;
    use circulate_core::event_bus::{Acker, DeliveryStream};
    use circulate_core::retry::RetryPolicy;
    use circulate_core::stream::{StreamId, Version};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn envelope(event_type: &str, version: u64) -> EventEnvelope {
        EventEnvelope {
            aggregate_id: StreamId::new("agg-1"),
            event_type: event_type.to_string(),
            version: Version::new(version),
            global_version: version,
            timestamp: chrono::Utc::now(),
            schema_version: 1,
            payload: serde_json::json!({ "type": event_type }),
            metadata: EventMetadata::generate(),
        }
    }

    /// A bus that serves a fixed script of envelopes once, recording acks.
    struct ScriptedBus {
        script: Mutex<Vec<EventEnvelope>>,
        outcomes: Arc<Mutex<Vec<(String, bool)>>>,
    }

    impl EventBus for ScriptedBus {
        fn publish(
            &self,
            _topic: &str,
            _envelope: &EventEnvelope,
        ) -> Pin<Box<dyn Future<Output = std::result::Result<(), EventBusError>> + Send + '_>>
        {
            Box::pin(async { Ok(()) })
        }

        fn subscribe(
            &self,
            _topics: &[&str],
        ) -> Pin<
            Box<
                dyn Future<Output = std::result::Result<DeliveryStream, EventBusError>>
                    + Send
                    + '_,
            >,
        > {
            let script: Vec<EventEnvelope> = self.script.lock().unwrap().drain(..).collect();
            let outcomes = Arc::clone(&self.outcomes);

            Box::pin(async move {
                let stream = futures::stream::iter(script.into_iter().map(move |envelope| {
                    let (acker, rx) = Acker::channel();
                    let outcomes = Arc::clone(&outcomes);
                    let event_type = envelope.event_type.clone();
                    tokio::spawn(async move {
                        let acked = matches!(
                            rx.await,
                            Ok(circulate_core::event_bus::AckOutcome::Ack)
                        );
                        outcomes.lock().unwrap().push((event_type, acked));
                    });
                    Ok(Delivery::new(envelope, acker))
                }));
                Ok(Box::pin(stream) as DeliveryStream)
            })
        }
    }

    struct CountingProjection {
        applied: Arc<AtomicU64>,
        fail_transiently: bool,
    }

    impl Projection for CountingProjection {
        fn name(&self) -> &str {
            "counting"
        }

        fn event_types(&self) -> &'static [&'static str] {
            &["BookCreated", "BookDeleted"]
        }

        fn apply(&self, _envelope: &EventEnvelope) -> impl Future<Output = Result<()>> + Send {
            let applied = Arc::clone(&self.applied);
            let fail = self.fail_transiently;
            async move {
                if fail {
                    return Err(ProjectionError::Storage("down".to_string()));
                }
                applied.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn run_engine(projection: CountingProjection, script: Vec<EventEnvelope>) -> Vec<(String, bool)> {
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let bus = Arc::new(ScriptedBus {
            script: Mutex::new(script),
            outcomes: Arc::clone(&outcomes),
        });

        let (mut engine, _shutdown) = ProjectionEngine::new(
            projection,
            bus,
            Arc::new(NullCheckpointStore),
            vec!["book-events".to_string()],
            "test-group",
        );
        engine = engine.with_retry_policy(RetryPolicy::none());
        engine.run().await.unwrap();

        // Let the ack-recording tasks finish.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let collected = outcomes.lock().unwrap().clone();
        collected
    }

    #[tokio::test]
    async fn applies_and_acks_handled_types() {
        let applied = Arc::new(AtomicU64::new(0));
        let projection = CountingProjection {
            applied: Arc::clone(&applied),
            fail_transiently: false,
        };

        let outcomes = run_engine(
            projection,
            vec![envelope("BookCreated", 1), envelope("BookDeleted", 2)],
        )
        .await;

        assert_eq!(applied.load(Ordering::SeqCst), 2);
        assert!(outcomes.iter().all(|(_, acked)| *acked));
    }

    #[tokio::test]
    async fn unknown_types_are_acked_untouched() {
        let applied = Arc::new(AtomicU64::new(0));
        let projection = CountingProjection {
            applied: Arc::clone(&applied),
            fail_transiently: false,
        };

        let outcomes = run_engine(projection, vec![envelope("WalletCreated", 1)]).await;

        assert_eq!(applied.load(Ordering::SeqCst), 0);
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].1, "unknown type must still be acked");
    }

    #[tokio::test]
    async fn transient_failure_without_sink_nacks() {
        let projection = CountingProjection {
            applied: Arc::new(AtomicU64::new(0)),
            fail_transiently: true,
        };

        let outcomes = run_engine(projection, vec![envelope("BookCreated", 1)]).await;

        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].1, "transient failure must nack");
    }

    #[tokio::test]
    async fn transient_failure_with_sink_parks_and_acks() {
        struct RecordingSink {
            parked: Arc<AtomicU64>,
        }

        impl DeadLetterSink for RecordingSink {
            fn park(
                &self,
                _consumer_group: &str,
                _envelope: &EventEnvelope,
                _error: &str,
                _retry_count: u32,
            ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
                self.parked.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Ok(()) })
            }
        }

        let parked = Arc::new(AtomicU64::new(0));
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let bus = Arc::new(ScriptedBus {
            script: Mutex::new(vec![envelope("BookCreated", 1)]),
            outcomes: Arc::clone(&outcomes),
        });

        let (engine, _shutdown) = ProjectionEngine::new(
            CountingProjection {
                applied: Arc::new(AtomicU64::new(0)),
                fail_transiently: true,
            },
            bus,
            Arc::new(NullCheckpointStore),
            vec!["book-events".to_string()],
            "test-group",
        );
        let mut engine = engine
            .with_retry_policy(RetryPolicy::none())
            .with_dead_letter_sink(Arc::new(RecordingSink {
                parked: Arc::clone(&parked),
            }));
        engine.run().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(parked.load(Ordering::SeqCst), 1);
        let collected = outcomes.lock().unwrap().clone();
        assert!(collected[0].1, "dead-lettered delivery must be acked");
    }
}
