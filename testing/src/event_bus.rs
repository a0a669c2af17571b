//! In-memory event bus with at-least-once, manual-ack semantics.
//!
//! Mirrors the Redpanda bus contract closely enough that service
//! choreography tests exercise the same code paths they run in production:
//! durable-ish per-subscriber queues, topic bindings, redelivery of nacked
//! deliveries (bounded, so a poison consumer cannot spin a test forever),
//! and a record of everything published for assertions.

#![allow(clippy::unwrap_used)] // Test infrastructure: a poisoned lock is a failed test.

use circulate_core::event::EventEnvelope;
use circulate_core::event_bus::{
    AckOutcome, Acker, Delivery, DeliveryStream, EventBus, EventBusError,
};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// How often a nacked delivery is retried before the bus gives up on it.
const MAX_REDELIVERIES: u32 = 25;

struct Subscriber {
    topics: HashSet<String>,
    tx: mpsc::UnboundedSender<Result<Delivery, EventBusError>>,
}

#[derive(Default)]
struct BusInner {
    subscribers: Vec<Arc<Subscriber>>,
    published: Vec<(String, EventEnvelope)>,
}

/// In-memory [`EventBus`].
///
/// Clones share state; create one per test and hand clones to every service.
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl InMemoryEventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far, in order, as `(topic, envelope)`.
    #[must_use]
    pub fn published(&self) -> Vec<(String, EventEnvelope)> {
        self.inner.lock().unwrap().published.clone()
    }

    /// Number of published events.
    #[must_use]
    pub fn published_count(&self) -> usize {
        self.inner.lock().unwrap().published.len()
    }

    /// Deliver an envelope to one subscriber, redelivering on nack.
    fn deliver(subscriber: Arc<Subscriber>, envelope: EventEnvelope) {
        tokio::spawn(async move {
            for attempt in 0..=MAX_REDELIVERIES {
                let (acker, verdict) = Acker::channel();
                if subscriber
                    .tx
                    .send(Ok(Delivery::new(envelope.clone(), acker)))
                    .is_err()
                {
                    return; // Subscriber gone.
                }

                match verdict.await {
                    Ok(AckOutcome::Ack) => return,
                    Ok(AckOutcome::Nack) | Err(_) => {
                        if attempt == MAX_REDELIVERIES {
                            tracing::warn!(
                                event = %envelope,
                                "Delivery abandoned after max redeliveries"
                            );
                            return;
                        }
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                }
            }
        });
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        envelope: &EventEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let envelope = envelope.clone();

        Box::pin(async move {
            let subscribers: Vec<Arc<Subscriber>> = {
                let mut inner = self.inner.lock().unwrap();
                inner.published.push((topic.clone(), envelope.clone()));
                inner
                    .subscribers
                    .iter()
                    .filter(|s| s.topics.contains(&topic))
                    .cloned()
                    .collect()
            };

            for subscriber in subscribers {
                Self::deliver(subscriber, envelope.clone());
            }

            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, EventBusError>> + Send + '_>> {
        let topics: HashSet<String> = topics.iter().map(|s| (*s).to_string()).collect();

        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            self.inner
                .lock()
                .unwrap()
                .subscribers
                .push(Arc::new(Subscriber { topics, tx }));

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
