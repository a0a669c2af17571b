//! In-memory event store with the full store contract.
//!
//! Semantics match the Postgres implementation exactly: contiguous
//! versions, optimistic concurrency, atomic batches, a monotonic global
//! sequence, and the deletion-tolerant payload lookup, all over a
//! mutex-guarded map, for fast and deterministic tests.

#![allow(clippy::unwrap_used)] // Test infrastructure: a poisoned lock is a failed test.

use chrono::Utc;
use circulate_core::event::{EventEnvelope, EventMetadata, NewEvent};
use circulate_core::event_store::{EventStore, EventStoreError};
use circulate_core::stream::{StreamId, Version};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory [`EventStore`].
///
/// Clones share state, so one instance can be handed to several command
/// services and reactors in a test.
#[derive(Clone, Debug, Default)]
pub struct InMemoryEventStore {
    streams: Arc<Mutex<HashMap<StreamId, Vec<EventEnvelope>>>>,
    global: Arc<AtomicU64>,
}

impl InMemoryEventStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of events across all streams.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.streams.lock().unwrap().values().map(Vec::len).sum()
    }

    /// Every event in the log, ascending by global version.
    #[must_use]
    pub fn all_events(&self) -> Vec<EventEnvelope> {
        let mut events: Vec<EventEnvelope> = self
            .streams
            .lock()
            .unwrap()
            .values()
            .flatten()
            .cloned()
            .collect();
        events.sort_by_key(|e| e.global_version);
        events
    }

    /// Drop everything (test isolation).
    pub fn clear(&self) {
        self.streams.lock().unwrap().clear();
    }
}

impl EventStore for InMemoryEventStore {
    fn append_events(
        &self,
        stream_id: StreamId,
        expected_version: Version,
        events: Vec<NewEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<EventEnvelope>, EventStoreError>> + Send + '_>>
    {
        Box::pin(async move {
            if events.is_empty() {
                return Ok(Vec::new());
            }

            let mut streams = self.streams.lock().unwrap();
            let stream = streams.entry(stream_id.clone()).or_default();

            let actual = Version::new(stream.len() as u64);
            if actual != expected_version {
                return Err(EventStoreError::ConcurrencyConflict {
                    stream_id,
                    expected: expected_version,
                    actual,
                });
            }

            // The mutex serializes writers, so the whole batch lands or none
            // of it does; versions stay contiguous by construction.
            let stored = Utc::now();
            let mut recorded = Vec::with_capacity(events.len());
            for (i, event) in events.into_iter().enumerate() {
                let envelope = EventEnvelope {
                    aggregate_id: stream_id.clone(),
                    event_type: event.event_type,
                    version: expected_version + (i as u64 + 1),
                    global_version: self.global.fetch_add(1, Ordering::SeqCst) + 1,
                    timestamp: event.timestamp,
                    schema_version: event.schema_version,
                    payload: event.payload,
                    metadata: EventMetadata {
                        correlation_id: event.metadata.correlation_id,
                        stored: Some(stored),
                    },
                };
                stream.push(envelope.clone());
                recorded.push(envelope);
            }

            Ok(recorded)
        })
    }

    fn load_events(
        &self,
        stream_id: StreamId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<EventEnvelope>, EventStoreError>> + Send + '_>>
    {
        Box::pin(async move {
            Ok(self
                .streams
                .lock()
                .unwrap()
                .get(&stream_id)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn find_latest_by_payload_field(
        &self,
        event_type: &str,
        field: &str,
        value: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StreamId>, EventStoreError>> + Send + '_>>
    {
        let event_type = event_type.to_string();
        let field = field.to_string();
        let value = value.to_string();

        Box::pin(async move {
            let streams = self.streams.lock().unwrap();

            let mut best: Option<(u64, StreamId)> = None;
            for (stream_id, events) in streams.iter() {
                let matched = events.iter().find(|e| {
                    e.event_type == event_type
                        && e.payload
                            .get(&field)
                            .map(|v| match v {
                                serde_json::Value::String(s) => s == &value,
                                other => other.to_string() == value,
                            })
                            .unwrap_or(false)
                });
                let Some(matched) = matched else { continue };

                // Deletion tolerance: a later tombstone hides the match.
                let deleted_later = events.iter().any(|e| {
                    e.version > matched.version && e.event_type.ends_with("Deleted")
                });
                if deleted_later {
                    continue;
                }

                if best
                    .as_ref()
                    .is_none_or(|(global, _)| matched.global_version > *global)
                {
                    best = Some((matched.global_version, stream_id.clone()));
                }
            }

            Ok(best.map(|(_, stream_id)| stream_id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: &str, payload: serde_json::Value) -> NewEvent {
        NewEvent {
            event_type: event_type.to_string(),
            schema_version: 1,
            timestamp: Utc::now(),
            payload,
            metadata: EventMetadata::generate(),
        }
    }

    #[tokio::test]
    async fn append_and_load_round_trip() {
        let store = InMemoryEventStore::new();
        let stream = StreamId::new("a-1");

        let recorded = store
            .append_events(
                stream.clone(),
                Version::INITIAL,
                vec![
                    event("Created", serde_json::json!({"type": "Created"})),
                    event("Updated", serde_json::json!({"type": "Updated"})),
                ],
            )
            .await
            .unwrap();

        assert_eq!(recorded[0].version, Version::new(1));
        assert_eq!(recorded[1].version, Version::new(2));
        assert!(recorded[1].global_version > recorded[0].global_version);

        let loaded = store.load_events(stream).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded[0].metadata.stored.is_some());
    }

    #[tokio::test]
    async fn version_mismatch_conflicts_and_writes_nothing() {
        let store = InMemoryEventStore::new();
        let stream = StreamId::new("a-1");

        store
            .append_events(
                stream.clone(),
                Version::INITIAL,
                vec![event("Created", serde_json::json!({}))],
            )
            .await
            .unwrap();

        let result = store
            .append_events(
                stream.clone(),
                Version::INITIAL,
                vec![event("Updated", serde_json::json!({}))],
            )
            .await;

        assert!(matches!(
            result,
            Err(EventStoreError::ConcurrencyConflict { actual, .. }) if actual == Version::new(1)
        ));
        assert_eq!(store.load_events(stream).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_stream_is_empty() {
        let store = InMemoryEventStore::new();
        assert!(
            store
                .load_events(StreamId::new("nope"))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn payload_lookup_with_deletion_tolerance() {
        let store = InMemoryEventStore::new();
        let stream = StreamId::new("w-1");

        store
            .append_events(
                stream.clone(),
                Version::INITIAL,
                vec![event(
                    "WalletCreated",
                    serde_json::json!({"type": "WalletCreated", "userId": "u-1"}),
                )],
            )
            .await
            .unwrap();

        let found = store
            .find_latest_by_payload_field("WalletCreated", "userId", "u-1")
            .await
            .unwrap();
        assert_eq!(found, Some(stream.clone()));

        store
            .append_events(
                stream.clone(),
                Version::new(1),
                vec![event("WalletDeleted", serde_json::json!({"type": "WalletDeleted"}))],
            )
            .await
            .unwrap();

        let after_delete = store
            .find_latest_by_payload_field("WalletCreated", "userId", "u-1")
            .await
            .unwrap();
        assert_eq!(after_delete, None);
    }

    #[tokio::test]
    async fn lookup_prefers_the_latest_creation() {
        let store = InMemoryEventStore::new();

        for name in ["w-1", "w-2"] {
            store
                .append_events(
                    StreamId::new(name),
                    Version::INITIAL,
                    vec![event(
                        "WalletCreated",
                        serde_json::json!({"type": "WalletCreated", "userId": "u-9"}),
                    )],
                )
                .await
                .unwrap();
        }

        let found = store
            .find_latest_by_payload_field("WalletCreated", "userId", "u-9")
            .await
            .unwrap();
        assert_eq!(found, Some(StreamId::new("w-2")));
    }
}
