//! Aggregate base: rehydration and the uncommitted-event buffer.
//!
//! An aggregate is a consistency boundary, the unit of optimistic
//! concurrency. Its state is never stored directly; it is a fold of the
//! aggregate's event stream. Command handlers rehydrate a throwaway instance,
//! run one operation against it, append the produced events, and discard it.
//!
//! The domain side implements [`Aggregate`]: a zero value (`Default`) plus a
//! pure, infallible `apply` fold. [`AggregateRoot`] wraps that with the
//! engine mechanics: envelope decoding, version counting, and the buffer of
//! events produced but not yet appended.
//!
//! The fold must be deterministic and side-effect-free: the same event list,
//! replayed on any process, yields identical state.

use crate::event::{DomainEvent, EventEnvelope, EventError, EventMetadata, NewEvent};
use crate::stream::{StreamId, Version};
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};

/// Domain-side contract for an event-sourced aggregate.
pub trait Aggregate: Default + Send + Sync {
    /// The aggregate's event type (a tagged enum covering its whole stream).
    type Event: DomainEvent + Serialize + DeserializeOwned + Clone;

    /// Stable name of the aggregate type (used for logging and topics).
    fn aggregate_type() -> &'static str;

    /// Fold one event into state. Pure and infallible: events in the log are
    /// facts, so `apply` has no failure path: all validation happened
    /// before the event was emitted.
    fn apply(&mut self, event: &Self::Event);
}

/// An aggregate instance under command handling: state, version, and the
/// uncommitted-event buffer.
#[derive(Debug)]
pub struct AggregateRoot<A: Aggregate> {
    id: StreamId,
    state: A,
    version: Version,
    uncommitted: Vec<A::Event>,
}

impl<A: Aggregate> AggregateRoot<A> {
    /// A fresh aggregate that does not exist yet (version 0, zero state).
    #[must_use]
    pub fn fresh(id: StreamId) -> Self {
        Self {
            id,
            state: A::default(),
            version: Version::INITIAL,
            uncommitted: Vec::new(),
        }
    }

    /// Rehydrate from a stream, folding every envelope into state.
    ///
    /// Sets `version` to the number of events folded. The envelopes must be
    /// the full stream in ascending version order, exactly as returned by
    /// `EventStore::load_events`.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Deserialization`] when an envelope's payload
    /// does not decode into `A::Event`. The log only ever contains events the
    /// aggregate knows about, so this is a programming error, not a domain
    /// condition.
    pub fn rehydrate(id: StreamId, envelopes: &[EventEnvelope]) -> Result<Self, EventError> {
        let mut state = A::default();
        for envelope in envelopes {
            let event: A::Event = envelope.decode()?;
            state.apply(&event);
        }
        Ok(Self {
            id,
            state,
            version: Version::new(envelopes.len() as u64),
            uncommitted: Vec::new(),
        })
    }

    /// The aggregate id.
    #[must_use]
    pub const fn id(&self) -> &StreamId {
        &self.id
    }

    /// The current state (committed events plus any recorded ones).
    #[must_use]
    pub const fn state(&self) -> &A {
        &self.state
    }

    /// The committed version (count of events loaded from the store; events
    /// recorded on this instance do not move it; the store does, at append).
    #[must_use]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Whether any committed event exists for this aggregate.
    #[must_use]
    pub const fn exists(&self) -> bool {
        !self.version.is_initial()
    }

    /// Apply an event to state and buffer it for append.
    pub fn record(&mut self, event: A::Event) {
        self.state.apply(&event);
        self.uncommitted.push(event);
    }

    /// The buffer of events produced by the current operation but not yet
    /// appended.
    #[must_use]
    pub fn uncommitted_events(&self) -> &[A::Event] {
        &self.uncommitted
    }

    /// Drop the uncommitted buffer (after a successful append, or to abandon
    /// the operation).
    pub fn clear_uncommitted(&mut self) {
        self.uncommitted.clear();
    }

    /// Serialize the uncommitted buffer into appendable [`NewEvent`]s, all
    /// stamped with the same event time and correlation id.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if a payload cannot be encoded.
    pub fn pending_events(
        &self,
        timestamp: DateTime<Utc>,
        metadata: &EventMetadata,
    ) -> Result<Vec<NewEvent>, EventError> {
        self.uncommitted
            .iter()
            .map(|event| NewEvent::from_event(event, timestamp, metadata.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    #[serde(tag = "type")]
    enum TallyEvent {
        Added { amount: i64 },
        Reset {},
    }

    impl DomainEvent for TallyEvent {
        fn event_type(&self) -> &'static str {
            match self {
                TallyEvent::Added { .. } => "Added",
                TallyEvent::Reset {} => "Reset",
            }
        }
    }

    #[derive(Default)]
    struct Tally {
        total: i64,
    }

    impl Aggregate for Tally {
        type Event = TallyEvent;

        fn aggregate_type() -> &'static str {
            "tally"
        }

        fn apply(&mut self, event: &Self::Event) {
            match event {
                TallyEvent::Added { amount } => self.total += amount,
                TallyEvent::Reset {} => self.total = 0,
            }
        }
    }

    #[allow(clippy::unwrap_used)]
    fn envelope(id: &StreamId, version: u64, event: &TallyEvent) -> EventEnvelope {
        EventEnvelope {
            aggregate_id: id.clone(),
            event_type: event.event_type().to_string(),
            version: Version::new(version),
            global_version: version,
            timestamp: Utc::now(),
            schema_version: 1,
            payload: event.to_payload().unwrap(),
            metadata: EventMetadata::generate(),
        }
    }

    #[test]
    fn fresh_aggregate_does_not_exist() {
        let root = AggregateRoot::<Tally>::fresh(StreamId::new("t-1"));
        assert!(!root.exists());
        assert_eq!(root.version(), Version::INITIAL);
        assert_eq!(root.state().total, 0);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn rehydrate_folds_events_and_counts_version() {
        let id = StreamId::new("t-1");
        let envelopes = vec![
            envelope(&id, 1, &TallyEvent::Added { amount: 3 }),
            envelope(&id, 2, &TallyEvent::Added { amount: 4 }),
            envelope(&id, 3, &TallyEvent::Reset {}),
            envelope(&id, 4, &TallyEvent::Added { amount: 10 }),
        ];

        let root = AggregateRoot::<Tally>::rehydrate(id, &envelopes).unwrap();
        assert_eq!(root.version(), Version::new(4));
        assert_eq!(root.state().total, 10);
        assert!(root.exists());
        assert!(root.uncommitted_events().is_empty());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn rehydrate_is_deterministic() {
        let id = StreamId::new("t-1");
        let envelopes = vec![
            envelope(&id, 1, &TallyEvent::Added { amount: 5 }),
            envelope(&id, 2, &TallyEvent::Added { amount: -2 }),
        ];

        let a = AggregateRoot::<Tally>::rehydrate(id.clone(), &envelopes).unwrap();
        let b = AggregateRoot::<Tally>::rehydrate(id, &envelopes).unwrap();
        assert_eq!(a.state().total, b.state().total);
        assert_eq!(a.version(), b.version());
    }

    #[test]
    fn unknown_event_is_fatal() {
        let id = StreamId::new("t-1");
        let mut bad = envelope(&id, 1, &TallyEvent::Added { amount: 1 });
        bad.payload = serde_json::json!({ "type": "Vanished" });

        let result = AggregateRoot::<Tally>::rehydrate(id, &[bad]);
        assert!(result.is_err());
    }

    #[test]
    fn record_applies_and_buffers() {
        let mut root = AggregateRoot::<Tally>::fresh(StreamId::new("t-1"));
        root.record(TallyEvent::Added { amount: 7 });
        root.record(TallyEvent::Added { amount: 1 });

        assert_eq!(root.state().total, 8);
        assert_eq!(root.uncommitted_events().len(), 2);
        // The committed version only moves at append time.
        assert_eq!(root.version(), Version::INITIAL);

        root.clear_uncommitted();
        assert!(root.uncommitted_events().is_empty());
        assert_eq!(root.state().total, 8);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn pending_events_share_correlation() {
        let mut root = AggregateRoot::<Tally>::fresh(StreamId::new("t-1"));
        root.record(TallyEvent::Added { amount: 7 });
        root.record(TallyEvent::Reset {});

        let metadata = EventMetadata::new("corr-7");
        let pending = root.pending_events(Utc::now(), &metadata).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].event_type, "Added");
        assert_eq!(pending[1].event_type, "Reset");
        assert!(pending.iter().all(|e| e.metadata.correlation_id == "corr-7"));
    }
}
