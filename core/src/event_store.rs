//! Event store trait and related types.
//!
//! The event store is the durable append-only log shared by every service:
//! a specialized database optimized for appending event streams with
//! per-aggregate optimistic concurrency and a log-wide monotonic sequence.
//!
//! # Design
//!
//! The trait is deliberately minimal. It provides exactly what the engine
//! needs:
//!
//! - Append events to a stream under an expected-version check
//! - Load a stream for state reconstruction
//! - A creation-time secondary-key lookup against payload fields
//!
//! It does NOT provide subscription mechanisms (that is the event bus) or
//! general querying (that is the projection side).
//!
//! # Implementations
//!
//! - `PostgresEventStore` (in `circulate-postgres`): production implementation
//! - `InMemoryEventStore` (in `circulate-testing`): fast, deterministic tests
//!
//! # Dyn compatibility
//!
//! The trait uses explicit `Pin<Box<dyn Future>>` returns instead of
//! `async fn` so it can be used as a trait object (`Arc<dyn EventStore>`)
//! shared by command handlers, reactors, and tests.

use crate::event::{EventEnvelope, NewEvent};
use crate::stream::{StreamId, Version};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event store operations.
#[derive(Error, Debug)]
pub enum EventStoreError {
    /// Optimistic concurrency conflict: the stream is not at the expected
    /// version. Another writer committed first; the caller must rehydrate
    /// and decide again (never retry the same append blindly).
    #[error("Concurrency conflict on {stream_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The stream where the conflict occurred.
        stream_id: StreamId,
        /// The version the caller expected.
        expected: Version,
        /// The stream's actual current version.
        actual: Version,
    },

    /// The `(stream_id, version)` uniqueness constraint was violated despite
    /// the version precheck: a concurrent writer won the race between the
    /// read and the insert.
    #[error("Duplicate event {stream_id} v{version}: a concurrent writer won the race")]
    DuplicateEvent {
        /// The stream where the collision occurred.
        stream_id: StreamId,
        /// The colliding version.
        version: Version,
    },

    /// A transient failure while persisting events.
    #[error("Event save failed: {0}")]
    SaveFailed(String),

    /// A transient failure while reading events.
    #[error("Event lookup failed: {0}")]
    LookupFailed(String),

    /// An envelope could not be encoded or decoded. Schema violations are
    /// fatal, not transient.
    #[error("Event serialization failed: {0}")]
    Serialization(String),
}

impl EventStoreError {
    /// Whether a failed operation may be retried with a fresh rehydration.
    ///
    /// Only concurrency-class failures qualify; infrastructure failures are
    /// propagated without in-handler retries.
    #[must_use]
    pub const fn is_concurrency_conflict(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyConflict { .. } | Self::DuplicateEvent { .. }
        )
    }
}

/// The append-only event log shared by all services.
///
/// # Concurrency policy
///
/// Multiple handlers may attempt to append to the same aggregate
/// simultaneously. Contention is resolved by the `(stream_id, version)`
/// unique constraint: at most one append per version succeeds, the losing
/// writer receives [`EventStoreError::ConcurrencyConflict`] (or
/// [`EventStoreError::DuplicateEvent`] when it loses the race after the
/// precheck) and must re-run its full rehydrate-decide-append cycle.
///
/// # Thread safety
///
/// Implementations must be `Send + Sync` and are shared behind `Arc`.
pub trait EventStore: Send + Sync {
    /// Append events to a stream under an expected-version check.
    ///
    /// The store:
    ///
    /// - fails with [`EventStoreError::ConcurrencyConflict`] if the stream's
    ///   current version differs from `expected_version`;
    /// - assigns contiguous versions `expected_version + 1, + 2, …` to the
    ///   supplied events in order;
    /// - assigns each event a `global_version` from the log-wide monotonic
    ///   counter;
    /// - stamps `metadata.stored` with the append time, preserving the
    ///   caller's correlation id;
    /// - persists the whole batch atomically: partial appends are
    ///   impossible, even under cancellation.
    ///
    /// Returns the recorded envelopes, ready to publish.
    ///
    /// # Errors
    ///
    /// - [`EventStoreError::ConcurrencyConflict`] on a version mismatch
    /// - [`EventStoreError::DuplicateEvent`] when a concurrent writer won the
    ///   race despite the precheck
    /// - [`EventStoreError::SaveFailed`] on transient persistence failures
    fn append_events(
        &self,
        stream_id: StreamId,
        expected_version: Version,
        events: Vec<NewEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<EventEnvelope>, EventStoreError>> + Send + '_>>;

    /// Load all events for a stream, ascending by version.
    ///
    /// An empty vector means the aggregate does not exist; that is not an
    /// error (the caller decides whether absence is acceptable).
    ///
    /// # Errors
    ///
    /// - [`EventStoreError::LookupFailed`] on transient read failures
    /// - [`EventStoreError::Serialization`] when a stored envelope cannot be
    ///   decoded (fatal)
    fn load_events(
        &self,
        stream_id: StreamId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<EventEnvelope>, EventStoreError>> + Send + '_>>;

    /// Find the aggregate whose latest event of `event_type` carries
    /// `payload[field] == value`.
    ///
    /// This exists only for secondary-key lookups at creation time, for
    /// example "does a wallet already exist for this user?" or "is this ISBN
    /// already registered?".
    ///
    /// The lookup tolerates deletions: when the matching aggregate's
    /// creation is followed by a deletion event (any event on the same
    /// stream whose type ends in `"Deleted"`, the engine-wide tombstone
    /// convention), the result is `None`.
    ///
    /// # Errors
    ///
    /// - [`EventStoreError::LookupFailed`] on transient read failures
    fn find_latest_by_payload_field(
        &self,
        event_type: &str,
        field: &str,
        value: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StreamId>, EventStoreError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_conflict_error_display() {
        let error = EventStoreError::ConcurrencyConflict {
            stream_id: StreamId::new("book-1"),
            expected: Version::new(5),
            actual: Version::new(7),
        };

        let display = format!("{error}");
        assert!(display.contains("expected version 5"));
        assert!(display.contains("found 7"));
    }

    #[test]
    fn duplicate_event_error_display() {
        let error = EventStoreError::DuplicateEvent {
            stream_id: StreamId::new("book-1"),
            version: Version::new(3),
        };
        let display = format!("{error}");
        assert!(display.contains("book-1 v3"));
    }

    #[test]
    fn conflict_classification() {
        let conflict = EventStoreError::ConcurrencyConflict {
            stream_id: StreamId::new("a"),
            expected: Version::INITIAL,
            actual: Version::new(1),
        };
        let duplicate = EventStoreError::DuplicateEvent {
            stream_id: StreamId::new("a"),
            version: Version::new(1),
        };
        let transient = EventStoreError::SaveFailed("connection reset".to_string());

        assert!(conflict.is_concurrency_conflict());
        assert!(duplicate.is_concurrency_conflict());
        assert!(!transient.is_concurrency_conflict());
    }
}
