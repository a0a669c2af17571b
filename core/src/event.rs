//! Event trait and envelope types for event sourcing.
//!
//! Events represent immutable facts about things that have happened in the
//! past and are the source of truth in an event-sourced system. This module
//! defines the canonical on-the-wire and on-disk shape of an event: the typed
//! [`DomainEvent`] trait, the pre-append [`NewEvent`], and the recorded
//! [`EventEnvelope`].
//!
//! # Design
//!
//! Event payloads are JSON (`serde_json::Value`). The store must be able to
//! answer secondary-key lookups against payload fields (for example "does a
//! wallet already exist for this user?"), and the Postgres backend keeps
//! payloads in JSONB, so a self-describing format is required end-to-end.
//!
//! # Example
//!
//! ```
//! use circulate_core::event::DomainEvent;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! #[serde(tag = "type")]
//! enum BookEvent {
//!     BookCreated { isbn: String, title: String },
//!     BookDeleted {},
//! }
//!
//! impl DomainEvent for BookEvent {
//!     fn event_type(&self) -> &'static str {
//!         match self {
//!             BookEvent::BookCreated { .. } => "BookCreated",
//!             BookEvent::BookDeleted { .. } => "BookDeleted",
//!         }
//!     }
//! }
//! ```

use crate::stream::{StreamId, Version};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Error types for event codec operations.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize an event payload to JSON.
    #[error("Failed to serialize event: {0}")]
    Serialization(String),

    /// Failed to deserialize an event payload from JSON.
    #[error("Failed to deserialize event {event_type}: {reason}")]
    Deserialization {
        /// The event type tag of the offending envelope.
        event_type: String,
        /// Why decoding failed.
        reason: String,
    },
}

/// A typed event that can be persisted and replayed to reconstruct state.
///
/// # Event type tags
///
/// The `event_type()` method returns a stable string identifier used for
/// storage, bus routing, and projection dispatch. Schema evolution is carried
/// separately in the envelope's `schema_version` field, so tags stay plain
/// (`"BookCreated"`, not `"BookCreated.v2"`).
///
/// # Thread safety
///
/// Events must be `Send + Sync + 'static` to be safely passed between tasks
/// and stored in the event store.
pub trait DomainEvent: Send + Sync + 'static {
    /// Returns the stable event type tag for this event.
    fn event_type(&self) -> &'static str;

    /// Returns the payload schema version (for payload evolution).
    fn schema_version(&self) -> u16 {
        1
    }

    /// Serialize this event into a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if the event cannot be
    /// represented as JSON (rare with serde derives).
    fn to_payload(&self) -> Result<serde_json::Value, EventError>
    where
        Self: Serialize,
    {
        serde_json::to_value(self).map_err(|e| EventError::Serialization(e.to_string()))
    }

    /// Deserialize an event from a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Deserialization`] if the payload does not match
    /// this event type's shape. During rehydration this is a programming
    /// error (the log only ever contains events the aggregate knows about);
    /// during projection it is logged and the delivery acknowledged.
    fn from_payload(payload: &serde_json::Value) -> Result<Self, EventError>
    where
        Self: DeserializeOwned + Sized,
    {
        serde_json::from_value(payload.clone()).map_err(|e| EventError::Deserialization {
            event_type: payload
                .get("type")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("<untagged>")
                .to_string(),
            reason: e.to_string(),
        })
    }
}

/// Metadata carried by every event.
///
/// The correlation id links the events of one logical flow (a reservation and
/// the validation, payment, and settlement events it triggers all share one).
/// `stored` is the store-time stamp, assigned at append; it is distinct from
/// the envelope's `timestamp`, which is event time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Correlation id linking related events across aggregates.
    #[serde(rename = "correlationId")]
    pub correlation_id: String,

    /// When the event was persisted. `None` until appended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored: Option<DateTime<Utc>>,
}

impl EventMetadata {
    /// Create metadata with the given correlation id.
    #[must_use]
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            stored: None,
        }
    }

    /// Create metadata with a freshly generated correlation id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    /// Create metadata from an optional caller-supplied correlation id,
    /// generating one when absent.
    #[must_use]
    pub fn with_correlation(correlation_id: Option<String>) -> Self {
        correlation_id.map_or_else(Self::generate, Self::new)
    }
}

/// An event that has not yet been appended to the store.
///
/// Versions, the global sequence number, and the `stored` stamp are assigned
/// by the event store at append time; until then the event carries only what
/// the producer knows.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewEvent {
    /// The event type tag (e.g. `"ReservationCreated"`).
    pub event_type: String,

    /// Payload schema version.
    pub schema_version: u16,

    /// Event time (when the fact happened, per the producer's clock).
    pub timestamp: DateTime<Utc>,

    /// The JSON payload, typed per `event_type`.
    pub payload: serde_json::Value,

    /// Correlation metadata.
    pub metadata: EventMetadata,
}

impl NewEvent {
    /// Build a `NewEvent` from a typed event.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if the payload cannot be
    /// serialized.
    pub fn from_event<E: DomainEvent + Serialize>(
        event: &E,
        timestamp: DateTime<Utc>,
        metadata: EventMetadata,
    ) -> Result<Self, EventError> {
        Ok(Self {
            event_type: event.event_type().to_string(),
            schema_version: event.schema_version(),
            timestamp,
            payload: event.to_payload()?,
            metadata,
        })
    }
}

/// A recorded event: the canonical persisted and published shape.
///
/// Envelopes are immutable once appended. The pair
/// `(aggregate_id, version)` is globally unique; `global_version` is a
/// cluster-wide monotonic sequence used for ordering observability only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// The aggregate this event belongs to.
    #[serde(rename = "aggregateId")]
    pub aggregate_id: StreamId,

    /// The event type tag.
    #[serde(rename = "eventType")]
    pub event_type: String,

    /// 1-based per-aggregate sequence number.
    pub version: Version,

    /// Cluster-wide monotonic sequence, assigned at append time.
    #[serde(rename = "globalVersion")]
    pub global_version: u64,

    /// Event time.
    pub timestamp: DateTime<Utc>,

    /// Payload schema version.
    #[serde(rename = "schemaVersion")]
    pub schema_version: u16,

    /// The JSON payload, typed per `event_type`.
    pub payload: serde_json::Value,

    /// Correlation metadata plus the store-time stamp.
    pub metadata: EventMetadata,
}

impl EventEnvelope {
    /// Decode the payload into a typed event.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Deserialization`] if the payload does not match
    /// the target type.
    pub fn decode<E: DomainEvent + DeserializeOwned>(&self) -> Result<E, EventError> {
        E::from_payload(&self.payload)
    }
}

impl fmt::Display for EventEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} v{} (global {}) on {}",
            self.event_type, self.version, self.global_version, self.aggregate_id
        )
    }
}
