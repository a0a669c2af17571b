//! The engine-wide error taxonomy.
//!
//! Errors are tagged with a **kind** (a stable SCREAMING_SNAKE tag), not a
//! type name, so collaborators at the HTTP boundary can map them without
//! depending on Rust types. Kinds fall into four classes:
//!
//! - **Domain** (4xx-equivalent): invariant violations surfaced to callers
//! - **Concurrency**: optimistic-lock losses; retryable with a fresh
//!   rehydration, bounded
//! - **Infrastructure** (5xx-equivalent): never retried inside a handler
//! - **Boundary**: produced outside the engine; listed for completeness
//!
//! Projection handlers never propagate domain errors as nacks: by the time a
//! projection sees an event it is already a fact, so domain failures are
//! logged and the delivery acknowledged. Only infrastructure errors trigger
//! redelivery.

use crate::event_store::EventStoreError;
use crate::stream::{StreamId, Version};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The four classes an [`ErrorKind`] can belong to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Invariant violations; surfaced to the caller with the kind tag.
    Domain,
    /// Optimistic-concurrency losses; bounded retry with fresh rehydration.
    Concurrency,
    /// Transient or fatal infrastructure failures; propagated, never retried
    /// inside the handler.
    Infrastructure,
    /// Produced by collaborators outside the engine (auth, routing, rate
    /// limiting).
    Boundary,
}

/// Every error kind the engine can surface.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)] // The tags are self-describing; see `as_str`.
pub enum ErrorKind {
    // Domain
    BookNotFound,
    BookAlreadyExists,
    BookAlreadyDeleted,
    ReservationNotFound,
    ReservationCannotBeReturned,
    ReservationCannotBeCancelled,
    ReservationCannotBeConfirmed,
    ReservationCannotBeRejected,
    ReservationDuplicateReservation,
    WalletNotFound,
    WalletInsufficientFunds,
    ValidationError,

    // Concurrency
    ConcurrencyConflict,
    DuplicateEvent,

    // Infrastructure
    EventSaveFailed,
    EventLookupFailed,
    DatabaseError,
    PaymentProcessingError,
    InternalError,

    // Boundary
    Unauthorized,
    Forbidden,
    RateLimitExceeded,
    UrlNotFound,
}

impl ErrorKind {
    /// The stable wire tag for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BookNotFound => "BOOK_NOT_FOUND",
            Self::BookAlreadyExists => "BOOK_ALREADY_EXISTS",
            Self::BookAlreadyDeleted => "BOOK_ALREADY_DELETED",
            Self::ReservationNotFound => "RESERVATION_NOT_FOUND",
            Self::ReservationCannotBeReturned => "RESERVATION_CANNOT_BE_RETURNED",
            Self::ReservationCannotBeCancelled => "RESERVATION_CANNOT_BE_CANCELLED",
            Self::ReservationCannotBeConfirmed => "RESERVATION_CANNOT_BE_CONFIRMED",
            Self::ReservationCannotBeRejected => "RESERVATION_CANNOT_BE_REJECTED",
            Self::ReservationDuplicateReservation => "RESERVATION_DUPLICATE_RESERVATION",
            Self::WalletNotFound => "WALLET_NOT_FOUND",
            Self::WalletInsufficientFunds => "WALLET_INSUFFICIENT_FUNDS",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::ConcurrencyConflict => "CONCURRENCY_CONFLICT",
            Self::DuplicateEvent => "DUPLICATE_EVENT",
            Self::EventSaveFailed => "EVENT_SAVE_FAILED",
            Self::EventLookupFailed => "EVENT_LOOKUP_FAILED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::PaymentProcessingError => "PAYMENT_PROCESSING_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::UrlNotFound => "URL_NOT_FOUND",
        }
    }

    /// Which class this kind belongs to.
    #[must_use]
    pub const fn class(self) -> ErrorClass {
        match self {
            Self::BookNotFound
            | Self::BookAlreadyExists
            | Self::BookAlreadyDeleted
            | Self::ReservationNotFound
            | Self::ReservationCannotBeReturned
            | Self::ReservationCannotBeCancelled
            | Self::ReservationCannotBeConfirmed
            | Self::ReservationCannotBeRejected
            | Self::ReservationDuplicateReservation
            | Self::WalletNotFound
            | Self::WalletInsufficientFunds
            | Self::ValidationError => ErrorClass::Domain,

            Self::ConcurrencyConflict | Self::DuplicateEvent => ErrorClass::Concurrency,

            Self::EventSaveFailed
            | Self::EventLookupFailed
            | Self::DatabaseError
            | Self::PaymentProcessingError
            | Self::InternalError => ErrorClass::Infrastructure,

            Self::Unauthorized
            | Self::Forbidden
            | Self::RateLimitExceeded
            | Self::UrlNotFound => ErrorClass::Boundary,
        }
    }

    /// The HTTP status a boundary adapter would map this kind to.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::ValidationError => 400,
            Self::Unauthorized => 401,
            Self::WalletInsufficientFunds => 402,
            Self::Forbidden => 403,
            Self::BookNotFound
            | Self::ReservationNotFound
            | Self::WalletNotFound
            | Self::UrlNotFound => 404,
            Self::BookAlreadyExists
            | Self::ReservationDuplicateReservation
            | Self::ConcurrencyConflict
            | Self::DuplicateEvent => 409,
            Self::BookAlreadyDeleted => 410,
            Self::ReservationCannotBeReturned
            | Self::ReservationCannotBeCancelled
            | Self::ReservationCannotBeConfirmed
            | Self::ReservationCannotBeRejected => 422,
            Self::RateLimitExceeded => 429,
            Self::EventSaveFailed
            | Self::EventLookupFailed
            | Self::DatabaseError
            | Self::PaymentProcessingError
            | Self::InternalError => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A kind-tagged error with a human message and optional structured details.
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct DomainError {
    /// The stable kind tag.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details for the caller (field names, limits, …).
    pub details: Option<serde_json::Value>,
}

impl DomainError {
    /// Create an error with a kind and message.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    /// Attach structured details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Shorthand for a `VALIDATION_ERROR`.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
    }

    /// Whether a handler may retry the whole rehydrate-append cycle.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind.class(), ErrorClass::Concurrency)
    }
}

impl From<EventStoreError> for DomainError {
    fn from(err: EventStoreError) -> Self {
        match err {
            EventStoreError::ConcurrencyConflict {
                ref stream_id,
                expected,
                actual,
            } => Self::new(ErrorKind::ConcurrencyConflict, err.to_string()).with_details(
                serde_json::json!({
                    "aggregateId": stream_id.as_str(),
                    "expectedVersion": expected.value(),
                    "actualVersion": actual.value(),
                }),
            ),
            EventStoreError::DuplicateEvent { .. } => {
                Self::new(ErrorKind::DuplicateEvent, err.to_string())
            }
            EventStoreError::SaveFailed(_) => Self::new(ErrorKind::EventSaveFailed, err.to_string()),
            EventStoreError::LookupFailed(_) => {
                Self::new(ErrorKind::EventLookupFailed, err.to_string())
            }
            EventStoreError::Serialization(_) => {
                Self::new(ErrorKind::InternalError, err.to_string())
            }
        }
    }
}

/// Result of a successfully handled command: the aggregate that changed and
/// the version it reached. This is the command-handler contract consumed by
/// HTTP controllers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReceipt {
    /// The aggregate the command targeted.
    #[serde(rename = "aggregateId")]
    pub aggregate_id: StreamId,
    /// The aggregate's version after the append.
    pub version: Version,
}

impl CommandReceipt {
    /// Create a receipt.
    #[must_use]
    pub const fn new(aggregate_id: StreamId, version: Version) -> Self {
        Self {
            aggregate_id,
            version,
        }
    }
}
