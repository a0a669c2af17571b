//! # Circulate Core
//!
//! Core traits and types for the circulate event-sourcing engine: the shared
//! CQRS/ES machinery behind the Books, Reservations, and Wallets services.
//!
//! ## Core concepts
//!
//! - **Event** ([`event`]): an immutable fact, identified by
//!   `(aggregateId, version)`; the envelope is the canonical persisted and
//!   published shape
//! - **Event store** ([`event_store`]): the append-only log with
//!   per-aggregate optimistic concurrency and a monotonic global sequence
//! - **Aggregate** ([`aggregate`]): a consistency boundary reconstructed by
//!   folding its stream; operations are pure state + input → event
//! - **Event bus** ([`event_bus`]): durable topic-bound queues with
//!   at-least-once delivery and manual acknowledgement
//! - **Errors** ([`error`]): the kind-tagged taxonomy every service speaks
//!
//! The write path is always: load → rehydrate → decide → append → publish.
//! The read path is projections, built by `circulate-projections` from the
//! same envelopes.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod aggregate;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod event_bus;
pub mod event_store;
pub mod money;
pub mod pagination;
pub mod retry;
pub mod stream;

/// Dependency-injection traits for anything nondeterministic.
///
/// All external effects reducible to a value (time, ids) are abstracted
/// behind traits so tests can pin them.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait: abstracts time for testability.
    pub trait Clock: Send + Sync {
        /// The current time.
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use aggregate::{Aggregate, AggregateRoot};
pub use command::CommandRunner;
pub use error::{CommandReceipt, DomainError, ErrorClass, ErrorKind};
pub use event::{DomainEvent, EventEnvelope, EventMetadata, NewEvent};
pub use event_bus::{AckOutcome, Acker, Delivery, DeliveryStream, EventBus, EventBusError};
pub use event_store::{EventStore, EventStoreError};
pub use money::Money;
pub use stream::{StreamId, Version};
