//! # Circulate Projections
//!
//! The query side of the engine: version-gated read-model stores, the
//! projection engine that feeds them from the bus, checkpoint tracking, and
//! the TTL query cache.
//!
//! ```text
//! Write side (event store)          Read side (this crate)
//! ┌─────────────────────┐          ┌─────────────────────────┐
//! │  events (log)        │          │  book_read_models       │
//! │                      │   →→→    │  reservation_read_models│
//! │                      │  bus     │  wallet_read_models     │
//! └─────────────────────┘          └─────────────────────────┘
//! ```
//!
//! Every document is a pure function of the log: drop the tables, replay,
//! and the same documents come back. The only write discipline is the
//! per-document version gate; it makes replay, duplicate delivery, and
//! cross-aggregate reordering all converge on the same terminal state.

pub mod cache;
pub mod checkpoint;
pub mod document;
pub mod engine;
pub mod postgres;

pub use cache::{CacheStats, QueryCache};
pub use checkpoint::{CheckpointStore, EventPosition, NullCheckpointStore};
pub use document::{
    ApplyOutcome, DocumentFilter, DocumentStore, ProjectionError, ReadDocument, Result,
};
pub use engine::{DeadLetterSink, Projection, ProjectionEngine};
pub use postgres::{PostgresCheckpointStore, PostgresDocumentStore};
