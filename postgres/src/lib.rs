//! # Circulate Postgres
//!
//! `PostgreSQL` persistence for the write side of the engine: the
//! append-only event store and the dead-letter queue. Uses sqlx with the
//! tokio runtime; migrations are embedded via `sqlx::migrate!`.
//!
//! The read side (projection documents, checkpoints) lives in
//! `circulate-projections`, typically on a separate database.

#![forbid(unsafe_code)]

pub mod dead_letter_queue;
pub mod event_store;

pub use dead_letter_queue::{DeadLetterQueue, DlqStatus, FailedEvent};
pub use event_store::PostgresEventStore;
