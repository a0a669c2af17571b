//! Read documents and the version-gated document store.
//!
//! A projection document is a denormalized view keyed by aggregate id,
//! derived deterministically from the event log: drop every document and
//! replay the log, and you get the same documents back.
//!
//! # Write discipline
//!
//! All writes are version-gated against the event's per-aggregate version:
//!
//! - [`DocumentStore::apply`] inserts the document when absent and otherwise
//!   updates it only when the stored version is lower than the event's. A
//!   [`ApplyOutcome::Skipped`] result is not an error; it means the event
//!   was already applied (duplicate delivery) or a newer one got there first
//!   (out-of-order delivery; the later handler already carried this change).
//! - [`DocumentStore::soft_delete`] sets `deleted_at` under the same gate.
//!
//! Reads exclude soft-deleted documents unless explicitly asked otherwise.

use chrono::{DateTime, Utc};
use circulate_core::pagination::{Page, PageRequest};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;

/// Error type for projection operations.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// Storage backend failure. Transient: retried, then dead-lettered.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A payload or document failed to encode/decode. Not transient.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Checkpoint tracking failure. Transient.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// The event contradicts the read model (e.g. an update for a document
    /// that cannot exist). The event is already a fact, so this is logged
    /// and acknowledged, never redelivered.
    #[error("Event processing error: {0}")]
    EventProcessing(String),
}

impl ProjectionError {
    /// Whether redelivery might cure this failure.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Checkpoint(_))
    }
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// Outcome of a version-gated write.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The write landed.
    Applied,
    /// The gate held it back: already applied or superseded. Success.
    Skipped,
}

/// A read document: the projected body plus the engine-owned columns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReadDocument<T> {
    /// Aggregate id this document projects.
    pub id: String,
    /// Version of the last event folded in; monotonically non-decreasing.
    pub version: u64,
    /// When the document was first written.
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    /// When the document was last written.
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker; reads exclude marked documents by default.
    #[serde(rename = "deletedAt", skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// The projected state.
    pub body: T,
}

/// Field-equality filter over document bodies.
///
/// Values compare against the body's JSON representation, so a filter built
/// from typed values matches regardless of backend.
#[derive(Clone, Debug, Default)]
pub struct DocumentFilter {
    /// `(field, value)` pairs; all must match.
    pub equals: Vec<(String, serde_json::Value)>,
}

impl DocumentFilter {
    /// A filter matching everything.
    #[must_use]
    pub const fn all() -> Self {
        Self { equals: Vec::new() }
    }

    /// Add a field-equality requirement.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.equals.push((name.into(), value.into()));
        self
    }
}

/// Storage backend for one projection's documents.
///
/// # Implementations
///
/// - `PostgresDocumentStore` (this crate): one table per projection, JSONB
///   body, gating in SQL
/// - `InMemoryDocumentStore` (`circulate-testing`): identical semantics over
///   a `HashMap`
///
/// # Concurrency
///
/// Each document has a single writer per service (the projection engine), so
/// the version gate is the only write discipline required.
pub trait DocumentStore<T>: Send + Sync
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Insert or update the document, gated on `version < event_version`.
    ///
    /// The caller supplies the complete new body (typically: read the
    /// current document, fold the event into it, write it back).
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] on backend failures.
    fn apply(
        &self,
        id: &str,
        event_version: u64,
        event_time: DateTime<Utc>,
        body: &T,
    ) -> impl Future<Output = Result<ApplyOutcome>> + Send;

    /// Mark the document soft-deleted, gated on `version < event_version`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] on backend failures.
    fn soft_delete(
        &self,
        id: &str,
        event_version: u64,
        event_time: DateTime<Utc>,
    ) -> impl Future<Output = Result<ApplyOutcome>> + Send;

    /// Fetch a document, excluding soft-deleted ones.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] on backend failures.
    fn get(&self, id: &str) -> impl Future<Output = Result<Option<ReadDocument<T>>>> + Send;

    /// Fetch a document even when soft-deleted (projection handlers need
    /// this to keep folding version-gated updates).
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] on backend failures.
    fn get_any(&self, id: &str) -> impl Future<Output = Result<Option<ReadDocument<T>>>> + Send;

    /// Paginated, filtered query over live (non-deleted) documents.
    ///
    /// Sorting follows `page.sort_by` against body fields, defaulting to
    /// `createdAt` ascending.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] on backend failures.
    fn query(
        &self,
        filter: &DocumentFilter,
        page: &PageRequest,
    ) -> impl Future<Output = Result<Page<ReadDocument<T>>>> + Send;
}
