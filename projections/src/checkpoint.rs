//! Checkpoint tracking for projection progress.
//!
//! Checkpoints record how far a projection has processed, for resumption
//! after restarts and for lag observability. They are advisory: the bus's
//! consumer offsets drive redelivery, the checkpoint only says what was
//! successfully written. The gap between the two is exactly the
//! at-least-once window projections must tolerate anyway.

use crate::document::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Position in the event stream a projection has processed up to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPosition {
    /// Count of events processed (or a transport offset).
    pub offset: u64,
    /// When this position was reached.
    pub timestamp: DateTime<Utc>,
}

impl EventPosition {
    /// Create a position.
    #[must_use]
    pub const fn new(offset: u64, timestamp: DateTime<Utc>) -> Self {
        Self { offset, timestamp }
    }

    /// A position at the beginning of the stream.
    #[must_use]
    pub fn beginning() -> Self {
        Self {
            offset: 0,
            timestamp: Utc::now(),
        }
    }
}

/// Checkpoint storage.
///
/// # Dyn compatibility
///
/// Explicit `Pin<Box<dyn Future>>` returns so checkpoints can be passed as
/// `Arc<dyn CheckpointStore>` dependencies of the projection engine.
pub trait CheckpointStore: Send + Sync {
    /// Save the current position for a projection.
    ///
    /// # Errors
    ///
    /// Returns [`crate::document::ProjectionError::Checkpoint`] if the save
    /// fails.
    fn save_position(
        &self,
        projection_name: &str,
        position: EventPosition,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Load the last saved position for a projection; `None` for a new one.
    ///
    /// # Errors
    ///
    /// Returns [`crate::document::ProjectionError::Checkpoint`] if the load
    /// fails.
    fn load_position(
        &self,
        projection_name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<EventPosition>>> + Send + '_>>;
}

/// No-op checkpoint store for tests and replay tooling.
///
/// Failures it can never produce: both methods always succeed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCheckpointStore;

impl CheckpointStore for NullCheckpointStore {
    fn save_position(
        &self,
        _projection_name: &str,
        _position: EventPosition,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn load_position(
        &self,
        _projection_name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<EventPosition>>> + Send + '_>> {
        Box::pin(async { Ok(None) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beginning_starts_at_zero() {
        assert_eq!(EventPosition::beginning().offset, 0);
    }

    #[tokio::test]
    async fn null_store_remembers_nothing() {
        let store = NullCheckpointStore;
        store
            .save_position("books", EventPosition::new(10, Utc::now()))
            .await
            .ok();
        #[allow(clippy::unwrap_used)]
        let loaded = store.load_position("books").await.unwrap();
        assert!(loaded.is_none());
    }
}
