//! The canonical command-handling cycle, shared by every service.
//!
//! One logical operation always runs the same way:
//!
//! 1. Load the stream and rehydrate a throwaway aggregate
//! 2. Let the decision function validate and record events
//! 3. Append the recorded events under the rehydrated version
//! 4. Publish each recorded envelope (append strictly precedes publish)
//! 5. Clear the uncommitted buffer
//!
//! A lost optimistic-concurrency race re-runs the *whole* cycle (fresh
//! load, fresh decision) a bounded number of times before surfacing
//! `CONCURRENCY_CONFLICT`. Nothing else is retried here: domain errors are
//! final and infrastructure errors propagate.
//!
//! Publication is for low-latency push, not for correctness: once the append
//! committed, the command succeeded. Publish failures are logged and the
//! events republished by operational tooling; consumers are idempotent, so
//! duplicates are harmless.

use crate::aggregate::{Aggregate, AggregateRoot};
use crate::environment::Clock;
use crate::error::{CommandReceipt, DomainError, ErrorKind};
use crate::event::EventMetadata;
use crate::event_bus::EventBus;
use crate::event_store::EventStore;
use crate::retry::{RetryPolicy, retry_with_predicate};
use crate::stream::StreamId;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Default deadline for each store operation within a cycle.
const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs command cycles against the shared store and bus.
///
/// One runner serves a whole service (and its reactors); it is cheap to
/// clone and carries no per-aggregate state.
#[derive(Clone)]
pub struct CommandRunner {
    store: Arc<dyn EventStore>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    op_timeout: Duration,
}

impl CommandRunner {
    /// Create a runner with the default conflict-retry policy.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>, bus: Arc<dyn EventBus>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            bus,
            clock,
            retry: RetryPolicy::conflict_default(),
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }

    /// Override the conflict-retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override the per-operation store deadline. Aborting an append at the
    /// deadline cannot tear the log: appends are atomic, so the batch either
    /// committed or it did not.
    #[must_use]
    pub const fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    /// The shared event store, for secondary-key lookups at creation time.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// The clock this runner stamps event time with.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Run one command cycle, returning the receipt alone.
    ///
    /// # Errors
    ///
    /// Domain errors from `decide`, `CONCURRENCY_CONFLICT` once retries are
    /// exhausted, or infrastructure kinds from the store.
    pub async fn execute<A, F>(
        &self,
        topic: &str,
        stream_id: StreamId,
        correlation_id: Option<String>,
        decide: F,
    ) -> Result<CommandReceipt, DomainError>
    where
        A: Aggregate,
        F: Fn(&mut AggregateRoot<A>, DateTime<Utc>) -> Result<(), DomainError> + Send + Sync,
    {
        self.execute_returning(topic, stream_id, correlation_id, move |root, now| {
            decide(root, now)
        })
        .await
        .map(|(receipt, ())| receipt)
    }

    /// Run one command cycle whose decision also computes a caller value
    /// (e.g. the return-flow response payload).
    ///
    /// `decide` may record zero events, in which case nothing is appended or
    /// published and the receipt reports the current version; this is the
    /// idempotent skip reactors rely on.
    ///
    /// # Errors
    ///
    /// Domain errors from `decide`, `CONCURRENCY_CONFLICT` once retries are
    /// exhausted, or infrastructure kinds from the store.
    pub async fn execute_returning<A, F, R>(
        &self,
        topic: &str,
        stream_id: StreamId,
        correlation_id: Option<String>,
        decide: F,
    ) -> Result<(CommandReceipt, R), DomainError>
    where
        A: Aggregate,
        F: Fn(&mut AggregateRoot<A>, DateTime<Utc>) -> Result<R, DomainError> + Send + Sync,
    {
        retry_with_predicate(
            self.retry.clone(),
            || self.attempt(topic, &stream_id, correlation_id.as_deref(), &decide),
            DomainError::is_retryable,
        )
        .await
    }

    async fn attempt<A, F, R>(
        &self,
        topic: &str,
        stream_id: &StreamId,
        correlation_id: Option<&str>,
        decide: &F,
    ) -> Result<(CommandReceipt, R), DomainError>
    where
        A: Aggregate,
        F: Fn(&mut AggregateRoot<A>, DateTime<Utc>) -> Result<R, DomainError> + Send + Sync,
    {
        let events = tokio::time::timeout(self.op_timeout, self.store.load_events(stream_id.clone()))
            .await
            .map_err(|_| {
                DomainError::new(ErrorKind::EventLookupFailed, "stream read timed out")
            })??;
        let mut root = AggregateRoot::<A>::rehydrate(stream_id.clone(), &events)
            .map_err(|e| DomainError::new(ErrorKind::InternalError, e.to_string()))?;

        let now = self.clock.now();
        let value = decide(&mut root, now)?;

        if root.uncommitted_events().is_empty() {
            // Nothing to change: the decision found its outcome already
            // recorded (duplicate delivery) or intentionally declined to act.
            return Ok((CommandReceipt::new(stream_id.clone(), root.version()), value));
        }

        let metadata = EventMetadata::with_correlation(correlation_id.map(str::to_string));
        let pending = root
            .pending_events(now, &metadata)
            .map_err(|e| DomainError::new(ErrorKind::InternalError, e.to_string()))?;

        let recorded = tokio::time::timeout(
            self.op_timeout,
            self.store
                .append_events(stream_id.clone(), root.version(), pending),
        )
        .await
        .map_err(|_| DomainError::new(ErrorKind::EventSaveFailed, "append timed out"))??;
        root.clear_uncommitted();

        let version = recorded.last().map_or(root.version(), |e| e.version);

        for envelope in &recorded {
            if let Err(e) = self.bus.publish(topic, envelope).await {
                // The event is committed; delivery catches up via replay.
                tracing::warn!(
                    topic = topic,
                    event = %envelope,
                    error = %e,
                    "Publish failed after append"
                );
            }
        }

        Ok((CommandReceipt::new(stream_id.clone(), version), value))
    }
}

#[cfg(test)]
mod tests {
    // The runner is exercised end to end by the service crates against the
    // in-memory store and bus; the pure pieces it composes (retry policy,
    // aggregate root, error conversion) are unit-tested in their own
    // modules.
}
