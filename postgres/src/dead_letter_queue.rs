//! Dead-letter queue for deliveries a projection could not process.
//!
//! After the projection engine exhausts its retries on a transient failure,
//! the delivery is parked here and acknowledged so the rest of the queue
//! keeps flowing. Entries carry the full envelope plus failure metadata for
//! incident response and manual reprocessing.

use chrono::{DateTime, Utc};
use circulate_core::event::{EventEnvelope, EventMetadata};
use circulate_core::event_store::EventStoreError;
use circulate_core::stream::{StreamId, Version};
use circulate_projections::document::{ProjectionError, Result as ProjectionResult};
use circulate_projections::engine::DeadLetterSink;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use std::future::Future;
use std::pin::Pin;

/// Status of a parked delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DlqStatus {
    /// Awaiting investigation or reprocessing.
    Pending,
    /// Currently being reprocessed.
    Processing,
    /// Successfully reprocessed.
    Resolved,
    /// Permanently discarded (cannot be fixed).
    Discarded,
}

impl DlqStatus {
    /// The database tag for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse the database tag.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::LookupFailed`] for an unknown tag.
    pub fn parse(s: &str) -> Result<Self, EventStoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            other => Err(EventStoreError::LookupFailed(format!(
                "invalid DLQ status: {other}"
            ))),
        }
    }
}

/// A parked delivery.
#[derive(Debug, Clone)]
pub struct FailedEvent {
    /// DLQ entry id.
    pub id: i64,
    /// The consumer group that failed to process it.
    pub consumer_group: String,
    /// The envelope as delivered.
    pub envelope: EventEnvelope,
    /// Error message from the final attempt.
    pub error_message: String,
    /// Retries attempted before parking.
    pub retry_count: i32,
    /// When this delivery first failed.
    pub first_failed_at: DateTime<Utc>,
    /// When it most recently failed.
    pub last_failed_at: DateTime<Utc>,
    /// Current workflow status.
    pub status: DlqStatus,
    /// When the failure was resolved, if it was.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who or what resolved it.
    pub resolved_by: Option<String>,
    /// Resolution notes.
    pub resolution_notes: Option<String>,
}

/// `PostgreSQL`-backed dead-letter queue.
pub struct DeadLetterQueue {
    pool: PgPool,
}

impl DeadLetterQueue {
    /// Create a DLQ over an existing pool (usually the event store's).
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Park a delivery.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::SaveFailed`] if the insert fails.
    pub async fn add_entry(
        &self,
        consumer_group: &str,
        envelope: &EventEnvelope,
        error_message: &str,
        retry_count: i32,
    ) -> Result<i64, EventStoreError> {
        let metadata_json = serde_json::json!({
            "correlationId": envelope.metadata.correlation_id,
            "stored": envelope.metadata.stored,
        });

        #[allow(clippy::cast_possible_wrap)]
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO failed_events (
                 consumer_group, stream_id, version, event_type, payload,
                 metadata, original_timestamp, error_message, retry_count
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING id",
        )
        .bind(consumer_group)
        .bind(envelope.aggregate_id.as_str())
        .bind(envelope.version.value() as i64)
        .bind(&envelope.event_type)
        .bind(&envelope.payload)
        .bind(&metadata_json)
        .bind(envelope.timestamp)
        .bind(error_message)
        .bind(retry_count)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| EventStoreError::SaveFailed(e.to_string()))?;

        tracing::warn!(
            dlq_id = id,
            consumer_group = consumer_group,
            event = %envelope,
            error = error_message,
            retry_count = retry_count,
            "Delivery parked in dead-letter queue"
        );

        metrics::counter!("dlq.parked", "event_type" => envelope.event_type.clone()).increment(1);

        Ok(id)
    }

    /// List pending entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::LookupFailed`] if the query fails.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<FailedEvent>, EventStoreError> {
        self.list_by_status(DlqStatus::Pending, limit).await
    }

    /// List entries by status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::LookupFailed`] if the query fails.
    pub async fn list_by_status(
        &self,
        status: DlqStatus,
        limit: usize,
    ) -> Result<Vec<FailedEvent>, EventStoreError> {
        #[allow(clippy::cast_possible_wrap)]
        let rows = sqlx::query(
            "SELECT id, consumer_group, stream_id, version, event_type, payload,
                    metadata, original_timestamp, error_message, retry_count,
                    first_failed_at, last_failed_at, status,
                    resolved_at, resolved_by, resolution_notes
             FROM failed_events
             WHERE status = $1
             ORDER BY first_failed_at ASC
             LIMIT $2",
        )
        .bind(status.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EventStoreError::LookupFailed(e.to_string()))?;

        rows.iter().map(Self::row_to_failed_event).collect()
    }

    /// Fetch one entry by id.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::LookupFailed`] if the query fails or the
    /// entry does not exist.
    pub async fn get_by_id(&self, id: i64) -> Result<FailedEvent, EventStoreError> {
        let row = sqlx::query(
            "SELECT id, consumer_group, stream_id, version, event_type, payload,
                    metadata, original_timestamp, error_message, retry_count,
                    first_failed_at, last_failed_at, status,
                    resolved_at, resolved_by, resolution_notes
             FROM failed_events
             WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| EventStoreError::LookupFailed(e.to_string()))?;

        Self::row_to_failed_event(&row)
    }

    /// Move an entry to a new status.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::SaveFailed`] if the update fails.
    pub async fn update_status(&self, id: i64, status: DlqStatus) -> Result<(), EventStoreError> {
        sqlx::query(
            "UPDATE failed_events
             SET status = $1, last_failed_at = now()
             WHERE id = $2",
        )
        .bind(status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| EventStoreError::SaveFailed(e.to_string()))?;

        tracing::info!(dlq_id = id, status = status.as_str(), "DLQ entry status updated");
        Ok(())
    }

    /// Mark an entry resolved.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::SaveFailed`] if the update fails.
    pub async fn mark_resolved(
        &self,
        id: i64,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<(), EventStoreError> {
        sqlx::query(
            "UPDATE failed_events
             SET status = 'resolved',
                 resolved_at = now(),
                 resolved_by = $1,
                 resolution_notes = $2
             WHERE id = $3",
        )
        .bind(resolved_by)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| EventStoreError::SaveFailed(e.to_string()))?;

        tracing::info!(dlq_id = id, resolved_by = resolved_by, "DLQ entry resolved");
        metrics::counter!("dlq.resolved").increment(1);
        Ok(())
    }

    /// Mark an entry permanently discarded.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::SaveFailed`] if the update fails.
    pub async fn mark_discarded(&self, id: i64, reason: &str) -> Result<(), EventStoreError> {
        sqlx::query(
            "UPDATE failed_events
             SET status = 'discarded',
                 resolved_at = now(),
                 resolution_notes = $1
             WHERE id = $2",
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| EventStoreError::SaveFailed(e.to_string()))?;

        tracing::warn!(dlq_id = id, reason = reason, "DLQ entry discarded");
        metrics::counter!("dlq.discarded").increment(1);
        Ok(())
    }

    /// Count of pending entries, for monitoring.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::LookupFailed`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, EventStoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM failed_events WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| EventStoreError::LookupFailed(e.to_string()))?;
        Ok(count)
    }

    fn row_to_failed_event(row: &PgRow) -> Result<FailedEvent, EventStoreError> {
        let status_str: String = row.get("status");
        let status = DlqStatus::parse(&status_str)?;

        let metadata_json: serde_json::Value = row.get("metadata");
        let correlation_id = metadata_json
            .get("correlationId")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();

        #[allow(clippy::cast_sign_loss)]
        let envelope = EventEnvelope {
            aggregate_id: StreamId::new(row.get::<String, _>("stream_id")),
            event_type: row.get("event_type"),
            version: Version::new(row.get::<i64, _>("version") as u64),
            // The log's global version is not tracked here; 0 marks "unknown".
            global_version: 0,
            timestamp: row.get("original_timestamp"),
            schema_version: 1,
            payload: row.get("payload"),
            metadata: EventMetadata {
                correlation_id,
                stored: None,
            },
        };

        Ok(FailedEvent {
            id: row.get("id"),
            consumer_group: row.get("consumer_group"),
            envelope,
            error_message: row.get("error_message"),
            retry_count: row.get("retry_count"),
            first_failed_at: row.get("first_failed_at"),
            last_failed_at: row.get("last_failed_at"),
            status,
            resolved_at: row.get("resolved_at"),
            resolved_by: row.get("resolved_by"),
            resolution_notes: row.get("resolution_notes"),
        })
    }
}

impl DeadLetterSink for DeadLetterQueue {
    fn park(
        &self,
        consumer_group: &str,
        envelope: &EventEnvelope,
        error: &str,
        retry_count: u32,
    ) -> Pin<Box<dyn Future<Output = ProjectionResult<()>> + Send + '_>> {
        let consumer_group = consumer_group.to_string();
        let envelope = envelope.clone();
        let error = error.to_string();

        Box::pin(async move {
            self.add_entry(
                &consumer_group,
                &envelope,
                &error,
                i32::try_from(retry_count).unwrap_or(i32::MAX),
            )
            .await
            .map(|_| ())
            .map_err(|e| ProjectionError::Storage(e.to_string()))
        })
    }
}
