//! The production event store over `PostgreSQL`.
//!
//! Events live in a single `events` table keyed `(stream_id, version)`. The
//! append path is optimistic: read the stream's max version, compare against
//! the caller's expectation, insert the batch in one transaction. A
//! concurrent writer that slips between the read and the insert trips the
//! primary-key constraint, which maps to `DuplicateEvent`: same outcome as
//! losing the precheck, detected one step later.
//!
//! `global_version` comes from a database sequence and `stored` from
//! `clock_timestamp()`, both assigned by the INSERT itself so the two stamps
//! travel together.

use chrono::{DateTime, Utc};
use circulate_core::event::{EventEnvelope, EventMetadata, NewEvent};
use circulate_core::event_store::{EventStore, EventStoreError};
use circulate_core::stream::{StreamId, Version};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use std::future::Future;
use std::pin::Pin;

/// Postgres unique-violation SQLSTATE.
const UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL-backed [`EventStore`].
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the event-store database.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::SaveFailed`] if the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self, EventStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| EventStoreError::SaveFailed(format!("failed to connect: {e}")))?;
        Ok(Self::from_pool(pool))
    }

    /// Run the embedded migrations (events + failed_events tables).
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::SaveFailed`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), EventStoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| EventStoreError::SaveFailed(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying pool (shared with the dead-letter queue).
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[allow(clippy::cast_sign_loss)] // Versions are written from unsigned values.
    fn row_to_envelope(row: &PgRow) -> Result<EventEnvelope, EventStoreError> {
        let metadata_json: serde_json::Value = row.get("metadata");
        let correlation_id = metadata_json
            .get("correlationId")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        let stored: DateTime<Utc> = row.get("stored");

        Ok(EventEnvelope {
            aggregate_id: StreamId::new(row.get::<String, _>("stream_id")),
            event_type: row.get("event_type"),
            version: Version::new(row.get::<i64, _>("version") as u64),
            global_version: row.get::<i64, _>("global_version") as u64,
            timestamp: row.get("timestamp"),
            schema_version: u16::try_from(row.get::<i32, _>("schema_version")).unwrap_or(1),
            payload: row.get("payload"),
            metadata: EventMetadata {
                correlation_id,
                stored: Some(stored),
            },
        })
    }
}

impl EventStore for PostgresEventStore {
    fn append_events(
        &self,
        stream_id: StreamId,
        expected_version: Version,
        events: Vec<NewEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<EventEnvelope>, EventStoreError>> + Send + '_>>
    {
        Box::pin(async move {
            if events.is_empty() {
                return Ok(Vec::new());
            }

            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| EventStoreError::SaveFailed(format!("begin failed: {e}")))?;

            let (current,): (i64,) = sqlx::query_as(
                "SELECT COALESCE(MAX(version), 0) FROM events WHERE stream_id = $1",
            )
            .bind(stream_id.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| EventStoreError::SaveFailed(format!("version read failed: {e}")))?;

            #[allow(clippy::cast_sign_loss)]
            let actual = Version::new(current.max(0) as u64);
            if actual != expected_version {
                metrics::counter!("event_store.concurrency_conflicts").increment(1);
                return Err(EventStoreError::ConcurrencyConflict {
                    stream_id,
                    expected: expected_version,
                    actual,
                });
            }

            let mut recorded = Vec::with_capacity(events.len());
            for (i, event) in events.into_iter().enumerate() {
                let version = expected_version + (i as u64 + 1);
                let metadata_json = serde_json::json!({
                    "correlationId": event.metadata.correlation_id,
                });

                #[allow(clippy::cast_possible_wrap)]
                let insert = sqlx::query(
                    "INSERT INTO events
                         (stream_id, version, event_type, schema_version,
                          timestamp, payload, metadata, stored)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, clock_timestamp())
                     RETURNING global_version, stored",
                )
                .bind(stream_id.as_str())
                .bind(version.value() as i64)
                .bind(&event.event_type)
                .bind(i32::from(event.schema_version))
                .bind(event.timestamp)
                .bind(&event.payload)
                .bind(&metadata_json)
                .fetch_one(&mut *tx)
                .await;

                let row = match insert {
                    Ok(row) => row,
                    Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                        metrics::counter!("event_store.duplicate_events").increment(1);
                        return Err(EventStoreError::DuplicateEvent { stream_id, version });
                    }
                    Err(e) => {
                        return Err(EventStoreError::SaveFailed(format!("insert failed: {e}")));
                    }
                };

                #[allow(clippy::cast_sign_loss)]
                let global_version = row.get::<i64, _>("global_version") as u64;
                let stored: DateTime<Utc> = row.get("stored");

                recorded.push(EventEnvelope {
                    aggregate_id: stream_id.clone(),
                    event_type: event.event_type,
                    version,
                    global_version,
                    timestamp: event.timestamp,
                    schema_version: event.schema_version,
                    payload: event.payload,
                    metadata: EventMetadata {
                        correlation_id: event.metadata.correlation_id,
                        stored: Some(stored),
                    },
                });
            }

            tx.commit()
                .await
                .map_err(|e| EventStoreError::SaveFailed(format!("commit failed: {e}")))?;

            metrics::counter!("event_store.events_appended").increment(recorded.len() as u64);
            tracing::debug!(
                stream_id = %stream_id,
                count = recorded.len(),
                "Events appended"
            );

            Ok(recorded)
        })
    }

    fn load_events(
        &self,
        stream_id: StreamId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<EventEnvelope>, EventStoreError>> + Send + '_>>
    {
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT stream_id, version, global_version, event_type, schema_version,
                        timestamp, payload, metadata, stored
                 FROM events
                 WHERE stream_id = $1
                 ORDER BY version ASC",
            )
            .bind(stream_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EventStoreError::LookupFailed(format!("stream read failed: {e}")))?;

            rows.iter().map(Self::row_to_envelope).collect()
        })
    }

    fn find_latest_by_payload_field(
        &self,
        event_type: &str,
        field: &str,
        value: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StreamId>, EventStoreError>> + Send + '_>>
    {
        let event_type = event_type.to_string();
        let field = field.to_string();
        let value = value.to_string();

        Box::pin(async move {
            // The NOT EXISTS clause is the deletion tolerance: a later
            // tombstone on the same stream hides the match.
            let row: Option<(String,)> = sqlx::query_as(
                "SELECT e.stream_id
                 FROM events e
                 WHERE e.event_type = $1
                   AND e.payload->>$2 = $3
                   AND NOT EXISTS (
                       SELECT 1 FROM events d
                       WHERE d.stream_id = e.stream_id
                         AND d.version > e.version
                         AND d.event_type LIKE '%Deleted'
                   )
                 ORDER BY e.global_version DESC
                 LIMIT 1",
            )
            .bind(&event_type)
            .bind(&field)
            .bind(&value)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| EventStoreError::LookupFailed(format!("payload lookup failed: {e}")))?;

            Ok(row.map(|(stream_id,)| StreamId::new(stream_id)))
        })
    }
}
