//! `PostgreSQL` implementations of the document and checkpoint stores.
//!
//! Each projection gets its own table: `id` text primary key, `body` JSONB,
//! and the engine-owned columns (`version`, timestamps, `deleted_at`). The
//! version gate runs inside the SQL statement, so a zero-row outcome (a
//! duplicate or superseded event) costs one round trip and no locks.
//!
//! For true CQRS separation the projection store typically points at a
//! different database than the event store; both constructors accept either
//! a shared pool or a dedicated URL.

use crate::checkpoint::{CheckpointStore, EventPosition};
use crate::document::{
    ApplyOutcome, DocumentFilter, DocumentStore, ProjectionError, ReadDocument, Result,
};
use chrono::{DateTime, Utc};
use circulate_core::pagination::{Page, PageRequest, SortDirection};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

fn storage_err(context: &str, e: impl std::fmt::Display) -> ProjectionError {
    ProjectionError::Storage(format!("{context}: {e}"))
}

/// Guard against stray identifiers reaching dynamic SQL. Table and sort
/// names come from code, not users; this is a tripwire, not an escape hatch.
fn safe_identifier(name: &str) -> Result<&str> {
    if !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        Ok(name)
    } else {
        Err(ProjectionError::Storage(format!(
            "invalid identifier: {name}"
        )))
    }
}

/// PostgreSQL-backed document store for one projection.
#[derive(Clone)]
pub struct PostgresDocumentStore<T> {
    pool: PgPool,
    table: String,
    _body: PhantomData<fn() -> T>,
}

impl<T> PostgresDocumentStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool, table: String) -> Self {
        Self {
            pool,
            table,
            _body: PhantomData,
        }
    }

    /// Connect to a (possibly separate) projection database.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the connection fails.
    pub async fn connect(database_url: &str, table: String) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| storage_err("failed to connect", e))?;
        Ok(Self::new(pool, table))
    }

    /// Create this projection's table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if DDL fails.
    pub async fn ensure_schema(&self) -> Result<()> {
        let table = safe_identifier(&self.table)?;
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                version BIGINT NOT NULL,
                body JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                deleted_at TIMESTAMPTZ
            )"
        );
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_err("failed to create projection table", e))?;
        Ok(())
    }

    /// The underlying pool, for custom queries.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[allow(clippy::cast_sign_loss)] // Versions are written from u64.
    fn row_to_document(row: &PgRow) -> Result<ReadDocument<T>> {
        let body_json: serde_json::Value = row.get("body");
        let body = serde_json::from_value(body_json)
            .map_err(|e| ProjectionError::Serialization(format!("document body: {e}")))?;

        Ok(ReadDocument {
            id: row.get("id"),
            version: row.get::<i64, _>("version") as u64,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            deleted_at: row.get("deleted_at"),
            body,
        })
    }
}

impl<T> DocumentStore<T> for PostgresDocumentStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn apply(
        &self,
        id: &str,
        event_version: u64,
        event_time: DateTime<Utc>,
        body: &T,
    ) -> Result<ApplyOutcome> {
        let table = safe_identifier(&self.table)?;
        let body_json = serde_json::to_value(body)
            .map_err(|e| ProjectionError::Serialization(format!("document body: {e}")))?;
        #[allow(clippy::cast_possible_wrap)]
        let version = event_version as i64;

        let sql = format!(
            "INSERT INTO {table} (id, version, body, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $4)
             ON CONFLICT (id) DO UPDATE
             SET version = EXCLUDED.version,
                 body = EXCLUDED.body,
                 updated_at = EXCLUDED.updated_at
             WHERE {table}.version < EXCLUDED.version"
        );

        let result = sqlx::query(&sql)
            .bind(id)
            .bind(version)
            .bind(&body_json)
            .bind(event_time)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_err("failed to apply document", e))?;

        if result.rows_affected() == 0 {
            Ok(ApplyOutcome::Skipped)
        } else {
            Ok(ApplyOutcome::Applied)
        }
    }

    async fn soft_delete(
        &self,
        id: &str,
        event_version: u64,
        event_time: DateTime<Utc>,
    ) -> Result<ApplyOutcome> {
        let table = safe_identifier(&self.table)?;
        #[allow(clippy::cast_possible_wrap)]
        let version = event_version as i64;

        let sql = format!(
            "UPDATE {table}
             SET deleted_at = $3, version = $2, updated_at = $3
             WHERE id = $1 AND version < $2"
        );

        let result = sqlx::query(&sql)
            .bind(id)
            .bind(version)
            .bind(event_time)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_err("failed to soft-delete document", e))?;

        if result.rows_affected() == 0 {
            Ok(ApplyOutcome::Skipped)
        } else {
            Ok(ApplyOutcome::Applied)
        }
    }

    async fn get(&self, id: &str) -> Result<Option<ReadDocument<T>>> {
        let table = safe_identifier(&self.table)?;
        let sql = format!(
            "SELECT id, version, body, created_at, updated_at, deleted_at
             FROM {table}
             WHERE id = $1 AND deleted_at IS NULL"
        );

        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_err("failed to fetch document", e))?;

        row.as_ref().map(Self::row_to_document).transpose()
    }

    async fn get_any(&self, id: &str) -> Result<Option<ReadDocument<T>>> {
        let table = safe_identifier(&self.table)?;
        let sql = format!(
            "SELECT id, version, body, created_at, updated_at, deleted_at
             FROM {table}
             WHERE id = $1"
        );

        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_err("failed to fetch document", e))?;

        row.as_ref().map(Self::row_to_document).transpose()
    }

    async fn query(
        &self,
        filter: &DocumentFilter,
        page: &PageRequest,
    ) -> Result<Page<ReadDocument<T>>> {
        let table = safe_identifier(&self.table)?;

        // All equality filters collapse into one JSONB containment check.
        let mut containment = serde_json::Map::new();
        for (field, value) in &filter.equals {
            containment.insert(field.clone(), value.clone());
        }
        let containment = serde_json::Value::Object(containment);

        let order_column = match &page.sort_by {
            Some(field) => format!("body->>'{}'", safe_identifier(field)?),
            None => "created_at".to_string(),
        };
        let order_direction = match page.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };

        let count_sql =
            format!("SELECT COUNT(*) FROM {table} WHERE deleted_at IS NULL AND body @> $1");
        let (total,): (i64,) = sqlx::query_as(&count_sql)
            .bind(&containment)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| storage_err("failed to count documents", e))?;

        let select_sql = format!(
            "SELECT id, version, body, created_at, updated_at, deleted_at
             FROM {table}
             WHERE deleted_at IS NULL AND body @> $1
             ORDER BY {order_column} {order_direction}, id ASC
             LIMIT $2 OFFSET $3"
        );

        #[allow(clippy::cast_possible_wrap)]
        let rows = sqlx::query(&select_sql)
            .bind(&containment)
            .bind(i64::from(page.limit))
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_err("failed to query documents", e))?;

        let data: Vec<ReadDocument<T>> = rows
            .iter()
            .map(Self::row_to_document)
            .collect::<Result<_>>()?;

        #[allow(clippy::cast_sign_loss)]
        let total = total.max(0) as u64;
        Ok(Page::new(data, total, page))
    }
}

/// PostgreSQL-backed checkpoint tracking.
///
/// ```sql
/// CREATE TABLE projection_checkpoints (
///     projection_name TEXT PRIMARY KEY,
///     event_offset BIGINT NOT NULL,
///     event_timestamp TIMESTAMPTZ NOT NULL,
///     updated_at TIMESTAMPTZ NOT NULL
/// );
/// ```
#[derive(Clone)]
pub struct PostgresCheckpointStore {
    pool: PgPool,
}

impl PostgresCheckpointStore {
    /// Create a checkpoint store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the checkpoint table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Checkpoint`] if DDL fails.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS projection_checkpoints (
                projection_name TEXT PRIMARY KEY,
                event_offset BIGINT NOT NULL,
                event_timestamp TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ProjectionError::Checkpoint(format!("failed to create table: {e}")))?;
        Ok(())
    }
}

impl CheckpointStore for PostgresCheckpointStore {
    fn save_position(
        &self,
        projection_name: &str,
        position: EventPosition,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let projection_name = projection_name.to_string();
        Box::pin(async move {
            // u64 → i64: wrapping would need 2^63 events.
            #[allow(clippy::cast_possible_wrap)]
            let offset = position.offset as i64;

            sqlx::query(
                "INSERT INTO projection_checkpoints
                     (projection_name, event_offset, event_timestamp, updated_at)
                 VALUES ($1, $2, $3, now())
                 ON CONFLICT (projection_name) DO UPDATE
                 SET event_offset = EXCLUDED.event_offset,
                     event_timestamp = EXCLUDED.event_timestamp,
                     updated_at = now()",
            )
            .bind(projection_name)
            .bind(offset)
            .bind(position.timestamp)
            .execute(&self.pool)
            .await
            .map_err(|e| ProjectionError::Checkpoint(format!("failed to save: {e}")))?;

            Ok(())
        })
    }

    fn load_position(
        &self,
        projection_name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<EventPosition>>> + Send + '_>> {
        let projection_name = projection_name.to_string();
        Box::pin(async move {
            let row: Option<(i64, DateTime<Utc>)> = sqlx::query_as(
                "SELECT event_offset, event_timestamp
                 FROM projection_checkpoints
                 WHERE projection_name = $1",
            )
            .bind(projection_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ProjectionError::Checkpoint(format!("failed to load: {e}")))?;

            Ok(row.map(|(offset, timestamp)| {
                #[allow(clippy::cast_sign_loss)]
                let offset = offset as u64;
                EventPosition { offset, timestamp }
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_checked() {
        assert!(safe_identifier("book_read_models").is_ok());
        assert!(safe_identifier("userId").is_ok());
        assert!(safe_identifier("books; DROP TABLE events").is_err());
        assert!(safe_identifier("").is_err());
    }
}
