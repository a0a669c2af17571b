//! In-memory document store with the same version-gate semantics as the
//! Postgres implementation.

#![allow(clippy::unwrap_used)] // Test infrastructure: a poisoned lock is a failed test.

use chrono::{DateTime, Utc};
use circulate_core::pagination::{Page, PageRequest, SortDirection};
use circulate_projections::document::{
    ApplyOutcome, DocumentFilter, DocumentStore, ProjectionError, ReadDocument, Result,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

/// In-memory [`DocumentStore`]. Bodies are held as JSON so filters and
/// sorting behave exactly like the JSONB-backed production store.
#[derive(Clone, Debug)]
pub struct InMemoryDocumentStore<T> {
    documents: Arc<Mutex<HashMap<String, ReadDocument<serde_json::Value>>>>,
    _body: PhantomData<fn() -> T>,
}

impl<T> Default for InMemoryDocumentStore<T> {
    fn default() -> Self {
        Self {
            documents: Arc::new(Mutex::new(HashMap::new())),
            _body: PhantomData,
        }
    }
}

impl<T> InMemoryDocumentStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents, including soft-deleted ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.lock().unwrap().len()
    }

    /// Whether the store holds nothing at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.lock().unwrap().is_empty()
    }

    /// Drop everything (test isolation).
    pub fn clear(&self) {
        self.documents.lock().unwrap().clear();
    }

    fn decode(doc: &ReadDocument<serde_json::Value>) -> Result<ReadDocument<T>> {
        Ok(ReadDocument {
            id: doc.id.clone(),
            version: doc.version,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
            deleted_at: doc.deleted_at,
            body: serde_json::from_value(doc.body.clone())
                .map_err(|e| ProjectionError::Serialization(format!("document body: {e}")))?,
        })
    }
}

fn json_compare(a: &serde_json::Value, b: &serde_json::Value) -> Ordering {
    use serde_json::Value;
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (x, y) => x.to_string().cmp(&y.to_string()),
    }
}

impl<T> DocumentStore<T> for InMemoryDocumentStore<T>
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
        let body_json = serde_json::to_value(body)
            .map_err(|e| ProjectionError::Serialization(format!("document body: {e}")))?;

        let mut documents = self.documents.lock().unwrap();
        match documents.get_mut(id) {
            Some(existing) => {
                if existing.version >= event_version {
                    return Ok(ApplyOutcome::Skipped);
                }
                existing.version = event_version;
                existing.body = body_json;
                existing.updated_at = event_time;
                Ok(ApplyOutcome::Applied)
            }
            None => {
                documents.insert(
                    id.to_string(),
                    ReadDocument {
                        id: id.to_string(),
                        version: event_version,
                        created_at: event_time,
                        updated_at: event_time,
                        deleted_at: None,
                        body: body_json,
                    },
                );
                Ok(ApplyOutcome::Applied)
            }
        }
    }

    async fn soft_delete(
        &self,
        id: &str,
        event_version: u64,
        event_time: DateTime<Utc>,
    ) -> Result<ApplyOutcome> {
        let mut documents = self.documents.lock().unwrap();
        match documents.get_mut(id) {
            Some(existing) if existing.version < event_version => {
                existing.version = event_version;
                existing.deleted_at = Some(event_time);
                existing.updated_at = event_time;
                Ok(ApplyOutcome::Applied)
            }
            _ => Ok(ApplyOutcome::Skipped),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<ReadDocument<T>>> {
        let documents = self.documents.lock().unwrap();
        documents
            .get(id)
            .filter(|doc| doc.deleted_at.is_none())
            .map(Self::decode)
            .transpose()
    }

    async fn get_any(&self, id: &str) -> Result<Option<ReadDocument<T>>> {
        let documents = self.documents.lock().unwrap();
        documents.get(id).map(Self::decode).transpose()
    }

    async fn query(
        &self,
        filter: &DocumentFilter,
        page: &PageRequest,
    ) -> Result<Page<ReadDocument<T>>> {
        let documents = self.documents.lock().unwrap();

        let mut matched: Vec<&ReadDocument<serde_json::Value>> = documents
            .values()
            .filter(|doc| doc.deleted_at.is_none())
            .filter(|doc| {
                filter
                    .equals
                    .iter()
                    .all(|(field, value)| doc.body.get(field) == Some(value))
            })
            .collect();

        matched.sort_by(|a, b| {
            let ordering = match &page.sort_by {
                Some(field) => json_compare(
                    a.body.get(field).unwrap_or(&serde_json::Value::Null),
                    b.body.get(field).unwrap_or(&serde_json::Value::Null),
                ),
                None => a.created_at.cmp(&b.created_at),
            }
            // Stable tiebreak so pagination never straddles duplicates.
            .then_with(|| a.id.cmp(&b.id));

            match page.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        });

        let total = matched.len() as u64;
        let data: Vec<ReadDocument<T>> = matched
            .into_iter()
            .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
            .take(page.limit as usize)
            .map(Self::decode)
            .collect::<Result<_>>()?;

        Ok(Page::new(data, total, page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct TestBody {
        title: String,
        count: i64,
    }

    fn body(title: &str, count: i64) -> TestBody {
        TestBody {
            title: title.to_string(),
            count,
        }
    }

    #[tokio::test]
    async fn apply_inserts_then_gates_updates() {
        let store = InMemoryDocumentStore::<TestBody>::new();

        let outcome = store
            .apply("d-1", 1, Utc::now(), &body("one", 1))
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);

        // A newer event lands.
        let outcome = store
            .apply("d-1", 3, Utc::now(), &body("three", 3))
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);

        // A stale or duplicate event is skipped, not an error.
        let outcome = store
            .apply("d-1", 2, Utc::now(), &body("two", 2))
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Skipped);

        let doc = store.get("d-1").await.unwrap().unwrap();
        assert_eq!(doc.version, 3);
        assert_eq!(doc.body.title, "three");
    }

    #[tokio::test]
    async fn soft_delete_hides_from_reads() {
        let store = InMemoryDocumentStore::<TestBody>::new();
        store
            .apply("d-1", 1, Utc::now(), &body("one", 1))
            .await
            .unwrap();

        let outcome = store.soft_delete("d-1", 2, Utc::now()).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);

        assert!(store.get("d-1").await.unwrap().is_none());
        let any = store.get_any("d-1").await.unwrap().unwrap();
        assert!(any.deleted_at.is_some());
    }

    #[tokio::test]
    async fn soft_delete_is_version_gated_too() {
        let store = InMemoryDocumentStore::<TestBody>::new();
        store
            .apply("d-1", 5, Utc::now(), &body("five", 5))
            .await
            .unwrap();

        let outcome = store.soft_delete("d-1", 5, Utc::now()).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Skipped);
        assert!(store.get("d-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn query_filters_sorts_and_paginates() {
        let store = InMemoryDocumentStore::<TestBody>::new();
        for (i, title) in ["b", "a", "c"].iter().enumerate() {
            store
                .apply(
                    &format!("d-{i}"),
                    1,
                    Utc::now(),
                    &body(title, i as i64),
                )
                .await
                .unwrap();
        }

        let page = store
            .query(
                &DocumentFilter::all(),
                &PageRequest {
                    page: 1,
                    limit: 2,
                    sort_by: Some("title".to_string()),
                    direction: SortDirection::Asc,
                },
            )
            .await
            .unwrap();

        assert_eq!(page.pagination.total, 3);
        assert_eq!(page.pagination.pages, 2);
        assert!(page.pagination.has_next);
        let titles: Vec<&str> = page.data.iter().map(|d| d.body.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "b"]);

        let filtered = store
            .query(
                &DocumentFilter::all().field("title", "c"),
                &PageRequest::first(10),
            )
            .await
            .unwrap();
        assert_eq!(filtered.pagination.total, 1);
        assert_eq!(filtered.data[0].body.count, 2);
    }
}
