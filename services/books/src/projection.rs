//! The books read model: projection handlers and the query API.

use circulate_core::config::EngineSettings;
use circulate_core::event::EventEnvelope;
use circulate_core::money::Money;
use circulate_core::pagination::{Page, PageRequest};
use circulate_domain::events::BookEvent;
use circulate_domain::ids::{BookId, Isbn};
use circulate_projections::cache::QueryCache;
use circulate_projections::document::{
    DocumentFilter, DocumentStore, ProjectionError, ReadDocument, Result,
};
use circulate_projections::engine::Projection;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

/// Table/collection name for the books read model.
pub const BOOK_READ_MODELS: &str = "book_read_models";

/// The projected state of one book.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookRecord {
    /// The book's aggregate id.
    pub book_id: BookId,
    /// Opaque unique key.
    pub isbn: Isbn,
    /// Title.
    pub title: String,
    /// Author.
    pub author: String,
    /// Publication year.
    pub publication_year: i32,
    /// Publisher.
    pub publisher: String,
    /// Retail price.
    pub price: Money,
}

/// Folds book events into [`BookRecord`] documents.
pub struct BookProjection<S> {
    documents: Arc<S>,
}

impl<S> BookProjection<S>
where
    S: DocumentStore<BookRecord> + 'static,
{
    /// Create the projection over its document store.
    #[must_use]
    pub const fn new(documents: Arc<S>) -> Self {
        Self { documents }
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        let event: BookEvent = envelope
            .decode()
            .map_err(|e| ProjectionError::Serialization(e.to_string()))?;
        let id = envelope.aggregate_id.as_str();
        let version = envelope.version.value();
        let at = envelope.timestamp;

        match event {
            BookEvent::BookCreated {
                book_id,
                isbn,
                title,
                author,
                publication_year,
                publisher,
                price,
                ..
            } => {
                let record = BookRecord {
                    book_id,
                    isbn,
                    title,
                    author,
                    publication_year,
                    publisher,
                    price,
                };
                self.documents.apply(id, version, at, &record).await?;
            }
            BookEvent::BookUpdated { updated, .. } => {
                // No document yet means a later event already carried the
                // full state or the create is still in flight elsewhere;
                // the version gate makes skipping safe.
                let Some(doc) = self.documents.get_any(id).await? else {
                    return Ok(());
                };
                let mut record = doc.body;
                if let Some(title) = updated.title {
                    record.title = title;
                }
                if let Some(author) = updated.author {
                    record.author = author;
                }
                if let Some(year) = updated.publication_year {
                    record.publication_year = year;
                }
                if let Some(publisher) = updated.publisher {
                    record.publisher = publisher;
                }
                if let Some(price) = updated.price {
                    record.price = price;
                }
                self.documents.apply(id, version, at, &record).await?;
            }
            BookEvent::BookRetailPriceUpdated { price, .. } => {
                let Some(doc) = self.documents.get_any(id).await? else {
                    return Ok(());
                };
                let mut record = doc.body;
                record.price = price;
                self.documents.apply(id, version, at, &record).await?;
            }
            BookEvent::BookDeleted { .. } => {
                self.documents.soft_delete(id, version, at).await?;
            }
        }

        Ok(())
    }
}

impl<S> Projection for BookProjection<S>
where
    S: DocumentStore<BookRecord> + 'static,
{
    fn name(&self) -> &str {
        BOOK_READ_MODELS
    }

    fn event_types(&self) -> &'static [&'static str] {
        &[
            "BookCreated",
            "BookUpdated",
            "BookRetailPriceUpdated",
            "BookDeleted",
        ]
    }

    fn apply(&self, envelope: &EventEnvelope) -> impl Future<Output = Result<()>> + Send {
        self.handle(envelope)
    }
}

/// The books query API, with the read-through TTL cache in front.
pub struct BookQueries<S> {
    documents: Arc<S>,
    cache: Arc<QueryCache>,
    settings: EngineSettings,
}

impl<S> BookQueries<S>
where
    S: DocumentStore<BookRecord> + 'static,
{
    /// Create the query API.
    #[must_use]
    pub fn new(documents: Arc<S>, cache: Arc<QueryCache>, settings: EngineSettings) -> Self {
        Self {
            documents,
            cache,
            settings,
        }
    }

    /// Fetch one book; soft-deleted books are invisible.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] on backend failures.
    pub async fn get_book(&self, book_id: &BookId) -> Result<Option<ReadDocument<BookRecord>>> {
        let key = QueryCache::key("/books/get", &[("id", book_id.to_string())]);
        if let Some(hit) = self.cache.get(&key) {
            if let Ok(doc) = serde_json::from_value(hit) {
                return Ok(Some(doc));
            }
        }

        let doc = self.documents.get(&book_id.to_string()).await?;
        if let Some(doc) = &doc {
            if let Ok(value) = serde_json::to_value(doc) {
                self.cache.insert(key, value);
            }
        }
        Ok(doc)
    }

    /// Paginated catalog listing with optional author/publisher filters.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] on backend failures.
    pub async fn list_books(
        &self,
        author: Option<&str>,
        publisher: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<ReadDocument<BookRecord>>> {
        let page = page.clamped(&self.settings);

        let mut params = vec![
            ("page", page.page.to_string()),
            ("limit", page.limit.to_string()),
        ];
        if let Some(author) = author {
            params.push(("author", author.to_string()));
        }
        if let Some(publisher) = publisher {
            params.push(("publisher", publisher.to_string()));
        }
        if let Some(sort) = &page.sort_by {
            params.push(("sort", sort.clone()));
        }
        let key = QueryCache::key("/books", &params);

        if let Some(hit) = self.cache.get(&key) {
            if let Ok(cached) = serde_json::from_value(hit) {
                return Ok(cached);
            }
        }

        let mut filter = DocumentFilter::all();
        if let Some(author) = author {
            filter = filter.field("author", author);
        }
        if let Some(publisher) = publisher {
            filter = filter.field("publisher", publisher);
        }

        let result = self.documents.query(&filter, &page).await?;
        if let Ok(value) = serde_json::to_value(&result) {
            self.cache.insert(key, value);
        }
        Ok(result)
    }
}
