//! Book command handlers: create, update, delete.
//!
//! Each handler runs the canonical cycle via [`CommandRunner`]; ISBN
//! uniqueness is the one check that happens outside the aggregate, against
//! the whole log, because no single stream can see other books.

use circulate_core::command::CommandRunner;
use circulate_core::error::{CommandReceipt, DomainError, ErrorKind};
use circulate_core::money::Money;
use circulate_domain::book::{Book, BookDraft, BookPatch};
use circulate_domain::ids::{BookId, Isbn};

/// Topic carrying book events.
pub const BOOK_EVENTS_TOPIC: &str = "book-events";

/// Input for [`BookCommandService::create_book`].
#[derive(Clone, Debug)]
pub struct CreateBook {
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

/// The Books service's command side.
#[derive(Clone)]
pub struct BookCommandService {
    runner: CommandRunner,
}

impl BookCommandService {
    /// Create the service.
    #[must_use]
    pub const fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    /// Register a new book reference.
    ///
    /// # Errors
    ///
    /// - `BOOK_ALREADY_EXISTS` when a live book already carries this ISBN
    /// - `VALIDATION_ERROR` for field-level violations
    /// - store kinds on infrastructure failures
    pub async fn create_book(
        &self,
        input: CreateBook,
        correlation_id: Option<String>,
    ) -> Result<CommandReceipt, DomainError> {
        if input.isbn.is_empty() {
            return Err(DomainError::validation("isbn cannot be empty"));
        }

        // Secondary-key uniqueness across the whole log; a deleted book
        // frees its ISBN.
        if let Some(existing) = self
            .runner
            .store()
            .find_latest_by_payload_field("BookCreated", "isbn", input.isbn.as_str())
            .await?
        {
            return Err(DomainError::new(
                ErrorKind::BookAlreadyExists,
                format!("a book with ISBN {} already exists", input.isbn),
            )
            .with_details(serde_json::json!({
                "isbn": input.isbn.as_str(),
                "bookId": existing.as_str(),
            })));
        }

        let book_id = BookId::new();
        self.runner
            .execute::<Book, _>(
                BOOK_EVENTS_TOPIC,
                book_id.stream_id(),
                correlation_id,
                move |root, now| {
                    let draft = BookDraft {
                        book_id,
                        isbn: input.isbn.clone(),
                        title: input.title.clone(),
                        author: input.author.clone(),
                        publication_year: input.publication_year,
                        publisher: input.publisher.clone(),
                        price: input.price,
                    };
                    let event = root.state().create(draft, now)?;
                    root.record(event);
                    Ok(())
                },
            )
            .await
    }

    /// Change fields on an existing book.
    ///
    /// # Errors
    ///
    /// - `BOOK_NOT_FOUND` / `BOOK_ALREADY_DELETED`
    /// - `VALIDATION_ERROR` for an empty or invalid patch
    /// - `CONCURRENCY_CONFLICT` once retries are exhausted
    pub async fn update_book(
        &self,
        book_id: BookId,
        patch: BookPatch,
        correlation_id: Option<String>,
    ) -> Result<CommandReceipt, DomainError> {
        self.runner
            .execute::<Book, _>(
                BOOK_EVENTS_TOPIC,
                book_id.stream_id(),
                correlation_id,
                move |root, now| {
                    let events = root.state().update(patch.clone(), now)?;
                    for event in events {
                        root.record(event);
                    }
                    Ok(())
                },
            )
            .await
    }

    /// Remove a book from the catalog.
    ///
    /// # Errors
    ///
    /// - `BOOK_NOT_FOUND` / `BOOK_ALREADY_DELETED`
    pub async fn delete_book(
        &self,
        book_id: BookId,
        correlation_id: Option<String>,
    ) -> Result<CommandReceipt, DomainError> {
        self.runner
            .execute::<Book, _>(
                BOOK_EVENTS_TOPIC,
                book_id.stream_id(),
                correlation_id,
                |root, now| {
                    let event = root.state().delete(now)?;
                    root.record(event);
                    Ok(())
                },
            )
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use circulate_core::stream::Version;
    use circulate_testing::{InMemoryEventBus, InMemoryEventStore, test_clock};
    use std::sync::Arc;

    fn service() -> (BookCommandService, InMemoryEventStore, InMemoryEventBus) {
        let store = InMemoryEventStore::new();
        let bus = InMemoryEventBus::new();
        let runner = CommandRunner::new(
            Arc::new(store.clone()),
            Arc::new(bus.clone()),
            Arc::new(test_clock()),
        );
        (BookCommandService::new(runner), store, bus)
    }

    fn create_input(isbn: &str) -> CreateBook {
        CreateBook {
            isbn: Isbn::new(isbn),
            title: "The Rust Programming Language".to_string(),
            author: "Klabnik & Nichols".to_string(),
            publication_year: 2019,
            publisher: "No Starch".to_string(),
            price: Money::from_units(27),
        }
    }

    #[tokio::test]
    async fn create_appends_and_publishes() {
        let (service, store, bus) = service();

        let receipt = service
            .create_book(create_input("isbn-1"), Some("corr-1".to_string()))
            .await
            .unwrap();

        assert_eq!(receipt.version, Version::new(1));
        assert_eq!(store.event_count(), 1);

        let published = bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "book-events");
        assert_eq!(published[0].1.event_type, "BookCreated");
        assert_eq!(published[0].1.metadata.correlation_id, "corr-1");
    }

    #[tokio::test]
    async fn duplicate_isbn_is_rejected() {
        let (service, _store, _bus) = service();

        service
            .create_book(create_input("isbn-1"), None)
            .await
            .unwrap();
        let err = service
            .create_book(create_input("isbn-1"), None)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::BookAlreadyExists);
    }

    #[tokio::test]
    async fn deleting_frees_the_isbn() {
        let (service, _store, _bus) = service();

        let receipt = service
            .create_book(create_input("isbn-1"), None)
            .await
            .unwrap();
        let book_id = BookId::from_uuid(receipt.aggregate_id.as_str().parse().unwrap());
        service.delete_book(book_id, None).await.unwrap();

        // The tombstone hides the old ISBN from the uniqueness lookup.
        service
            .create_book(create_input("isbn-1"), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn price_update_appends_two_events() {
        let (service, store, bus) = service();

        let receipt = service
            .create_book(create_input("isbn-1"), None)
            .await
            .unwrap();
        let book_id = BookId::from_uuid(receipt.aggregate_id.as_str().parse().unwrap());

        let receipt = service
            .update_book(
                book_id,
                BookPatch {
                    price: Some(Money::from_units(30)),
                    ..BookPatch::default()
                },
                None,
            )
            .await
            .unwrap();

        // BookUpdated + BookRetailPriceUpdated in one atomic append.
        assert_eq!(receipt.version, Version::new(3));
        assert_eq!(store.event_count(), 3);
        let types: Vec<String> = bus
            .published()
            .iter()
            .map(|(_, e)| e.event_type.clone())
            .collect();
        assert_eq!(
            types,
            vec!["BookCreated", "BookUpdated", "BookRetailPriceUpdated"]
        );
    }

    #[tokio::test]
    async fn update_missing_book_is_not_found() {
        let (service, _store, _bus) = service();
        let err = service
            .update_book(
                BookId::new(),
                BookPatch {
                    title: Some("x".to_string()),
                    ..BookPatch::default()
                },
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BookNotFound);
    }
}
