//! The Book aggregate: a catalog reference with a retail price.

use crate::events::{BookChanges, BookEvent};
use crate::ids::{BookId, Isbn};
use chrono::{DateTime, Utc};
use circulate_core::aggregate::Aggregate;
use circulate_core::error::{DomainError, ErrorKind};
use circulate_core::money::Money;

/// Publication years outside this range are treated as data-entry errors.
pub const PUBLICATION_YEAR_MIN: i32 = 1450;
/// Upper bound leaves room for announced-but-unreleased titles.
pub const PUBLICATION_YEAR_MAX: i32 = 2100;

/// The fields a book carries once created.
#[derive(Clone, Debug, PartialEq)]
pub struct BookDetails {
    /// The aggregate id.
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
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last-update time.
    pub updated_at: DateTime<Utc>,
}

/// Input for `Book::create`.
#[derive(Clone, Debug)]
pub struct BookDraft {
    /// The id the new aggregate will use.
    pub book_id: BookId,
    /// Opaque unique key (uniqueness is checked by the command handler).
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

/// Input for `Book::update`: absent fields stay untouched.
#[derive(Clone, Debug, Default)]
pub struct BookPatch {
    /// New title.
    pub title: Option<String>,
    /// New author.
    pub author: Option<String>,
    /// New publication year.
    pub publication_year: Option<i32>,
    /// New publisher.
    pub publisher: Option<String>,
    /// New retail price.
    pub price: Option<Money>,
}

/// The Book aggregate state: a fold of its event stream.
#[derive(Clone, Debug, Default)]
pub struct Book {
    details: Option<BookDetails>,
    deleted_at: Option<DateTime<Utc>>,
}

impl Book {
    /// The book's fields, when it exists.
    #[must_use]
    pub const fn details(&self) -> Option<&BookDetails> {
        self.details.as_ref()
    }

    /// Whether the book was soft-deleted.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Register a new book reference.
    ///
    /// The handler has already checked ISBN uniqueness across the log; this
    /// checks the stream itself plus field-level invariants.
    ///
    /// # Errors
    ///
    /// - `BOOK_ALREADY_EXISTS` when the stream already has a book
    /// - `VALIDATION_ERROR` for empty fields, negative price, or an
    ///   implausible publication year
    pub fn create(&self, draft: BookDraft, now: DateTime<Utc>) -> Result<BookEvent, DomainError> {
        if self.details.is_some() || self.is_deleted() {
            return Err(DomainError::new(
                ErrorKind::BookAlreadyExists,
                format!("book {} already exists", draft.book_id),
            ));
        }

        validate_fields(
            &draft.isbn,
            &draft.title,
            &draft.author,
            &draft.publisher,
            draft.publication_year,
            draft.price,
        )?;

        Ok(BookEvent::BookCreated {
            book_id: draft.book_id,
            isbn: draft.isbn,
            title: draft.title,
            author: draft.author,
            publication_year: draft.publication_year,
            publisher: draft.publisher,
            price: draft.price,
            created_at: now,
            updated_at: now,
        })
    }

    /// Change fields; the emitted diff carries only what actually changed.
    ///
    /// A price change additionally emits `BookRetailPriceUpdated`, so one
    /// update may append two events atomically.
    ///
    /// # Errors
    ///
    /// - `BOOK_NOT_FOUND` when the book never existed
    /// - `BOOK_ALREADY_DELETED` after a deletion
    /// - `VALIDATION_ERROR` when the patch changes nothing or proposes
    ///   invalid values
    pub fn update(&self, patch: BookPatch, now: DateTime<Utc>) -> Result<Vec<BookEvent>, DomainError> {
        let details = self.live_details()?;

        let mut previous = BookChanges::default();
        let mut updated = BookChanges::default();

        if let Some(title) = patch.title {
            if title != details.title {
                if title.trim().is_empty() {
                    return Err(DomainError::validation("title cannot be empty"));
                }
                previous.title = Some(details.title.clone());
                updated.title = Some(title);
            }
        }
        if let Some(author) = patch.author {
            if author != details.author {
                if author.trim().is_empty() {
                    return Err(DomainError::validation("author cannot be empty"));
                }
                previous.author = Some(details.author.clone());
                updated.author = Some(author);
            }
        }
        if let Some(year) = patch.publication_year {
            if year != details.publication_year {
                validate_publication_year(year)?;
                previous.publication_year = Some(details.publication_year);
                updated.publication_year = Some(year);
            }
        }
        if let Some(publisher) = patch.publisher {
            if publisher != details.publisher {
                if publisher.trim().is_empty() {
                    return Err(DomainError::validation("publisher cannot be empty"));
                }
                previous.publisher = Some(details.publisher.clone());
                updated.publisher = Some(publisher);
            }
        }
        if let Some(price) = patch.price {
            if price != details.price {
                if price.is_negative() {
                    return Err(DomainError::validation("price cannot be negative"));
                }
                previous.price = Some(details.price);
                updated.price = Some(price);
            }
        }

        if updated.is_empty() {
            return Err(DomainError::validation("update contains no changes"));
        }

        let price_change = updated.price;
        let mut events = vec![BookEvent::BookUpdated {
            previous,
            updated,
            updated_at: now,
        }];
        if let Some(price) = price_change {
            events.push(BookEvent::BookRetailPriceUpdated {
                price,
                updated_at: now,
            });
        }
        Ok(events)
    }

    /// Remove the book from the catalog.
    ///
    /// # Errors
    ///
    /// - `BOOK_NOT_FOUND` when the book never existed
    /// - `BOOK_ALREADY_DELETED` when it is already gone
    pub fn delete(&self, now: DateTime<Utc>) -> Result<BookEvent, DomainError> {
        self.live_details()?;
        Ok(BookEvent::BookDeleted { deleted_at: now })
    }

    fn live_details(&self) -> Result<&BookDetails, DomainError> {
        if self.is_deleted() {
            return Err(DomainError::new(
                ErrorKind::BookAlreadyDeleted,
                "book has been deleted",
            ));
        }
        self.details.as_ref().ok_or_else(|| {
            DomainError::new(ErrorKind::BookNotFound, "book does not exist")
        })
    }
}

fn validate_fields(
    isbn: &Isbn,
    title: &str,
    author: &str,
    publisher: &str,
    publication_year: i32,
    price: Money,
) -> Result<(), DomainError> {
    if isbn.is_empty() {
        return Err(DomainError::validation("isbn cannot be empty"));
    }
    if title.trim().is_empty() {
        return Err(DomainError::validation("title cannot be empty"));
    }
    if author.trim().is_empty() {
        return Err(DomainError::validation("author cannot be empty"));
    }
    if publisher.trim().is_empty() {
        return Err(DomainError::validation("publisher cannot be empty"));
    }
    if price.is_negative() {
        return Err(DomainError::validation("price cannot be negative"));
    }
    validate_publication_year(publication_year)
}

fn validate_publication_year(year: i32) -> Result<(), DomainError> {
    if !(PUBLICATION_YEAR_MIN..=PUBLICATION_YEAR_MAX).contains(&year) {
        return Err(DomainError::validation(format!(
            "publication year {year} outside {PUBLICATION_YEAR_MIN}..={PUBLICATION_YEAR_MAX}"
        ))
        .with_details(serde_json::json!({ "publicationYear": year })));
    }
    Ok(())
}

impl Aggregate for Book {
    type Event = BookEvent;

    fn aggregate_type() -> &'static str {
        "book"
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            BookEvent::BookCreated {
                book_id,
                isbn,
                title,
                author,
                publication_year,
                publisher,
                price,
                created_at,
                updated_at,
            } => {
                self.details = Some(BookDetails {
                    book_id: *book_id,
                    isbn: isbn.clone(),
                    title: title.clone(),
                    author: author.clone(),
                    publication_year: *publication_year,
                    publisher: publisher.clone(),
                    price: *price,
                    created_at: *created_at,
                    updated_at: *updated_at,
                });
            }
            BookEvent::BookUpdated {
                updated,
                updated_at,
                ..
            } => {
                if let Some(details) = self.details.as_mut() {
                    if let Some(title) = &updated.title {
                        details.title = title.clone();
                    }
                    if let Some(author) = &updated.author {
                        details.author = author.clone();
                    }
                    if let Some(year) = updated.publication_year {
                        details.publication_year = year;
                    }
                    if let Some(publisher) = &updated.publisher {
                        details.publisher = publisher.clone();
                    }
                    if let Some(price) = updated.price {
                        details.price = price;
                    }
                    details.updated_at = *updated_at;
                }
            }
            BookEvent::BookRetailPriceUpdated { price, updated_at } => {
                if let Some(details) = self.details.as_mut() {
                    details.price = *price;
                    details.updated_at = *updated_at;
                }
            }
            BookEvent::BookDeleted { deleted_at } => {
                self.deleted_at = Some(*deleted_at);
            }
        }
    }
}
