//! # Circulate Books
//!
//! The Books service: catalog command handlers, the book read model and its
//! query API, and the validation reactor that answers `ReservationCreated`
//! with `ReservationBookValidated`.
//!
//! HTTP routing is a collaborator outside this crate; controllers consume
//! [`BookCommandService`] and [`BookQueries`] directly.

pub mod commands;
pub mod config;
pub mod projection;
pub mod reactor;

pub use commands::{BOOK_EVENTS_TOPIC, BookCommandService, CreateBook};
pub use config::BooksConfig;
pub use projection::{BOOK_READ_MODELS, BookProjection, BookQueries, BookRecord};
pub use reactor::BookValidationReactor;
