//! # Circulate Domain
//!
//! The three aggregates of the library-management backend (Book,
//! Reservation, Wallet) and the closed set of events they emit.
//!
//! Aggregates here are pure: state structs with an infallible `apply` fold
//! and command methods of the shape `state + input → event | DomainError`.
//! All I/O (loading streams, appending, publishing) lives in the services;
//! everything in this crate replays identically on any process.

pub mod book;
pub mod events;
pub mod ids;
pub mod reservation;
pub mod wallet;

pub use book::{Book, BookDetails, BookDraft, BookPatch};
pub use events::{BookChanges, BookEvent, ReservationEvent, ReservationStatus, WalletEvent};
pub use ids::{BookId, Isbn, ReservationId, UserId, WalletId};
pub use reservation::{PaymentRecord, Reservation, ReservationDetails, ReservationRequest};
pub use wallet::{FeePayment, LateReturnSettlement, Wallet};
