//! The validation reactor: the Books service's part in the reservation
//! choreography.
//!
//! Consumes `ReservationCreated`, looks the reserved reference up in the
//! local read model, and appends `ReservationBookValidated` (with the
//! retail price when the book exists, with a reason when it does not) to
//! the reservation's stream before publishing it.
//!
//! Reactors are consumers like projections, so they run under the same
//! engine with their own consumer group. Idempotency comes from the
//! reservation state machine: a redelivered `ReservationCreated` finds the
//! reservation already validated and skips.

use crate::projection::BookRecord;
use circulate_core::command::CommandRunner;
use circulate_core::error::{DomainError, ErrorClass};
use circulate_core::event::EventEnvelope;
use circulate_domain::events::ReservationEvent;
use circulate_domain::reservation::Reservation;
use circulate_projections::document::{DocumentStore, ProjectionError, Result};
use circulate_projections::engine::Projection;
use std::future::Future;
use std::sync::Arc;

/// Topic carrying reservation events.
const RESERVATION_EVENTS_TOPIC: &str = "reservation-events";

/// Reacts to `ReservationCreated` by validating the book reference.
pub struct BookValidationReactor<S> {
    runner: CommandRunner,
    books: Arc<S>,
}

impl<S> BookValidationReactor<S>
where
    S: DocumentStore<BookRecord> + 'static,
{
    /// Create the reactor.
    #[must_use]
    pub const fn new(runner: CommandRunner, books: Arc<S>) -> Self {
        Self { runner, books }
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        let event: ReservationEvent = envelope
            .decode()
            .map_err(|e| ProjectionError::Serialization(e.to_string()))?;
        let ReservationEvent::ReservationCreated { book_id, .. } = event else {
            return Ok(());
        };

        let verdict = match self.books.get(&book_id.to_string()).await? {
            Some(book) => {
                tracing::debug!(
                    reservation = %envelope.aggregate_id,
                    book = %book_id,
                    "Book reference validated"
                );
                (true, None, Some(book.body.price))
            }
            None => {
                tracing::info!(
                    reservation = %envelope.aggregate_id,
                    book = %book_id,
                    "Book reference unknown; rejecting reservation"
                );
                (false, Some(format!("book {book_id} not found")), None)
            }
        };

        let result = self
            .runner
            .execute::<Reservation, _>(
                RESERVATION_EVENTS_TOPIC,
                envelope.aggregate_id.clone(),
                Some(envelope.metadata.correlation_id.clone()),
                move |root, now| {
                    let (is_valid, reason, retail_price) = verdict.clone();
                    let event =
                        root.state()
                            .record_validation(is_valid, reason, retail_price, now)?;
                    root.record(event);
                    Ok(())
                },
            )
            .await;

        settle_command(result, "book validation")
    }
}

/// Translate a command-cycle outcome into the reactor's delivery verdict:
/// domain refusals mean the work is already done (or can never be done) and
/// the delivery is consumed; everything else is transient and redelivered.
fn settle_command<T>(result: std::result::Result<T, DomainError>, what: &str) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.kind.class() == ErrorClass::Domain => {
            tracing::debug!(error = %e, "Skipping {what}: outcome already recorded");
            Ok(())
        }
        Err(e) => Err(ProjectionError::Storage(format!("{what} failed: {e}"))),
    }
}

impl<S> Projection for BookValidationReactor<S>
where
    S: DocumentStore<BookRecord> + 'static,
{
    fn name(&self) -> &str {
        "book_validation_reactor"
    }

    fn event_types(&self) -> &'static [&'static str] {
        &["ReservationCreated"]
    }

    fn apply(&self, envelope: &EventEnvelope) -> impl Future<Output = Result<()>> + Send {
        self.handle(envelope)
    }
}
