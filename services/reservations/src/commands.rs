//! Reservation command handlers: create, cancel, return, delete.
//!
//! The return handler is where the late-fee arithmetic lives on the command
//! side: it decides between the on-time path (`ReservationReturned`
//! directly) and the overdue path (`ReservationOverdue`, which doubles as
//! the settlement request the Wallets service consumes), and it computes the
//! caller-facing response deterministically from the same inputs the
//! settlement will use.

use crate::projection::ReservationRecord;
use circulate_core::command::CommandRunner;
use circulate_core::config::EngineSettings;
use circulate_core::error::{CommandReceipt, DomainError, ErrorKind};
use circulate_core::money::Money;
use circulate_core::pagination::PageRequest;
use circulate_domain::events::ReservationStatus;
use circulate_domain::ids::{BookId, ReservationId, UserId};
use circulate_domain::reservation::{Reservation, ReservationRequest};
use circulate_projections::document::{DocumentFilter, DocumentStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Topic carrying reservation events.
pub const RESERVATION_EVENTS_TOPIC: &str = "reservation-events";

/// Response payload of the return flow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnOutcome {
    /// Human-readable outcome.
    pub message: String,
    /// The late fee settled against the wallet, one decimal digit.
    pub late_fee_applied: String,
    /// Whole days past the due date.
    pub days_late: u32,
}

/// Input for [`ReservationCommandService::create_reservation`].
#[derive(Clone, Debug)]
pub struct CreateReservation {
    /// The reserving user.
    pub user_id: UserId,
    /// The book reference to reserve.
    pub book_id: BookId,
}

/// The Reservations service's command side.
///
/// Generic over the read-model store because the duplicate-reservation guard
/// runs against the service's own projection.
#[derive(Clone)]
pub struct ReservationCommandService<S> {
    runner: CommandRunner,
    reservations: Arc<S>,
    settings: EngineSettings,
}

impl<S> ReservationCommandService<S>
where
    S: DocumentStore<ReservationRecord> + 'static,
{
    /// Create the service.
    #[must_use]
    pub const fn new(runner: CommandRunner, reservations: Arc<S>, settings: EngineSettings) -> Self {
        Self {
            runner,
            reservations,
            settings,
        }
    }

    /// Open a reservation for a user and a book reference.
    ///
    /// The duplicate guard checks the read model for a live reservation of
    /// the same `(user, book)` pair. Being a projection read it is
    /// best-effort under eventual consistency, which matches the
    /// at-least-once semantics everywhere else in the flow.
    ///
    /// # Errors
    ///
    /// - `RESERVATION_DUPLICATE_RESERVATION` when an active reservation for
    ///   the pair exists
    /// - store kinds on infrastructure failures
    pub async fn create_reservation(
        &self,
        input: CreateReservation,
        correlation_id: Option<String>,
    ) -> Result<CommandReceipt, DomainError> {
        let filter = DocumentFilter::all()
            .field("userId", input.user_id.to_string())
            .field("bookId", input.book_id.to_string());
        let existing = self
            .reservations
            .query(&filter, &PageRequest::first(self.settings.pagination_max_limit))
            .await
            .map_err(|e| DomainError::new(ErrorKind::DatabaseError, e.to_string()))?;

        if let Some(active) = existing
            .data
            .iter()
            .find(|doc| !doc.body.status_is_terminal())
        {
            return Err(DomainError::new(
                ErrorKind::ReservationDuplicateReservation,
                format!(
                    "user {} already has an active reservation for book {}",
                    input.user_id, input.book_id
                ),
            )
            .with_details(serde_json::json!({
                "reservationId": active.id,
                "status": active.body.status,
            })));
        }

        let reservation_id = ReservationId::new();
        let fee = self.settings.reservation_fee;
        let due_days = self.settings.reservation_due_days;

        self.runner
            .execute::<Reservation, _>(
                RESERVATION_EVENTS_TOPIC,
                reservation_id.stream_id(),
                correlation_id,
                move |root, now| {
                    let event = root.state().create(
                        ReservationRequest {
                            reservation_id,
                            user_id: input.user_id,
                            book_id: input.book_id,
                        },
                        fee,
                        due_days,
                        now,
                    )?;
                    root.record(event);
                    Ok(())
                },
            )
            .await
    }

    /// Cancel a reserved book.
    ///
    /// # Errors
    ///
    /// - `RESERVATION_NOT_FOUND` / `RESERVATION_CANNOT_BE_CANCELLED`
    pub async fn cancel_reservation(
        &self,
        reservation_id: ReservationId,
        reason: Option<String>,
        correlation_id: Option<String>,
    ) -> Result<CommandReceipt, DomainError> {
        self.runner
            .execute::<Reservation, _>(
                RESERVATION_EVENTS_TOPIC,
                reservation_id.stream_id(),
                correlation_id,
                move |root, now| {
                    let event = root.state().cancel(reason.clone(), now)?;
                    root.record(event);
                    Ok(())
                },
            )
            .await
    }

    /// Return a reserved book.
    ///
    /// On time, the reservation goes terminal immediately. Late, the handler
    /// records `ReservationOverdue` and the wallet settlement finishes the
    /// job through choreography. The response is still computed here, because
    /// the capped fee is pure arithmetic over values already in hand.
    ///
    /// # Errors
    ///
    /// - `RESERVATION_NOT_FOUND` / `RESERVATION_CANNOT_BE_RETURNED`
    pub async fn return_reservation(
        &self,
        reservation_id: ReservationId,
        correlation_id: Option<String>,
    ) -> Result<(CommandReceipt, ReturnOutcome), DomainError> {
        let fee_per_day = self.settings.late_fee_per_day;

        let (receipt, (days_late, fee, bought)) = self
            .runner
            .execute_returning::<Reservation, _, _>(
                RESERVATION_EVENTS_TOPIC,
                reservation_id.stream_id(),
                correlation_id,
                move |root, now| {
                    let days_late = root.state().days_late(now);
                    if days_late == 0 {
                        let event = root.state().record_return(0, Money::ZERO, now)?;
                        root.record(event);
                        return Ok((0, Money::ZERO, false));
                    }

                    let event = root.state().record_overdue(days_late, now)?;
                    root.record(event);

                    // record_overdue guarantees the captured retail price.
                    let retail = root.state().retail_price().unwrap_or(Money::ZERO);
                    let raw_fee = fee_per_day.times(u64::from(days_late));
                    Ok((days_late, raw_fee.min(retail), raw_fee >= retail))
                },
            )
            .await?;

        let message = if bought {
            "Book considered brought due to high late fees.".to_string()
        } else {
            "Reservation marked as returned.".to_string()
        };

        Ok((
            receipt,
            ReturnOutcome {
                message,
                late_fee_applied: fee.to_one_decimal_string(),
                days_late,
            },
        ))
    }

    /// Remove a settled reservation record.
    ///
    /// # Errors
    ///
    /// - `RESERVATION_NOT_FOUND`, or `VALIDATION_ERROR` while still active
    pub async fn delete_reservation(
        &self,
        reservation_id: ReservationId,
        correlation_id: Option<String>,
    ) -> Result<CommandReceipt, DomainError> {
        self.runner
            .execute::<Reservation, _>(
                RESERVATION_EVENTS_TOPIC,
                reservation_id.stream_id(),
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

impl ReservationRecord {
    /// Whether this record's status admits no further transitions.
    #[must_use]
    pub fn status_is_terminal(&self) -> bool {
        matches!(
            self.status.as_str(),
            s if s == ReservationStatus::Rejected.as_str()
                || s == ReservationStatus::Returned.as_str()
                || s == ReservationStatus::Cancelled.as_str()
                || s == ReservationStatus::Brought.as_str()
        )
    }
}
