//! The Reservation aggregate: the state machine at the center of the
//! choreography.
//!
//! ```text
//!             ReservationCreated
//!           ───────────────────────▶ CREATED
//!                                       │
//!                     ReservationBookValidated(isValid=true)
//!                                       ▼
//!                                 PENDING_PAYMENT
//!                                       │
//!                                       ├── ReservationPaymentSuccess ──▶ RESERVED
//!                                       └── ReservationPaymentDeclined ─▶ REJECTED
//!           ReservationBookValidated(isValid=false) from CREATED ─────▶ REJECTED
//!
//!   From RESERVED:
//!     ReservationReturned  ──▶ RETURNED
//!     ReservationOverdue   ──▶ LATE
//!     ReservationCancelled ──▶ CANCELLED
//!
//!   From LATE:
//!     ReservationReturned       (late fee < retail price) ──▶ RETURNED
//!     ReservationBookBrought    (late fee ≥ retail price) ──▶ BROUGHT
//! ```
//!
//! `RETURNED`, `CANCELLED`, `BROUGHT`, and `REJECTED` are terminal; commands
//! targeting a terminal reservation fail with the matching
//! `RESERVATION_CANNOT_BE_*` kind.

use crate::events::{ReservationEvent, ReservationStatus};
use crate::ids::{BookId, ReservationId, UserId};
use chrono::{DateTime, Utc};
use circulate_core::aggregate::Aggregate;
use circulate_core::error::{DomainError, ErrorKind};
use circulate_core::money::Money;

/// Immutable facts captured at creation.
#[derive(Clone, Debug, PartialEq)]
pub struct ReservationDetails {
    /// The aggregate id.
    pub reservation_id: ReservationId,
    /// The reserving user.
    pub user_id: UserId,
    /// The reserved book reference.
    pub book_id: BookId,
    /// When the reservation was made.
    pub reserved_at: DateTime<Utc>,
    /// Due date (`reserved_at` + configured offset).
    pub due_date: DateTime<Utc>,
    /// The reservation fee.
    pub fee_charged: Money,
}

/// Outcome of the wallet debit, as folded into state.
#[derive(Clone, Debug, PartialEq)]
pub enum PaymentRecord {
    /// Debit succeeded.
    Success {
        /// Reference correlating with the wallet-side event.
        reference: String,
        /// Amount debited.
        amount: Money,
        /// When.
        at: DateTime<Utc>,
    },
    /// Debit declined.
    Declined {
        /// Why.
        reason: String,
        /// When.
        at: DateTime<Utc>,
    },
}

/// Input for `Reservation::create`.
#[derive(Clone, Debug)]
pub struct ReservationRequest {
    /// The id the new aggregate will use.
    pub reservation_id: ReservationId,
    /// The reserving user.
    pub user_id: UserId,
    /// The book reference to reserve.
    pub book_id: BookId,
}

/// The Reservation aggregate state: a fold of its event stream.
#[derive(Clone, Debug, Default)]
pub struct Reservation {
    details: Option<ReservationDetails>,
    status: Option<ReservationStatus>,
    retail_price: Option<Money>,
    payment: Option<PaymentRecord>,
    returned_at: Option<DateTime<Utc>>,
    deleted_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// The creation facts, when the reservation exists.
    #[must_use]
    pub const fn details(&self) -> Option<&ReservationDetails> {
        self.details.as_ref()
    }

    /// The current lifecycle status.
    #[must_use]
    pub const fn status(&self) -> Option<ReservationStatus> {
        self.status
    }

    /// The retail price captured at validation, the buyout threshold.
    #[must_use]
    pub const fn retail_price(&self) -> Option<Money> {
        self.retail_price
    }

    /// The recorded payment outcome, if any.
    #[must_use]
    pub const fn payment(&self) -> Option<&PaymentRecord> {
        self.payment.as_ref()
    }

    /// When the book came back, if it has.
    #[must_use]
    pub const fn returned_at(&self) -> Option<DateTime<Utc>> {
        self.returned_at
    }

    /// Whole days past the due date at `now`; 0 when on time.
    #[must_use]
    pub fn days_late(&self, now: DateTime<Utc>) -> u32 {
        self.details.as_ref().map_or(0, |details| {
            let days = (now - details.due_date).num_days();
            u32::try_from(days.max(0)).unwrap_or(u32::MAX)
        })
    }

    /// Open a reservation.
    ///
    /// # Errors
    ///
    /// - `RESERVATION_DUPLICATE_RESERVATION` when this stream already holds
    ///   a reservation
    pub fn create(
        &self,
        request: ReservationRequest,
        fee_charged: Money,
        due_days: u32,
        now: DateTime<Utc>,
    ) -> Result<ReservationEvent, DomainError> {
        if self.details.is_some() {
            return Err(DomainError::new(
                ErrorKind::ReservationDuplicateReservation,
                format!("reservation {} already exists", request.reservation_id),
            ));
        }

        Ok(ReservationEvent::ReservationCreated {
            reservation_id: request.reservation_id,
            user_id: request.user_id,
            book_id: request.book_id,
            reserved_at: now,
            due_date: now + chrono::Duration::days(i64::from(due_days)),
            fee_charged,
        })
    }

    /// Record the Books service's verdict on the reserved reference.
    ///
    /// # Errors
    ///
    /// - `RESERVATION_NOT_FOUND` when the reservation does not exist
    /// - `RESERVATION_CANNOT_BE_CONFIRMED` unless the status is `CREATED`
    pub fn record_validation(
        &self,
        is_valid: bool,
        reason: Option<String>,
        retail_price: Option<Money>,
        now: DateTime<Utc>,
    ) -> Result<ReservationEvent, DomainError> {
        self.expect_status(ReservationStatus::Created, ErrorKind::ReservationCannotBeConfirmed)?;
        Ok(ReservationEvent::ReservationBookValidated {
            is_valid,
            reason,
            retail_price,
            validated_at: now,
        })
    }

    /// Record a successful fee debit.
    ///
    /// # Errors
    ///
    /// - `RESERVATION_NOT_FOUND` when the reservation does not exist
    /// - `RESERVATION_CANNOT_BE_CONFIRMED` unless the status is
    ///   `PENDING_PAYMENT`
    pub fn record_payment_success(
        &self,
        amount: Money,
        payment_reference: String,
        now: DateTime<Utc>,
    ) -> Result<ReservationEvent, DomainError> {
        self.expect_status(
            ReservationStatus::PendingPayment,
            ErrorKind::ReservationCannotBeConfirmed,
        )?;
        Ok(ReservationEvent::ReservationPaymentSuccess {
            amount,
            payment_reference,
            paid_at: now,
        })
    }

    /// Record a declined fee debit.
    ///
    /// # Errors
    ///
    /// - `RESERVATION_NOT_FOUND` when the reservation does not exist
    /// - `RESERVATION_CANNOT_BE_REJECTED` unless the status is
    ///   `PENDING_PAYMENT`
    pub fn record_payment_declined(
        &self,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<ReservationEvent, DomainError> {
        self.expect_status(
            ReservationStatus::PendingPayment,
            ErrorKind::ReservationCannotBeRejected,
        )?;
        Ok(ReservationEvent::ReservationPaymentDeclined {
            reason,
            declined_at: now,
        })
    }

    /// Cancel a reserved book.
    ///
    /// # Errors
    ///
    /// - `RESERVATION_NOT_FOUND` when the reservation does not exist
    /// - `RESERVATION_CANNOT_BE_CANCELLED` unless the status is `RESERVED`
    pub fn cancel(
        &self,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ReservationEvent, DomainError> {
        self.expect_status(ReservationStatus::Reserved, ErrorKind::ReservationCannotBeCancelled)?;
        Ok(ReservationEvent::ReservationCancelled {
            cancelled_at: now,
            reason,
        })
    }

    /// Record the book coming back: on time from `RESERVED`, or from `LATE`
    /// once settlement shows the fee stayed under the buyout threshold.
    ///
    /// # Errors
    ///
    /// - `RESERVATION_NOT_FOUND` when the reservation does not exist
    /// - `RESERVATION_CANNOT_BE_RETURNED` from any other status
    pub fn record_return(
        &self,
        days_late: u32,
        late_fee_applied: Money,
        now: DateTime<Utc>,
    ) -> Result<ReservationEvent, DomainError> {
        let status = self.live_status()?;
        if !matches!(status, ReservationStatus::Reserved | ReservationStatus::Late) {
            return Err(self.transition_error(ErrorKind::ReservationCannotBeReturned, status));
        }
        Ok(ReservationEvent::ReservationReturned {
            returned_at: now,
            days_late,
            late_fee_applied,
        })
    }

    /// Record a past-due return and request settlement from the Wallets
    /// service. The emitted event carries everything the settlement needs.
    ///
    /// # Errors
    ///
    /// - `RESERVATION_NOT_FOUND` when the reservation does not exist
    /// - `RESERVATION_CANNOT_BE_RETURNED` unless the status is `RESERVED`
    /// - `VALIDATION_ERROR` when no retail price was captured at validation
    pub fn record_overdue(
        &self,
        days_late: u32,
        now: DateTime<Utc>,
    ) -> Result<ReservationEvent, DomainError> {
        self.expect_status(ReservationStatus::Reserved, ErrorKind::ReservationCannotBeReturned)?;
        let details = self.require_details()?;
        let retail_price = self.retail_price.ok_or_else(|| {
            DomainError::validation("reservation has no captured retail price")
        })?;

        Ok(ReservationEvent::ReservationOverdue {
            user_id: details.user_id,
            days_late,
            retail_price,
            recorded_at: now,
        })
    }

    /// Convert the reservation into a forced purchase: the late fee reached
    /// the retail price.
    ///
    /// # Errors
    ///
    /// - `RESERVATION_NOT_FOUND` when the reservation does not exist
    /// - `RESERVATION_CANNOT_BE_RETURNED` unless the status is `LATE`
    pub fn record_brought(
        &self,
        purchase_price: Money,
        now: DateTime<Utc>,
    ) -> Result<ReservationEvent, DomainError> {
        self.expect_status(ReservationStatus::Late, ErrorKind::ReservationCannotBeReturned)?;
        Ok(ReservationEvent::ReservationBookBrought {
            purchase_price,
            brought_at: now,
        })
    }

    /// Remove a settled reservation record.
    ///
    /// # Errors
    ///
    /// - `RESERVATION_NOT_FOUND` when it does not exist or is already gone
    /// - `VALIDATION_ERROR` while the reservation is still active
    pub fn delete(&self, now: DateTime<Utc>) -> Result<ReservationEvent, DomainError> {
        let status = self.live_status()?;
        if !status.is_terminal() {
            return Err(DomainError::validation(format!(
                "active reservation (status {status}) cannot be deleted"
            )));
        }
        Ok(ReservationEvent::ReservationDeleted { deleted_at: now })
    }

    fn live_status(&self) -> Result<ReservationStatus, DomainError> {
        if self.deleted_at.is_some() {
            return Err(DomainError::new(
                ErrorKind::ReservationNotFound,
                "reservation has been deleted",
            ));
        }
        self.status.ok_or_else(|| {
            DomainError::new(ErrorKind::ReservationNotFound, "reservation does not exist")
        })
    }

    fn require_details(&self) -> Result<&ReservationDetails, DomainError> {
        self.details.as_ref().ok_or_else(|| {
            DomainError::new(ErrorKind::ReservationNotFound, "reservation does not exist")
        })
    }

    fn expect_status(
        &self,
        expected: ReservationStatus,
        kind_on_mismatch: ErrorKind,
    ) -> Result<(), DomainError> {
        let status = self.live_status()?;
        if status == expected {
            Ok(())
        } else {
            Err(self.transition_error(kind_on_mismatch, status))
        }
    }

    fn transition_error(&self, kind: ErrorKind, status: ReservationStatus) -> DomainError {
        DomainError::new(kind, format!("reservation is {status}"))
            .with_details(serde_json::json!({ "status": status.as_str() }))
    }
}

impl Aggregate for Reservation {
    type Event = ReservationEvent;

    fn aggregate_type() -> &'static str {
        "reservation"
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ReservationEvent::ReservationCreated {
                reservation_id,
                user_id,
                book_id,
                reserved_at,
                due_date,
                fee_charged,
            } => {
                self.details = Some(ReservationDetails {
                    reservation_id: *reservation_id,
                    user_id: *user_id,
                    book_id: *book_id,
                    reserved_at: *reserved_at,
                    due_date: *due_date,
                    fee_charged: *fee_charged,
                });
                self.status = Some(ReservationStatus::Created);
            }
            ReservationEvent::ReservationBookValidated {
                is_valid,
                retail_price,
                ..
            } => {
                if *is_valid {
                    self.status = Some(ReservationStatus::PendingPayment);
                    self.retail_price = *retail_price;
                } else {
                    self.status = Some(ReservationStatus::Rejected);
                }
            }
            ReservationEvent::ReservationPaymentSuccess {
                amount,
                payment_reference,
                paid_at,
            } => {
                self.status = Some(ReservationStatus::Reserved);
                self.payment = Some(PaymentRecord::Success {
                    reference: payment_reference.clone(),
                    amount: *amount,
                    at: *paid_at,
                });
            }
            ReservationEvent::ReservationPaymentDeclined { reason, declined_at } => {
                self.status = Some(ReservationStatus::Rejected);
                self.payment = Some(PaymentRecord::Declined {
                    reason: reason.clone(),
                    at: *declined_at,
                });
            }
            ReservationEvent::ReservationReturned { returned_at, .. } => {
                self.status = Some(ReservationStatus::Returned);
                self.returned_at = Some(*returned_at);
            }
            ReservationEvent::ReservationCancelled { .. } => {
                self.status = Some(ReservationStatus::Cancelled);
            }
            ReservationEvent::ReservationOverdue { .. } => {
                self.status = Some(ReservationStatus::Late);
            }
            ReservationEvent::ReservationBookBrought { brought_at, .. } => {
                self.status = Some(ReservationStatus::Brought);
                self.returned_at = Some(*brought_at);
            }
            ReservationEvent::ReservationDeleted { deleted_at } => {
                self.deleted_at = Some(*deleted_at);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)] // Tests panic on unexpected variants
mod tests {
    use super::*;

    fn request() -> ReservationRequest {
        ReservationRequest {
            reservation_id: ReservationId::new(),
            user_id: UserId::new(),
            book_id: BookId::new(),
        }
    }

    fn fee() -> Money {
        Money::from_units(3)
    }

    fn created() -> Reservation {
        let mut reservation = Reservation::default();
        #[allow(clippy::unwrap_used)]
        let event = reservation
            .create(request(), fee(), 5, Utc::now())
            .unwrap();
        reservation.apply(&event);
        reservation
    }

    fn pending_payment() -> Reservation {
        let mut reservation = created();
        #[allow(clippy::unwrap_used)]
        let event = reservation
            .record_validation(true, None, Some(Money::from_units(27)), Utc::now())
            .unwrap();
        reservation.apply(&event);
        reservation
    }

    fn reserved() -> Reservation {
        let mut reservation = pending_payment();
        #[allow(clippy::unwrap_used)]
        let event = reservation
            .record_payment_success(fee(), "pay-1".to_string(), Utc::now())
            .unwrap();
        reservation.apply(&event);
        reservation
    }

    fn late() -> Reservation {
        let mut reservation = reserved();
        #[allow(clippy::unwrap_used)]
        let event = reservation.record_overdue(3, Utc::now()).unwrap();
        reservation.apply(&event);
        reservation
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn create_sets_due_date_from_offset() {
        let now = Utc::now();
        let event = Reservation::default()
            .create(request(), fee(), 5, now)
            .unwrap();

        match event {
            ReservationEvent::ReservationCreated {
                reserved_at,
                due_date,
                fee_charged,
                ..
            } => {
                assert_eq!(reserved_at, now);
                assert_eq!(due_date, now + chrono::Duration::days(5));
                assert_eq!(fee_charged, fee());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn create_twice_is_duplicate() {
        let err = created().create(request(), fee(), 5, Utc::now()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ReservationDuplicateReservation);
    }

    #[test]
    fn happy_path_reaches_reserved() {
        let reservation = reserved();
        assert_eq!(reservation.status(), Some(ReservationStatus::Reserved));
        assert!(matches!(
            reservation.payment(),
            Some(PaymentRecord::Success { amount, .. }) if *amount == fee()
        ));
        assert_eq!(reservation.retail_price(), Some(Money::from_units(27)));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn invalid_book_rejects_from_created() {
        let mut reservation = created();
        let event = reservation
            .record_validation(false, Some("book not found".to_string()), None, Utc::now())
            .unwrap();
        reservation.apply(&event);
        assert_eq!(reservation.status(), Some(ReservationStatus::Rejected));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn declined_payment_rejects() {
        let mut reservation = pending_payment();
        let event = reservation
            .record_payment_declined("insufficient funds".to_string(), Utc::now())
            .unwrap();
        reservation.apply(&event);
        assert_eq!(reservation.status(), Some(ReservationStatus::Rejected));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn on_time_return_from_reserved() {
        let mut reservation = reserved();
        let event = reservation
            .record_return(0, Money::ZERO, Utc::now())
            .unwrap();
        reservation.apply(&event);
        assert_eq!(reservation.status(), Some(ReservationStatus::Returned));
        assert!(reservation.returned_at().is_some());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn late_return_settles_to_returned_or_brought() {
        // Fee below the threshold: RETURNED.
        let mut below = late();
        let event = below
            .record_return(3, Money::from_cents(60), Utc::now())
            .unwrap();
        below.apply(&event);
        assert_eq!(below.status(), Some(ReservationStatus::Returned));

        // Fee at the threshold: BROUGHT.
        let mut bought = late();
        let event = bought
            .record_brought(Money::from_units(27), Utc::now())
            .unwrap();
        bought.apply(&event);
        assert_eq!(bought.status(), Some(ReservationStatus::Brought));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn cancel_only_from_reserved() {
        let mut reservation = reserved();
        let event = reservation.cancel(None, Utc::now()).unwrap();
        reservation.apply(&event);
        assert_eq!(reservation.status(), Some(ReservationStatus::Cancelled));

        let err = created().cancel(None, Utc::now()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ReservationCannotBeCancelled);
    }

    #[test]
    fn terminal_states_reject_commands() {
        let mut rejected = created();
        #[allow(clippy::unwrap_used)]
        let event = rejected
            .record_validation(false, None, None, Utc::now())
            .unwrap();
        rejected.apply(&event);

        let err = rejected
            .record_validation(true, None, None, Utc::now())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ReservationCannotBeConfirmed);

        let err = rejected
            .record_return(0, Money::ZERO, Utc::now())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ReservationCannotBeReturned);

        let err = rejected.cancel(None, Utc::now()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ReservationCannotBeCancelled);
    }

    #[test]
    fn commands_on_missing_reservation_are_not_found() {
        let fresh = Reservation::default();
        let err = fresh
            .record_validation(true, None, None, Utc::now())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ReservationNotFound);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn overdue_carries_the_settlement_request() {
        let reservation = reserved();
        let user_id = reservation.details().unwrap().user_id;
        let event = reservation.record_overdue(3, Utc::now()).unwrap();

        match event {
            ReservationEvent::ReservationOverdue {
                user_id: event_user,
                days_late,
                retail_price,
                ..
            } => {
                assert_eq!(event_user, user_id);
                assert_eq!(days_late, 3);
                assert_eq!(retail_price, Money::from_units(27));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn days_late_is_zero_before_due() {
        let reservation = reserved();
        #[allow(clippy::unwrap_used)]
        let due = reservation.details().unwrap().due_date;

        assert_eq!(reservation.days_late(due - chrono::Duration::days(2)), 0);
        assert_eq!(reservation.days_late(due + chrono::Duration::days(3)), 3);
        // Partial days truncate.
        assert_eq!(reservation.days_late(due + chrono::Duration::hours(30)), 1);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn delete_requires_terminal_state() {
        let err = reserved().delete(Utc::now()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationError);

        let mut cancelled = reserved();
        let event = cancelled.cancel(None, Utc::now()).unwrap();
        cancelled.apply(&event);
        assert!(cancelled.delete(Utc::now()).is_ok());
    }
}
