//! Property tests for the reservation state machine.
//!
//! Whatever sequence of commands is thrown at a reservation, only the
//! transitions in the lifecycle table are ever taken, and once a terminal
//! state is reached no accepted command moves the status again.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::Utc;
use circulate_core::aggregate::Aggregate;
use circulate_core::money::Money;
use circulate_domain::events::ReservationStatus;
use circulate_domain::ids::{BookId, ReservationId, UserId};
use circulate_domain::reservation::{Reservation, ReservationRequest};
use proptest::prelude::*;

/// The commands a caller (or reactor) could fire, in caricature.
#[derive(Clone, Debug)]
enum Command {
    Create,
    Validate { is_valid: bool },
    PaymentSuccess,
    PaymentDeclined,
    Cancel,
    ReturnOnTime,
    RecordOverdue { days_late: u32 },
    Brought,
}

fn command_strategy() -> impl Strategy<Value = Command> {
    prop_oneof![
        Just(Command::Create),
        any::<bool>().prop_map(|is_valid| Command::Validate { is_valid }),
        Just(Command::PaymentSuccess),
        Just(Command::PaymentDeclined),
        Just(Command::Cancel),
        Just(Command::ReturnOnTime),
        (1_u32..200).prop_map(|days_late| Command::RecordOverdue { days_late }),
        Just(Command::Brought),
    ]
}

/// Legal status transitions per the lifecycle table.
fn transition_is_legal(from: Option<ReservationStatus>, to: ReservationStatus) -> bool {
    use ReservationStatus as S;
    match (from, to) {
        (None, S::Created) => true,
        (Some(S::Created), S::PendingPayment | S::Rejected) => true,
        (Some(S::PendingPayment), S::Reserved | S::Rejected) => true,
        (Some(S::Reserved), S::Returned | S::Late | S::Cancelled) => true,
        (Some(S::Late), S::Returned | S::Brought) => true,
        _ => false,
    }
}

proptest! {
    #[test]
    fn only_legal_transitions_and_terminal_states_are_absorbing(
        commands in proptest::collection::vec(command_strategy(), 1..32)
    ) {
        let now = Utc::now();
        let mut reservation = Reservation::default();

        for command in commands {
            let before = reservation.status();
            let attempt = match command {
                Command::Create => reservation.create(
                    ReservationRequest {
                        reservation_id: ReservationId::new(),
                        user_id: UserId::new(),
                        book_id: BookId::new(),
                    },
                    Money::from_units(3),
                    5,
                    now,
                ),
                Command::Validate { is_valid } => reservation.record_validation(
                    is_valid,
                    (!is_valid).then(|| "no such book".to_string()),
                    is_valid.then(|| Money::from_units(27)),
                    now,
                ),
                Command::PaymentSuccess => reservation.record_payment_success(
                    Money::from_units(3),
                    "pay".to_string(),
                    now,
                ),
                Command::PaymentDeclined => {
                    reservation.record_payment_declined("declined".to_string(), now)
                }
                Command::Cancel => reservation.cancel(None, now),
                Command::ReturnOnTime => reservation.record_return(0, Money::ZERO, now),
                Command::RecordOverdue { days_late } => {
                    reservation.record_overdue(days_late, now)
                }
                Command::Brought => reservation.record_brought(Money::from_units(27), now),
            };

            if let Ok(event) = attempt {
                reservation.apply(&event);
                let after = reservation.status();

                if let Some(after) = after {
                    if before != Some(after) {
                        prop_assert!(
                            transition_is_legal(before, after),
                            "illegal transition {before:?} -> {after:?}"
                        );
                    }
                }

                // Terminal states are absorbing: no accepted command may
                // have started from one.
                if let Some(before) = before {
                    prop_assert!(
                        !before.is_terminal(),
                        "command accepted in terminal state {before:?}"
                    );
                }
            }
        }
    }
}
