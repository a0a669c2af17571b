//! The settlement reactor: finishes late returns once the Wallets service
//! has settled the fee.
//!
//! Consumes `WalletLateReturnApplied` and appends the terminal event to the
//! reservation stream: `ReservationBookBrought` when the fee reached the
//! retail price, `ReservationReturned` otherwise. Redeliveries find the
//! reservation already terminal and are consumed without effect.

use circulate_core::command::CommandRunner;
use circulate_core::error::{DomainError, ErrorClass};
use circulate_core::event::EventEnvelope;
use circulate_domain::events::WalletEvent;
use circulate_domain::reservation::Reservation;
use circulate_projections::document::{ProjectionError, Result};
use circulate_projections::engine::Projection;
use std::future::Future;

/// Topic carrying reservation events.
const RESERVATION_EVENTS_TOPIC: &str = "reservation-events";

/// Reacts to wallet settlements by finalizing the reservation.
pub struct ReservationSettlementReactor {
    runner: CommandRunner,
}

impl ReservationSettlementReactor {
    /// Create the reactor.
    #[must_use]
    pub const fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        let event: WalletEvent = envelope
            .decode()
            .map_err(|e| ProjectionError::Serialization(e.to_string()))?;
        let WalletEvent::WalletLateReturnApplied {
            reservation_id,
            days_late,
            fee_applied,
            bought,
            ..
        } = event
        else {
            return Ok(());
        };

        tracing::debug!(
            reservation = %reservation_id,
            days_late,
            fee = %fee_applied,
            bought,
            "Settlement received"
        );

        let result = self
            .runner
            .execute::<Reservation, _>(
                RESERVATION_EVENTS_TOPIC,
                reservation_id.stream_id(),
                Some(envelope.metadata.correlation_id.clone()),
                move |root, now| {
                    let event = if bought {
                        // The capped fee equals the retail price.
                        root.state().record_brought(fee_applied, now)?
                    } else {
                        root.state().record_return(days_late, fee_applied, now)?
                    };
                    root.record(event);
                    Ok(())
                },
            )
            .await;

        settle_command(result, "return settlement")
    }
}

/// Domain refusals mean the reservation is already settled; consume the
/// delivery. Anything else is transient and redelivered.
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

impl Projection for ReservationSettlementReactor {
    fn name(&self) -> &str {
        "reservation_settlement_reactor"
    }

    fn event_types(&self) -> &'static [&'static str] {
        &["WalletLateReturnApplied"]
    }

    fn apply(&self, envelope: &EventEnvelope) -> impl Future<Output = Result<()>> + Send {
        self.handle(envelope)
    }
}
