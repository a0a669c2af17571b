//! The payment-and-settlement reactor: the Wallets service's part in the
//! reservation choreography.
//!
//! Consumes two reservation events:
//!
//! - `ReservationBookValidated(isValid=true)`: loads the reservation from
//!   the shared log for the user and fee, finds the user's wallet, attempts
//!   the fee debit, and appends both the wallet-side outcome and the
//!   reservation-side `ReservationPaymentSuccess` / `…Declined`.
//! - `ReservationOverdue`: applies the capped late fee to the wallet
//!   (allowed to overdraw) and appends `WalletLateReturnApplied`, which the
//!   Reservations service consumes to finalize the return.
//!
//! Idempotency is layered: the wallet aggregate records per-reservation
//! outcomes (a redelivered request replays the recorded outcome without new
//! events), and the reservation state machine refuses transitions it has
//! already made.

use circulate_core::aggregate::AggregateRoot;
use circulate_core::command::CommandRunner;
use circulate_core::config::EngineSettings;
use circulate_core::error::{DomainError, ErrorClass};
use circulate_core::event::EventEnvelope;
use circulate_core::money::Money;
use circulate_core::stream::StreamId;
use circulate_domain::events::{ReservationEvent, ReservationStatus};
use circulate_domain::ids::{ReservationId, UserId};
use circulate_domain::reservation::Reservation;
use circulate_domain::wallet::Wallet;
use circulate_projections::document::{ProjectionError, Result};
use circulate_projections::engine::Projection;
use std::future::Future;

/// Topic carrying reservation events.
const RESERVATION_EVENTS_TOPIC: &str = "reservation-events";
/// Topic carrying wallet events.
const WALLET_EVENTS_TOPIC: &str = "wallet-events";

/// Reacts to reservation validation and overdue events.
pub struct WalletReactor {
    runner: CommandRunner,
    settings: EngineSettings,
}

impl WalletReactor {
    /// Create the reactor.
    #[must_use]
    pub const fn new(runner: CommandRunner, settings: EngineSettings) -> Self {
        Self {
            runner,
            settings,
        }
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        let event: ReservationEvent = envelope
            .decode()
            .map_err(|e| ProjectionError::Serialization(e.to_string()))?;

        match event {
            ReservationEvent::ReservationBookValidated { is_valid: true, .. } => {
                self.attempt_payment(envelope).await
            }
            ReservationEvent::ReservationOverdue {
                user_id,
                days_late,
                retail_price,
                ..
            } => {
                self.settle_late_return(envelope, user_id, days_late, retail_price)
                    .await
            }
            _ => Ok(()),
        }
    }

    /// The fee-debit leg of the reservation flow.
    async fn attempt_payment(&self, envelope: &EventEnvelope) -> Result<()> {
        let reservation_id = parse_reservation_id(&envelope.aggregate_id)?;
        let correlation = envelope.metadata.correlation_id.clone();

        // The shared log is the source of truth for the reservation's user
        // and fee; the validation event itself carries neither.
        let reservation = self.load_reservation(&envelope.aggregate_id).await?;
        if reservation.status() != Some(ReservationStatus::PendingPayment) {
            tracing::debug!(
                reservation = %reservation_id,
                status = ?reservation.status(),
                "Payment already settled; skipping"
            );
            return Ok(());
        }
        let Some(details) = reservation.details() else {
            return Ok(());
        };
        let user_id = details.user_id;
        let fee = details.fee_charged;

        let wallet_stream = self.find_wallet(user_id).await?;
        let Some(wallet_stream) = wallet_stream else {
            tracing::info!(
                reservation = %reservation_id,
                user = %user_id,
                "No wallet for user; declining payment"
            );
            return self
                .record_payment_outcome(
                    &envelope.aggregate_id,
                    correlation,
                    fee,
                    None,
                    Some(format!("no wallet for user {user_id}")),
                )
                .await;
        };

        // 1. Debit (or decline) on the wallet stream.
        let payment_reference = format!("wallet:{wallet_stream}");
        let result = self
            .runner
            .execute_returning::<Wallet, _, _>(
                WALLET_EVENTS_TOPIC,
                wallet_stream.clone(),
                Some(correlation.clone()),
                move |root, now| {
                    let payment = root.state().attempt_fee_payment(reservation_id, fee, now)?;
                    for event in payment.events {
                        root.record(event);
                    }
                    Ok((payment.approved, payment.reason))
                },
            )
            .await;

        let (approved, decline_reason) = match result {
            Ok((_, outcome)) => outcome,
            Err(e) if e.kind.class() == ErrorClass::Domain => {
                // Wallet vanished between lookup and debit.
                (false, Some(e.message))
            }
            Err(e) => {
                return Err(ProjectionError::Storage(format!("fee debit failed: {e}")));
            }
        };

        // 2. Record the outcome on the reservation stream.
        self.record_payment_outcome(
            &envelope.aggregate_id,
            correlation,
            fee,
            approved.then_some(payment_reference),
            decline_reason,
        )
        .await
    }

    async fn record_payment_outcome(
        &self,
        reservation_stream: &StreamId,
        correlation: String,
        fee: Money,
        payment_reference: Option<String>,
        decline_reason: Option<String>,
    ) -> Result<()> {
        let result = self
            .runner
            .execute::<Reservation, _>(
                RESERVATION_EVENTS_TOPIC,
                reservation_stream.clone(),
                Some(correlation),
                move |root, now| {
                    let event = match &payment_reference {
                        Some(reference) => {
                            root.state()
                                .record_payment_success(fee, reference.clone(), now)?
                        }
                        None => root.state().record_payment_declined(
                            decline_reason
                                .clone()
                                .unwrap_or_else(|| "payment declined".to_string()),
                            now,
                        )?,
                    };
                    root.record(event);
                    Ok(())
                },
            )
            .await;

        settle_command(result, "payment outcome")
    }

    /// The late-return settlement leg.
    async fn settle_late_return(
        &self,
        envelope: &EventEnvelope,
        user_id: UserId,
        days_late: u32,
        retail_price: Money,
    ) -> Result<()> {
        let reservation_id = parse_reservation_id(&envelope.aggregate_id)?;
        let fee_per_day = self.settings.late_fee_per_day;

        let Some(wallet_stream) = self.find_wallet(user_id).await? else {
            // A reservation that got this far paid its fee from a wallet;
            // its absence is an operational problem, not a retriable one.
            tracing::error!(
                reservation = %reservation_id,
                user = %user_id,
                "No wallet to settle late return against"
            );
            return Ok(());
        };

        let result = self
            .runner
            .execute::<Wallet, _>(
                WALLET_EVENTS_TOPIC,
                wallet_stream,
                Some(envelope.metadata.correlation_id.clone()),
                move |root, now| {
                    let settlement = root.state().apply_late_return(
                        reservation_id,
                        days_late,
                        retail_price,
                        fee_per_day,
                        now,
                    )?;
                    for event in settlement.events {
                        root.record(event);
                    }
                    Ok(())
                },
            )
            .await;

        settle_command(result, "late-return settlement")
    }

    async fn load_reservation(&self, stream_id: &StreamId) -> Result<Reservation> {
        let events = self
            .runner
            .store()
            .load_events(stream_id.clone())
            .await
            .map_err(|e| ProjectionError::Storage(e.to_string()))?;
        let root = AggregateRoot::<Reservation>::rehydrate(stream_id.clone(), &events)
            .map_err(|e| ProjectionError::Serialization(e.to_string()))?;
        Ok(root.state().clone())
    }

    async fn find_wallet(&self, user_id: UserId) -> Result<Option<StreamId>> {
        self.runner
            .store()
            .find_latest_by_payload_field("WalletCreated", "userId", &user_id.to_string())
            .await
            .map_err(|e| ProjectionError::Storage(e.to_string()))
    }
}

fn parse_reservation_id(stream_id: &StreamId) -> Result<ReservationId> {
    stream_id
        .as_str()
        .parse()
        .map(ReservationId::from_uuid)
        .map_err(|e| ProjectionError::Serialization(format!("reservation id: {e}")))
}

/// Domain refusals mean the outcome is already recorded; consume the
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

impl Projection for WalletReactor {
    fn name(&self) -> &str {
        "wallet_reactor"
    }

    fn event_types(&self) -> &'static [&'static str] {
        &["ReservationBookValidated", "ReservationOverdue"]
    }

    fn apply(&self, envelope: &EventEnvelope) -> impl Future<Output = Result<()>> + Send {
        self.handle(envelope)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use circulate_core::aggregate::Aggregate as _;
    use circulate_core::event::{DomainEvent, EventMetadata, NewEvent};
    use circulate_core::event_store::EventStore as _;
    use circulate_core::stream::Version;
    use circulate_domain::ids::BookId;
    use circulate_domain::reservation::ReservationRequest;
    use circulate_testing::{InMemoryEventBus, InMemoryEventStore, test_clock};
    use std::sync::Arc;

    struct Fixture {
        reactor: WalletReactor,
        store: InMemoryEventStore,
        user_id: UserId,
        reservation_id: ReservationId,
        wallet_stream: StreamId,
    }

    /// Seed a wallet plus a reservation pending payment, and return the
    /// validation envelope the reactor would receive.
    async fn seed(balance_units: i64) -> (Fixture, EventEnvelope) {
        let store = InMemoryEventStore::new();
        let bus = InMemoryEventBus::new();
        let runner = CommandRunner::new(
            Arc::new(store.clone()),
            Arc::new(bus),
            Arc::new(test_clock()),
        );
        let user_id = UserId::new();
        let reservation_id = ReservationId::new();
        let now = Utc::now();

        // Wallet stream.
        let wallet_stream = StreamId::random();
        let wallet = Wallet::default();
        let created = wallet
            .create(user_id, Money::from_units(balance_units), now)
            .unwrap();
        store
            .append_events(
                wallet_stream.clone(),
                Version::INITIAL,
                vec![NewEvent::from_event(&created, now, EventMetadata::generate()).unwrap()],
            )
            .await
            .unwrap();

        // Reservation stream: created + validated.
        let mut reservation = Reservation::default();
        let created = reservation
            .create(
                ReservationRequest {
                    reservation_id,
                    user_id,
                    book_id: BookId::new(),
                },
                Money::from_units(3),
                5,
                now,
            )
            .unwrap();
        reservation.apply(&created);
        let validated = reservation
            .record_validation(true, None, Some(Money::from_units(27)), now)
            .unwrap();
        let metadata = EventMetadata::new("corr-payment");
        let recorded = store
            .append_events(
                reservation_id.stream_id(),
                Version::INITIAL,
                vec![
                    NewEvent::from_event(&created, now, metadata.clone()).unwrap(),
                    NewEvent::from_event(&validated, now, metadata).unwrap(),
                ],
            )
            .await
            .unwrap();

        let fixture = Fixture {
            reactor: WalletReactor::new(runner, EngineSettings::default()),
            store,
            user_id,
            reservation_id,
            wallet_stream,
        };
        (fixture, recorded[1].clone())
    }

    async fn reservation_status(fixture: &Fixture) -> ReservationStatus {
        let events = fixture
            .store
            .load_events(fixture.reservation_id.stream_id())
            .await
            .unwrap();
        let root =
            AggregateRoot::<Reservation>::rehydrate(fixture.reservation_id.stream_id(), &events)
                .unwrap();
        root.state().status().unwrap()
    }

    async fn wallet_balance(fixture: &Fixture) -> Money {
        let events = fixture
            .store
            .load_events(fixture.wallet_stream.clone())
            .await
            .unwrap();
        let root =
            AggregateRoot::<Wallet>::rehydrate(fixture.wallet_stream.clone(), &events).unwrap();
        root.state().balance()
    }

    #[tokio::test]
    async fn sufficient_funds_confirm_the_reservation() {
        let (fixture, validated) = seed(100).await;

        fixture.reactor.apply(&validated).await.unwrap();

        assert_eq!(reservation_status(&fixture).await, ReservationStatus::Reserved);
        assert_eq!(wallet_balance(&fixture).await, Money::from_units(97));

        // Wallet stream recorded both the movement and the marker.
        let wallet_events = fixture
            .store
            .load_events(fixture.wallet_stream.clone())
            .await
            .unwrap();
        let types: Vec<&str> = wallet_events
            .iter()
            .map(|e| e.event_type.as_str())
            .collect();
        assert_eq!(
            types,
            vec!["WalletCreated", "WalletBalanceChanged", "WalletPaymentSuccess"]
        );
    }

    #[tokio::test]
    async fn insufficient_funds_decline_and_leave_the_balance() {
        let (fixture, validated) = seed(2).await;

        fixture.reactor.apply(&validated).await.unwrap();

        assert_eq!(reservation_status(&fixture).await, ReservationStatus::Rejected);
        assert_eq!(wallet_balance(&fixture).await, Money::from_units(2));

        let events = fixture
            .store
            .load_events(fixture.reservation_id.stream_id())
            .await
            .unwrap();
        let declined = events.last().unwrap();
        assert_eq!(declined.event_type, "ReservationPaymentDeclined");
        assert!(
            declined.payload["reason"]
                .as_str()
                .unwrap()
                .contains("insufficient funds")
        );
    }

    #[tokio::test]
    async fn missing_wallet_declines() {
        let (fixture, validated) = seed(100).await;
        // Delete the wallet so the lookup misses.
        let events = fixture
            .store
            .load_events(fixture.wallet_stream.clone())
            .await
            .unwrap();
        let root =
            AggregateRoot::<Wallet>::rehydrate(fixture.wallet_stream.clone(), &events).unwrap();
        let deleted = root.state().delete(Utc::now()).unwrap();
        fixture
            .store
            .append_events(
                fixture.wallet_stream.clone(),
                root.version(),
                vec![
                    NewEvent::from_event(&deleted, Utc::now(), EventMetadata::generate()).unwrap(),
                ],
            )
            .await
            .unwrap();

        fixture.reactor.apply(&validated).await.unwrap();

        assert_eq!(reservation_status(&fixture).await, ReservationStatus::Rejected);
        let _ = fixture.user_id;
    }

    #[tokio::test]
    async fn redelivered_validation_debits_once() {
        let (fixture, validated) = seed(100).await;

        fixture.reactor.apply(&validated).await.unwrap();
        fixture.reactor.apply(&validated).await.unwrap();

        assert_eq!(wallet_balance(&fixture).await, Money::from_units(97));
    }

    #[tokio::test]
    async fn late_settlement_below_cap() {
        let (fixture, validated) = seed(100).await;
        fixture.reactor.apply(&validated).await.unwrap();

        // Drive the reservation overdue, then hand the reactor the event.
        let stream = fixture.reservation_id.stream_id();
        let events = fixture.store.load_events(stream.clone()).await.unwrap();
        let root = AggregateRoot::<Reservation>::rehydrate(stream.clone(), &events).unwrap();
        let overdue = root.state().record_overdue(3, Utc::now()).unwrap();
        let recorded = fixture
            .store
            .append_events(
                stream,
                root.version(),
                vec![
                    NewEvent::from_event(&overdue, Utc::now(), EventMetadata::generate()).unwrap(),
                ],
            )
            .await
            .unwrap();

        fixture.reactor.apply(&recorded[0]).await.unwrap();

        // 97.00 - 3 × 0.20 = 96.40.
        assert_eq!(wallet_balance(&fixture).await, Money::from_cents(9640));

        let wallet_events = fixture
            .store
            .load_events(fixture.wallet_stream.clone())
            .await
            .unwrap();
        let settlement = wallet_events.last().unwrap();
        assert_eq!(settlement.event_type, "WalletLateReturnApplied");
        assert_eq!(settlement.payload["bought"], false);
        assert_eq!(settlement.payload["feeApplied"], 60);
    }

    #[tokio::test]
    async fn late_settlement_at_cap_marks_bought_and_overdraws() {
        let (fixture, validated) = seed(10).await;
        // Top the wallet down: balance 10, fee 3 → 7 after payment.
        fixture.reactor.apply(&validated).await.unwrap();

        let stream = fixture.reservation_id.stream_id();
        let events = fixture.store.load_events(stream.clone()).await.unwrap();
        let root = AggregateRoot::<Reservation>::rehydrate(stream.clone(), &events).unwrap();
        let overdue = root.state().record_overdue(135, Utc::now()).unwrap();
        let recorded = fixture
            .store
            .append_events(
                stream,
                root.version(),
                vec![
                    NewEvent::from_event(&overdue, Utc::now(), EventMetadata::generate()).unwrap(),
                ],
            )
            .await
            .unwrap();

        fixture.reactor.apply(&recorded[0]).await.unwrap();

        let wallet_events = fixture
            .store
            .load_events(fixture.wallet_stream.clone())
            .await
            .unwrap();
        let settlement = wallet_events.last().unwrap();
        assert_eq!(settlement.payload["bought"], true);
        assert_eq!(settlement.payload["feeApplied"], 2700);
        // 7.00 - 27.00 = -20.00: the only path allowed to overdraw.
        assert_eq!(wallet_balance(&fixture).await, Money::from_units(-20));
    }
}
