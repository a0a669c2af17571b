//! End-to-end choreography tests: all three services wired over the
//! in-memory store and bus, exercising the full reserve → validate → pay →
//! return flow exactly as the production wiring does, just without Postgres
//! and Redpanda underneath.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chrono::Duration as ChronoDuration;
use circulate_books::{BookCommandService, BookProjection, BookRecord, BookValidationReactor, CreateBook};
use circulate_core::command::CommandRunner;
use circulate_core::config::EngineSettings;
use circulate_core::error::ErrorKind;
use circulate_core::event_bus::EventBus;
use circulate_core::event_store::EventStore;
use circulate_core::money::Money;
use circulate_core::stream::Version;
use circulate_domain::ids::{BookId, ReservationId, UserId, WalletId};
use circulate_projections::checkpoint::NullCheckpointStore;
use circulate_projections::engine::{Projection, ProjectionEngine};
use circulate_reservations::{
    CreateReservation, ReservationCommandService, ReservationProjection, ReservationRecord,
    ReservationSettlementReactor,
};
use circulate_testing::{
    InMemoryDocumentStore, InMemoryEventBus, InMemoryEventStore, SteppingClock, eventually,
    test_epoch,
};
use circulate_wallets::{WalletCommandService, WalletProjection, WalletReactor, WalletRecord};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const WAIT: Duration = Duration::from_secs(5);

struct World {
    store: InMemoryEventStore,
    clock: SteppingClock,
    books: BookCommandService,
    wallets: WalletCommandService,
    reservations: ReservationCommandService<InMemoryDocumentStore<ReservationRecord>>,
    reservation_docs: Arc<InMemoryDocumentStore<ReservationRecord>>,
    wallet_docs: Arc<InMemoryDocumentStore<WalletRecord>>,
    book_docs: Arc<InMemoryDocumentStore<BookRecord>>,
    shutdowns: Vec<watch::Sender<bool>>,
}

impl World {
    /// Wire every projection and reactor the three services run, each as its
    /// own consumer, and start them.
    async fn start() -> Self {
        let store = InMemoryEventStore::new();
        let bus = InMemoryEventBus::new();
        let clock = SteppingClock::new(test_epoch());
        let settings = EngineSettings::default();

        let runner = CommandRunner::new(
            Arc::new(store.clone()) as Arc<dyn EventStore>,
            Arc::new(bus.clone()) as Arc<dyn EventBus>,
            Arc::new(clock.clone()),
        );

        let book_docs = Arc::new(InMemoryDocumentStore::<BookRecord>::new());
        let reservation_docs = Arc::new(InMemoryDocumentStore::<ReservationRecord>::new());
        let wallet_docs = Arc::new(InMemoryDocumentStore::<WalletRecord>::new());

        let mut shutdowns = Vec::new();
        let bus_arc: Arc<dyn EventBus> = Arc::new(bus.clone());

        fn spawn_engine<P: Projection>(
            projection: P,
            bus: Arc<dyn EventBus>,
            topics: Vec<String>,
            group: &str,
            shutdowns: &mut Vec<watch::Sender<bool>>,
        ) {
            let (mut engine, shutdown) = ProjectionEngine::new(
                projection,
                bus,
                Arc::new(NullCheckpointStore),
                topics,
                group,
            );
            shutdowns.push(shutdown);
            tokio::spawn(async move { engine.run().await });
        }

        // Books service: read model + validation reactor.
        spawn_engine(
            BookProjection::new(Arc::clone(&book_docs)),
            Arc::clone(&bus_arc),
            vec!["book-events".to_string()],
            "books-read-models",
            &mut shutdowns,
        );
        spawn_engine(
            BookValidationReactor::new(runner.clone(), Arc::clone(&book_docs)),
            Arc::clone(&bus_arc),
            vec!["reservation-events".to_string()],
            "books-validation-reactor",
            &mut shutdowns,
        );

        // Wallets service: read model + payment/settlement reactor.
        spawn_engine(
            WalletProjection::new(Arc::clone(&wallet_docs)),
            Arc::clone(&bus_arc),
            vec!["wallet-events".to_string()],
            "wallets-read-models",
            &mut shutdowns,
        );
        spawn_engine(
            WalletReactor::new(runner.clone(), settings.clone()),
            Arc::clone(&bus_arc),
            vec!["reservation-events".to_string()],
            "wallets-payment-reactor",
            &mut shutdowns,
        );

        // Reservations service: read model + settlement reactor.
        spawn_engine(
            ReservationProjection::new(Arc::clone(&reservation_docs)),
            Arc::clone(&bus_arc),
            vec!["reservation-events".to_string()],
            "reservations-read-models",
            &mut shutdowns,
        );
        spawn_engine(
            ReservationSettlementReactor::new(runner.clone()),
            Arc::clone(&bus_arc),
            vec!["wallet-events".to_string()],
            "reservations-settlement-reactor",
            &mut shutdowns,
        );

        Self {
            store,
            clock,
            books: BookCommandService::new(runner.clone()),
            wallets: WalletCommandService::new(runner.clone()),
            reservations: ReservationCommandService::new(
                runner,
                Arc::clone(&reservation_docs),
                settings,
            ),
            reservation_docs,
            wallet_docs,
            book_docs,
            shutdowns,
        }
    }

    async fn seed_book(&self, price_units: i64) -> BookId {
        let receipt = self
            .books
            .create_book(
                CreateBook {
                    isbn: circulate_domain::ids::Isbn::new(format!(
                        "isbn-{}",
                        uuid::Uuid::new_v4()
                    )),
                    title: "The Count of Monte Cristo".to_string(),
                    author: "Alexandre Dumas".to_string(),
                    publication_year: 1846,
                    publisher: "Penguin Classics".to_string(),
                    price: Money::from_units(price_units),
                },
                None,
            )
            .await
            .unwrap();
        let book_id = BookId::from_uuid(receipt.aggregate_id.as_str().parse().unwrap());

        // Wait for the books read model: the validation reactor consults it.
        let docs = Arc::clone(&self.book_docs);
        assert!(
            eventually(WAIT, || {
                let docs = Arc::clone(&docs);
                async move {
                    circulate_projections::document::DocumentStore::get(
                        docs.as_ref(),
                        &book_id.to_string(),
                    )
                    .await
                    .unwrap()
                    .is_some()
                }
            })
            .await,
            "book read model should catch up"
        );
        book_id
    }

    async fn seed_wallet(&self, user_id: UserId, balance_units: i64) -> WalletId {
        let receipt = self
            .wallets
            .create_wallet(user_id, Money::from_units(balance_units), None)
            .await
            .unwrap();
        WalletId::from_uuid(receipt.aggregate_id.as_str().parse().unwrap())
    }

    async fn reserve(&self, user_id: UserId, book_id: BookId) -> ReservationId {
        let receipt = self
            .reservations
            .create_reservation(CreateReservation { user_id, book_id }, None)
            .await
            .unwrap();
        ReservationId::from_uuid(receipt.aggregate_id.as_str().parse().unwrap())
    }

    async fn await_status(&self, reservation_id: ReservationId, status: &str) {
        let docs = Arc::clone(&self.reservation_docs);
        let status = status.to_string();
        assert!(
            eventually(WAIT, || {
                let docs = Arc::clone(&docs);
                let status = status.clone();
                async move {
                    circulate_projections::document::DocumentStore::get(
                        docs.as_ref(),
                        &reservation_id.to_string(),
                    )
                    .await
                    .unwrap()
                    .is_some_and(|doc| doc.body.status == status)
                }
            })
            .await,
            "reservation should reach status {status}"
        );
    }

    async fn await_balance(&self, wallet_id: WalletId, cents: i64) {
        let docs = Arc::clone(&self.wallet_docs);
        assert!(
            eventually(WAIT, || {
                let docs = Arc::clone(&docs);
                async move {
                    circulate_projections::document::DocumentStore::get(
                        docs.as_ref(),
                        &wallet_id.to_string(),
                    )
                    .await
                    .unwrap()
                    .is_some_and(|doc| doc.body.balance == Money::from_cents(cents))
                }
            })
            .await,
            "wallet should reach balance {cents}"
        );
    }
}

impl Drop for World {
    fn drop(&mut self) {
        for shutdown in &self.shutdowns {
            shutdown.send(true).ok();
        }
    }
}

#[tokio::test]
async fn happy_reservation_reaches_reserved_and_charges_the_fee() {
    let world = World::start().await;
    let user = UserId::new();
    let book = world.seed_book(27).await;
    let wallet = world.seed_wallet(user, 100).await;

    let reservation = world.reserve(user, book).await;

    world.await_status(reservation, "RESERVED").await;
    world.await_balance(wallet, 9700).await;

    let doc = circulate_projections::document::DocumentStore::get(
        world.reservation_docs.as_ref(),
        &reservation.to_string(),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(doc.body.fee_charged, Money::from_units(3));
    assert_eq!(doc.body.retail_price, Some(Money::from_units(27)));
    assert_eq!(doc.body.due_date - doc.body.reserved_at, ChronoDuration::days(5));
}

#[tokio::test]
async fn declined_payment_rejects_and_leaves_the_balance() {
    let world = World::start().await;
    let user = UserId::new();
    let book = world.seed_book(27).await;
    let wallet = world.seed_wallet(user, 2).await;

    let reservation = world.reserve(user, book).await;

    world.await_status(reservation, "REJECTED").await;
    world.await_balance(wallet, 200).await;

    let doc = circulate_projections::document::DocumentStore::get(
        world.reservation_docs.as_ref(),
        &reservation.to_string(),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(
        doc.body
            .decline_reason
            .unwrap()
            .contains("insufficient funds")
    );
}

#[tokio::test]
async fn unknown_book_rejects_without_touching_the_wallet() {
    let world = World::start().await;
    let user = UserId::new();
    let wallet = world.seed_wallet(user, 100).await;

    let reservation = world.reserve(user, BookId::new()).await;

    world.await_status(reservation, "REJECTED").await;
    world.await_balance(wallet, 10_000).await;
}

#[tokio::test]
async fn on_time_return_settles_immediately() {
    let world = World::start().await;
    let user = UserId::new();
    let book = world.seed_book(27).await;
    let wallet = world.seed_wallet(user, 100).await;
    let reservation = world.reserve(user, book).await;
    world.await_status(reservation, "RESERVED").await;

    world.clock.advance(ChronoDuration::days(3));
    let (_, outcome) = world
        .reservations
        .return_reservation(reservation, None)
        .await
        .unwrap();

    assert_eq!(outcome.days_late, 0);
    assert_eq!(outcome.late_fee_applied, "0.0");
    assert_eq!(outcome.message, "Reservation marked as returned.");

    world.await_status(reservation, "RETURNED").await;
    world.await_balance(wallet, 9700).await;
}

#[tokio::test]
async fn late_return_settles_through_the_wallet() {
    let world = World::start().await;
    let user = UserId::new();
    let book = world.seed_book(27).await;
    let wallet = world.seed_wallet(user, 100).await;
    let reservation = world.reserve(user, book).await;
    world.await_status(reservation, "RESERVED").await;

    // Day 8 of a 5-day loan: 3 days late at 0.20/day.
    world.clock.advance(ChronoDuration::days(8));
    let (_, outcome) = world
        .reservations
        .return_reservation(reservation, None)
        .await
        .unwrap();

    assert_eq!(outcome.days_late, 3);
    assert_eq!(outcome.late_fee_applied, "0.6");
    assert_eq!(outcome.message, "Reservation marked as returned.");

    world.await_status(reservation, "RETURNED").await;
    // 100 - 3 (fee) - 0.60 (late fee) = 96.40.
    world.await_balance(wallet, 9640).await;
}

#[tokio::test]
async fn runaway_late_fees_convert_into_a_purchase() {
    let world = World::start().await;
    let user = UserId::new();
    let book = world.seed_book(27).await;
    let wallet = world.seed_wallet(user, 100).await;
    let reservation = world.reserve(user, book).await;
    world.await_status(reservation, "RESERVED").await;

    // 140 days in: 135 days late, 135 × 0.20 = 27.00 ≥ 27.00 retail.
    world.clock.advance(ChronoDuration::days(140));
    let (_, outcome) = world
        .reservations
        .return_reservation(reservation, None)
        .await
        .unwrap();

    assert_eq!(outcome.days_late, 135);
    assert_eq!(outcome.late_fee_applied, "27.0");
    assert_eq!(
        outcome.message,
        "Book considered brought due to high late fees."
    );

    world.await_status(reservation, "BROUGHT").await;
    // 100 - 3 (fee) - 27.00 (capped fee) = 70.00.
    world.await_balance(wallet, 7000).await;
}

#[tokio::test]
async fn concurrent_updates_serialize_through_retry() {
    let world = World::start().await;
    let book = world.seed_book(27).await;

    // Two writers race the same aggregate; the loser retries against the
    // fresh version and both land.
    let first = {
        let books = world.books.clone();
        tokio::spawn(async move {
            books
                .update_book(
                    book,
                    circulate_domain::book::BookPatch {
                        title: Some("First Title".to_string()),
                        ..Default::default()
                    },
                    None,
                )
                .await
        })
    };
    let second = {
        let books = world.books.clone();
        tokio::spawn(async move {
            books
                .update_book(
                    book,
                    circulate_domain::book::BookPatch {
                        author: Some("Second Author".to_string()),
                        ..Default::default()
                    },
                    None,
                )
                .await
        })
    };

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    // Versions 1..=3 contiguous: create + both updates.
    let events = world.store.load_events(book.stream_id()).await.unwrap();
    let versions: Vec<u64> = events.iter().map(|e| e.version.value()).collect();
    assert_eq!(versions, vec![1, 2, 3]);
}

#[tokio::test]
async fn duplicate_reservation_guard_holds_once_the_read_model_caught_up() {
    let world = World::start().await;
    let user = UserId::new();
    let book = world.seed_book(27).await;
    world.seed_wallet(user, 100).await;

    let reservation = world.reserve(user, book).await;
    world.await_status(reservation, "RESERVED").await;

    let err = world
        .reservations
        .create_reservation(
            CreateReservation {
                user_id: user,
                book_id: book,
            },
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ReservationDuplicateReservation);
}

#[tokio::test]
async fn the_whole_flow_is_rebuildable_from_the_log() {
    let world = World::start().await;
    let user = UserId::new();
    let book = world.seed_book(27).await;
    world.seed_wallet(user, 100).await;
    let reservation = world.reserve(user, book).await;
    world.await_status(reservation, "RESERVED").await;

    // Replay the full log into a fresh reservation read model, in log
    // order: the result must match the live one.
    let fresh = Arc::new(InMemoryDocumentStore::<ReservationRecord>::new());
    let projection = ReservationProjection::new(Arc::clone(&fresh));
    for envelope in world.store.all_events() {
        if projection
            .event_types()
            .contains(&envelope.event_type.as_str())
        {
            projection.apply(&envelope).await.unwrap();
        }
    }

    let live = circulate_projections::document::DocumentStore::get(
        world.reservation_docs.as_ref(),
        &reservation.to_string(),
    )
    .await
    .unwrap()
    .unwrap();
    let rebuilt = circulate_projections::document::DocumentStore::get(
        fresh.as_ref(),
        &reservation.to_string(),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(live.body, rebuilt.body);
    assert_eq!(live.version, rebuilt.version);
    assert!(live.version >= Version::new(3).value());
}
