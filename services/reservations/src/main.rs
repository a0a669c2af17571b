//! Reservations service binary.

use circulate_core::command::CommandRunner;
use circulate_core::environment::SystemClock;
use circulate_core::event_bus::EventBus;
use circulate_core::event_store::EventStore;
use circulate_postgres::{DeadLetterQueue, PostgresEventStore};
use circulate_projections::engine::ProjectionEngine;
use circulate_projections::postgres::{PostgresCheckpointStore, PostgresDocumentStore};
use circulate_redpanda::RedpandaEventBus;
use circulate_reservations::{
    RESERVATION_READ_MODELS, ReservationProjection, ReservationRecord,
    ReservationSettlementReactor, ReservationsConfig,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = ReservationsConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.log_filter))
        .init();

    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from((
            Ipv4Addr::UNSPECIFIED,
            config.metrics_port,
        )))
        .install()?;

    let event_store = PostgresEventStore::connect(&config.event_store_url).await?;
    event_store.migrate().await?;
    let dead_letters = Arc::new(DeadLetterQueue::new(event_store.pool().clone()));
    let store: Arc<dyn EventStore> = Arc::new(event_store);

    let publisher: Arc<dyn EventBus> = Arc::new(
        RedpandaEventBus::builder()
            .brokers(&config.brokers)
            .producer_acks("all")
            .build()?,
    );
    let runner = CommandRunner::new(Arc::clone(&store), publisher, Arc::new(SystemClock));

    let documents = Arc::new(
        PostgresDocumentStore::<ReservationRecord>::connect(
            &config.projection_store_url,
            RESERVATION_READ_MODELS.to_string(),
        )
        .await?,
    );
    documents.ensure_schema().await?;
    let checkpoints = PostgresCheckpointStore::new(documents.pool().clone());
    checkpoints.ensure_schema().await?;
    let checkpoints = Arc::new(checkpoints);

    // Read model: every reservation event.
    let projection_bus = Arc::new(
        RedpandaEventBus::builder()
            .brokers(&config.brokers)
            .consumer_group(&config.projection_group)
            .build()?,
    );
    let (mut projection_engine, projection_shutdown) = ProjectionEngine::new(
        ReservationProjection::new(Arc::clone(&documents)),
        projection_bus,
        Arc::clone(&checkpoints) as _,
        vec!["reservation-events".to_string()],
        config.projection_group.clone(),
    );
    projection_engine = projection_engine.with_dead_letter_sink(Arc::clone(&dead_letters) as _);

    // Settlement reactor: wallet events.
    let reactor_bus = Arc::new(
        RedpandaEventBus::builder()
            .brokers(&config.brokers)
            .consumer_group(&config.reactor_group)
            .build()?,
    );
    let (mut reactor_engine, reactor_shutdown) = ProjectionEngine::new(
        ReservationSettlementReactor::new(runner),
        reactor_bus,
        checkpoints as _,
        vec!["wallet-events".to_string()],
        config.reactor_group.clone(),
    );
    reactor_engine = reactor_engine.with_dead_letter_sink(dead_letters as _);

    let projection_task = tokio::spawn(async move { projection_engine.run().await });
    let reactor_task = tokio::spawn(async move { reactor_engine.run().await });

    tracing::info!("Reservations service running");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    projection_shutdown.send(true).ok();
    reactor_shutdown.send(true).ok();
    let _ = tokio::time::timeout(Duration::from_secs(config.shutdown_timeout_secs), async {
        let _ = projection_task.await;
        let _ = reactor_task.await;
    })
    .await;

    Ok(())
}
