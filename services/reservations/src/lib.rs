//! # Circulate Reservations
//!
//! The Reservations service: the reservation lifecycle state machine, its
//! read model and query API, and the settlement reactor that finishes late
//! returns once the Wallets service has applied the fee.

pub mod commands;
pub mod config;
pub mod projection;
pub mod reactor;

pub use commands::{
    CreateReservation, RESERVATION_EVENTS_TOPIC, ReservationCommandService, ReturnOutcome,
};
pub use config::ReservationsConfig;
pub use projection::{
    RESERVATION_READ_MODELS, ReservationProjection, ReservationQueries, ReservationRecord,
};
pub use reactor::ReservationSettlementReactor;
