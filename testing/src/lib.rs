//! # Circulate Testing
//!
//! In-memory fakes and helpers for testing the engine and the services:
//!
//! - [`InMemoryEventStore`]: the full store contract over a map
//! - [`InMemoryEventBus`]: topic bindings, manual ack, redelivery
//! - [`InMemoryDocumentStore`]: version-gated documents over a map
//! - [`FixedClock`] / [`SteppingClock`]: deterministic time
//! - [`eventually`]: polling helper for choreography tests
//!
//! All fakes share state through clones, so one instance wires a whole
//! multi-service scenario.

pub mod clock;
pub mod document_store;
pub mod event_bus;
pub mod event_store;

pub use clock::{FixedClock, SteppingClock, test_clock, test_epoch};
pub use document_store::InMemoryDocumentStore;
pub use event_bus::InMemoryEventBus;
pub use event_store::InMemoryEventStore;

use std::future::Future;
use std::time::Duration;

/// Poll an async condition until it holds or the timeout elapses. Returns
/// whether the condition was met; assert on the result.
///
/// Choreography is asynchronous even in-memory; tests wait for the terminal
/// state instead of sleeping fixed amounts.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
