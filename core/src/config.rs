//! Engine configuration.
//!
//! These are the only options the engine itself consumes; service-level
//! infrastructure settings (database URLs, broker addresses, consumer
//! groups) live with each service. Values load from environment variables
//! with the documented defaults.

use crate::money::Money;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Engine-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Due-date offset from `reservedAt`, in days (`RESERVATION_DUE_DAYS`).
    pub reservation_due_days: u32,
    /// Fee charged when a reservation is created (`RESERVATION_FEE`).
    pub reservation_fee: Money,
    /// Per-day late fee (`LATE_FEE_PER_DAY`).
    pub late_fee_per_day: Money,
    /// Default page size for projection queries
    /// (`PAGINATION_DEFAULT_LIMIT`).
    pub pagination_default_limit: u32,
    /// Maximum page size for projection queries (`PAGINATION_MAX_LIMIT`).
    pub pagination_max_limit: u32,
    /// Projection query cache TTL in seconds (`CACHE_DEFAULT_TTL`).
    pub cache_default_ttl_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            reservation_due_days: 5,
            reservation_fee: Money::from_units(3),
            late_fee_per_day: Money::from_cents(20),
            pagination_default_limit: 10,
            pagination_max_limit: 100,
            cache_default_ttl_secs: 3600,
        }
    }
}

impl EngineSettings {
    /// Load settings from environment variables, falling back to defaults
    /// for anything missing or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            reservation_due_days: env::var("RESERVATION_DUE_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.reservation_due_days),
            reservation_fee: env::var("RESERVATION_FEE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.reservation_fee),
            late_fee_per_day: env::var("LATE_FEE_PER_DAY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.late_fee_per_day),
            pagination_default_limit: env::var("PAGINATION_DEFAULT_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.pagination_default_limit),
            pagination_max_limit: env::var("PAGINATION_MAX_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.pagination_max_limit),
            cache_default_ttl_secs: env::var("CACHE_DEFAULT_TTL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.cache_default_ttl_secs),
        }
    }

    /// The cache TTL as a [`Duration`].
    #[must_use]
    pub const fn cache_default_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_default_ttl_secs)
    }
}
