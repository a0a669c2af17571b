//! # Circulate Wallets
//!
//! The Wallets service: balances and debits, the wallet read model, and the
//! reactor that pays reservation fees and settles late returns.

pub mod commands;
pub mod config;
pub mod projection;
pub mod reactor;

pub use commands::{WALLET_EVENTS_TOPIC, WalletCommandService};
pub use config::WalletsConfig;
pub use projection::{WALLET_READ_MODELS, WalletProjection, WalletQueries, WalletRecord};
pub use reactor::WalletReactor;
