//! Wallet command handlers: create, debit, credit, delete.
//!
//! The one-wallet-per-user invariant is enforced at creation time with the
//! log-wide secondary-key lookup; a deleted wallet frees its user for a new
//! one.

use circulate_core::command::CommandRunner;
use circulate_core::error::{CommandReceipt, DomainError};
use circulate_core::money::Money;
use circulate_domain::ids::{UserId, WalletId};
use circulate_domain::wallet::Wallet;

/// Topic carrying wallet events.
pub const WALLET_EVENTS_TOPIC: &str = "wallet-events";

/// The Wallets service's command side.
#[derive(Clone)]
pub struct WalletCommandService {
    runner: CommandRunner,
}

impl WalletCommandService {
    /// Create the service.
    #[must_use]
    pub const fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    /// Open a wallet for a user.
    ///
    /// # Errors
    ///
    /// - `VALIDATION_ERROR` when the user already has a live wallet or the
    ///   opening balance is negative
    pub async fn create_wallet(
        &self,
        user_id: UserId,
        initial_balance: Money,
        correlation_id: Option<String>,
    ) -> Result<CommandReceipt, DomainError> {
        if let Some(existing) = self
            .runner
            .store()
            .find_latest_by_payload_field("WalletCreated", "userId", &user_id.to_string())
            .await?
        {
            return Err(
                DomainError::validation(format!("user {user_id} already has a wallet"))
                    .with_details(serde_json::json!({
                        "userId": user_id.to_string(),
                        "walletId": existing.as_str(),
                    })),
            );
        }

        let wallet_id = WalletId::new();
        self.runner
            .execute::<Wallet, _>(
                WALLET_EVENTS_TOPIC,
                wallet_id.stream_id(),
                correlation_id,
                move |root, now| {
                    let event = root.state().create(user_id, initial_balance, now)?;
                    root.record(event);
                    Ok(())
                },
            )
            .await
    }

    /// Debit a wallet (rejects overdrafts).
    ///
    /// # Errors
    ///
    /// - `WALLET_NOT_FOUND` / `WALLET_INSUFFICIENT_FUNDS` /
    ///   `VALIDATION_ERROR`
    pub async fn debit(
        &self,
        wallet_id: WalletId,
        amount: Money,
        reason: String,
        correlation_id: Option<String>,
    ) -> Result<CommandReceipt, DomainError> {
        self.runner
            .execute::<Wallet, _>(
                WALLET_EVENTS_TOPIC,
                wallet_id.stream_id(),
                correlation_id,
                move |root, now| {
                    let event = root.state().debit(amount, reason.clone(), now)?;
                    root.record(event);
                    Ok(())
                },
            )
            .await
    }

    /// Credit a wallet.
    ///
    /// # Errors
    ///
    /// - `WALLET_NOT_FOUND` / `VALIDATION_ERROR`
    pub async fn credit(
        &self,
        wallet_id: WalletId,
        amount: Money,
        reason: String,
        correlation_id: Option<String>,
    ) -> Result<CommandReceipt, DomainError> {
        self.runner
            .execute::<Wallet, _>(
                WALLET_EVENTS_TOPIC,
                wallet_id.stream_id(),
                correlation_id,
                move |root, now| {
                    let event = root.state().credit(amount, reason.clone(), now)?;
                    root.record(event);
                    Ok(())
                },
            )
            .await
    }

    /// Close a wallet.
    ///
    /// # Errors
    ///
    /// - `WALLET_NOT_FOUND`
    pub async fn delete_wallet(
        &self,
        wallet_id: WalletId,
        correlation_id: Option<String>,
    ) -> Result<CommandReceipt, DomainError> {
        self.runner
            .execute::<Wallet, _>(
                WALLET_EVENTS_TOPIC,
                wallet_id.stream_id(),
                correlation_id,
                |root, now| {
                    let event = root.state().delete(now)?;
                    root.record(event);
                    Ok(())
                },
            )
            .await
    }
}
