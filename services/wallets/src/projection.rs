//! The wallets read model.

use circulate_core::config::EngineSettings;
use circulate_core::event::EventEnvelope;
use circulate_core::money::Money;
use circulate_core::pagination::PageRequest;
use circulate_domain::events::WalletEvent;
use circulate_domain::ids::{UserId, WalletId};
use circulate_projections::document::{
    DocumentFilter, DocumentStore, ProjectionError, ReadDocument, Result,
};
use circulate_projections::engine::Projection;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

/// Table/collection name for the wallets read model.
pub const WALLET_READ_MODELS: &str = "wallet_read_models";

/// The projected state of one wallet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRecord {
    /// The wallet's aggregate id.
    pub wallet_id: WalletId,
    /// The owning user.
    pub user_id: UserId,
    /// Current balance.
    pub balance: Money,
}

/// Folds wallet events into [`WalletRecord`] documents.
pub struct WalletProjection<S> {
    documents: Arc<S>,
}

impl<S> WalletProjection<S>
where
    S: DocumentStore<WalletRecord> + 'static,
{
    /// Create the projection over its document store.
    #[must_use]
    pub const fn new(documents: Arc<S>) -> Self {
        Self { documents }
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        let event: WalletEvent = envelope
            .decode()
            .map_err(|e| ProjectionError::Serialization(e.to_string()))?;
        let id = envelope.aggregate_id.as_str();
        let version = envelope.version.value();
        let at = envelope.timestamp;

        match event {
            WalletEvent::WalletCreated {
                user_id,
                initial_balance,
                ..
            } => {
                let wallet_id: WalletId = id
                    .parse()
                    .map(WalletId::from_uuid)
                    .map_err(|e| ProjectionError::Serialization(format!("wallet id: {e}")))?;
                let record = WalletRecord {
                    wallet_id,
                    user_id,
                    balance: initial_balance,
                };
                self.documents.apply(id, version, at, &record).await?;
            }
            WalletEvent::WalletBalanceChanged { balance, .. } => {
                let Some(doc) = self.documents.get_any(id).await? else {
                    return Ok(());
                };
                let mut record = doc.body;
                record.balance = balance;
                self.documents.apply(id, version, at, &record).await?;
            }
            // Payment outcomes and settlements don't change the document;
            // the paired balance change does.
            WalletEvent::WalletPaymentSuccess { .. }
            | WalletEvent::WalletPaymentDeclined { .. }
            | WalletEvent::WalletLateReturnApplied { .. } => {}
            WalletEvent::WalletDeleted { .. } => {
                self.documents.soft_delete(id, version, at).await?;
            }
        }

        Ok(())
    }
}

impl<S> Projection for WalletProjection<S>
where
    S: DocumentStore<WalletRecord> + 'static,
{
    fn name(&self) -> &str {
        WALLET_READ_MODELS
    }

    fn event_types(&self) -> &'static [&'static str] {
        &["WalletCreated", "WalletBalanceChanged", "WalletDeleted"]
    }

    fn apply(&self, envelope: &EventEnvelope) -> impl Future<Output = Result<()>> + Send {
        self.handle(envelope)
    }
}

/// The wallets query API.
pub struct WalletQueries<S> {
    documents: Arc<S>,
    settings: EngineSettings,
}

impl<S> WalletQueries<S>
where
    S: DocumentStore<WalletRecord> + 'static,
{
    /// Create the query API.
    #[must_use]
    pub const fn new(documents: Arc<S>, settings: EngineSettings) -> Self {
        Self {
            documents,
            settings,
        }
    }

    /// Fetch one wallet.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] on backend failures.
    pub async fn get_wallet(
        &self,
        wallet_id: &WalletId,
    ) -> Result<Option<ReadDocument<WalletRecord>>> {
        self.documents.get(&wallet_id.to_string()).await
    }

    /// Find the live wallet of a user.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] on backend failures.
    pub async fn get_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<ReadDocument<WalletRecord>>> {
        let filter = DocumentFilter::all().field("userId", user_id.to_string());
        let page = self
            .documents
            .query(&filter, &PageRequest::first(self.settings.pagination_default_limit))
            .await?;
        Ok(page.data.into_iter().next())
    }
}
