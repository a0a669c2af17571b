//! The reservations read model.

use circulate_core::config::EngineSettings;
use circulate_core::event::EventEnvelope;
use circulate_core::money::Money;
use circulate_core::pagination::{Page, PageRequest};
use circulate_domain::events::{ReservationEvent, ReservationStatus};
use circulate_domain::ids::{BookId, ReservationId, UserId};
use circulate_projections::document::{
    DocumentFilter, DocumentStore, ProjectionError, ReadDocument, Result,
};
use circulate_projections::engine::Projection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

/// Table/collection name for the reservations read model.
pub const RESERVATION_READ_MODELS: &str = "reservation_read_models";

/// The projected state of one reservation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRecord {
    /// The reservation's aggregate id.
    pub reservation_id: ReservationId,
    /// The reserving user.
    pub user_id: UserId,
    /// The reserved book reference.
    pub book_id: BookId,
    /// Lifecycle status tag (`CREATED`, `RESERVED`, …).
    pub status: String,
    /// When the reservation was made.
    pub reserved_at: DateTime<Utc>,
    /// Due date.
    pub due_date: DateTime<Utc>,
    /// The reservation fee.
    pub fee_charged: Money,
    /// Retail price captured at validation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retail_price: Option<Money>,
    /// Payment reference once the fee debit succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_reference: Option<String>,
    /// Why validation or payment failed, when it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decline_reason: Option<String>,
    /// When the book came back (or converted into a purchase).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returned_at: Option<DateTime<Utc>>,
    /// Whole days past due at return time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_late: Option<u32>,
    /// The late fee settled against the wallet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub late_fee_applied: Option<Money>,
}

/// Folds reservation events into [`ReservationRecord`] documents.
pub struct ReservationProjection<S> {
    documents: Arc<S>,
}

impl<S> ReservationProjection<S>
where
    S: DocumentStore<ReservationRecord> + 'static,
{
    /// Create the projection over its document store.
    #[must_use]
    pub const fn new(documents: Arc<S>) -> Self {
        Self { documents }
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        let event: ReservationEvent = envelope
            .decode()
            .map_err(|e| ProjectionError::Serialization(e.to_string()))?;
        let id = envelope.aggregate_id.as_str();
        let version = envelope.version.value();
        let at = envelope.timestamp;

        if let ReservationEvent::ReservationCreated {
            reservation_id,
            user_id,
            book_id,
            reserved_at,
            due_date,
            fee_charged,
        } = &event
        {
            let record = ReservationRecord {
                reservation_id: *reservation_id,
                user_id: *user_id,
                book_id: *book_id,
                status: ReservationStatus::Created.as_str().to_string(),
                reserved_at: *reserved_at,
                due_date: *due_date,
                fee_charged: *fee_charged,
                retail_price: None,
                payment_reference: None,
                decline_reason: None,
                returned_at: None,
                days_late: None,
                late_fee_applied: None,
            };
            self.documents.apply(id, version, at, &record).await?;
            return Ok(());
        }

        if matches!(event, ReservationEvent::ReservationDeleted { .. }) {
            self.documents.soft_delete(id, version, at).await?;
            return Ok(());
        }

        // Everything else folds into an existing record; per-aggregate order
        // guarantees the create arrived first, and the version gate keeps
        // duplicates harmless.
        let Some(doc) = self.documents.get_any(id).await? else {
            return Ok(());
        };
        let mut record = doc.body;

        match event {
            ReservationEvent::ReservationBookValidated {
                is_valid,
                reason,
                retail_price,
                ..
            } => {
                if is_valid {
                    record.status = ReservationStatus::PendingPayment.as_str().to_string();
                    record.retail_price = retail_price;
                } else {
                    record.status = ReservationStatus::Rejected.as_str().to_string();
                    record.decline_reason = reason;
                }
            }
            ReservationEvent::ReservationPaymentSuccess {
                payment_reference, ..
            } => {
                record.status = ReservationStatus::Reserved.as_str().to_string();
                record.payment_reference = Some(payment_reference);
            }
            ReservationEvent::ReservationPaymentDeclined { reason, .. } => {
                record.status = ReservationStatus::Rejected.as_str().to_string();
                record.decline_reason = Some(reason);
            }
            ReservationEvent::ReservationReturned {
                returned_at,
                days_late,
                late_fee_applied,
            } => {
                record.status = ReservationStatus::Returned.as_str().to_string();
                record.returned_at = Some(returned_at);
                record.days_late = Some(days_late);
                record.late_fee_applied = Some(late_fee_applied);
            }
            ReservationEvent::ReservationCancelled { .. } => {
                record.status = ReservationStatus::Cancelled.as_str().to_string();
            }
            ReservationEvent::ReservationOverdue { days_late, .. } => {
                record.status = ReservationStatus::Late.as_str().to_string();
                record.days_late = Some(days_late);
            }
            ReservationEvent::ReservationBookBrought {
                purchase_price,
                brought_at,
            } => {
                record.status = ReservationStatus::Brought.as_str().to_string();
                record.returned_at = Some(brought_at);
                record.late_fee_applied = Some(purchase_price);
            }
            ReservationEvent::ReservationCreated { .. }
            | ReservationEvent::ReservationDeleted { .. } => unreachable!("handled above"),
        }

        self.documents.apply(id, version, at, &record).await?;
        Ok(())
    }
}

impl<S> Projection for ReservationProjection<S>
where
    S: DocumentStore<ReservationRecord> + 'static,
{
    fn name(&self) -> &str {
        RESERVATION_READ_MODELS
    }

    fn event_types(&self) -> &'static [&'static str] {
        &[
            "ReservationCreated",
            "ReservationBookValidated",
            "ReservationPaymentSuccess",
            "ReservationPaymentDeclined",
            "ReservationReturned",
            "ReservationCancelled",
            "ReservationOverdue",
            "ReservationBookBrought",
            "ReservationDeleted",
        ]
    }

    fn apply(&self, envelope: &EventEnvelope) -> impl Future<Output = Result<()>> + Send {
        self.handle(envelope)
    }
}

/// The reservations query API.
pub struct ReservationQueries<S> {
    documents: Arc<S>,
    settings: EngineSettings,
}

impl<S> ReservationQueries<S>
where
    S: DocumentStore<ReservationRecord> + 'static,
{
    /// Create the query API.
    #[must_use]
    pub const fn new(documents: Arc<S>, settings: EngineSettings) -> Self {
        Self {
            documents,
            settings,
        }
    }

    /// Fetch one reservation.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] on backend failures.
    pub async fn get_reservation(
        &self,
        reservation_id: &ReservationId,
    ) -> Result<Option<ReadDocument<ReservationRecord>>> {
        self.documents.get(&reservation_id.to_string()).await
    }

    /// Paginated history for one user, optionally narrowed to a status.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] on backend failures.
    pub async fn list_for_user(
        &self,
        user_id: &UserId,
        status: Option<ReservationStatus>,
        page: PageRequest,
    ) -> Result<Page<ReadDocument<ReservationRecord>>> {
        let page = page.clamped(&self.settings);
        let mut filter = DocumentFilter::all().field("userId", user_id.to_string());
        if let Some(status) = status {
            filter = filter.field("status", status.as_str());
        }
        self.documents.query(&filter, &page).await
    }
}
