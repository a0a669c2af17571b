//! The closed set of domain events.
//!
//! Every event is internally tagged (`"type"` discriminator) with camelCase
//! payload fields, so the secondary-key fields the store indexes (`isbn`,
//! `userId`) sit at the top level of the JSON payload.
//!
//! Events are facts; once appended they never change. Schema evolution goes
//! through the envelope's `schemaVersion`, not through new tags.

use crate::ids::{BookId, Isbn, ReservationId, UserId};
use chrono::{DateTime, Utc};
use circulate_core::event::DomainEvent;
use circulate_core::money::Money;
use serde::{Deserialize, Serialize};

/// Field-level diff carried by `BookUpdated`: only fields that actually
/// changed are present, mirrored between `previous` and `updated`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookChanges {
    /// Title, when it changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Author, when it changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Publication year, when it changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publication_year: Option<i32>,
    /// Publisher, when it changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    /// Retail price, when it changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Money>,
}

impl BookChanges {
    /// Whether the diff carries anything.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.author.is_none()
            && self.publication_year.is_none()
            && self.publisher.is_none()
            && self.price.is_none()
    }
}

/// Events of the Book aggregate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BookEvent {
    /// A book reference entered the catalog.
    #[serde(rename_all = "camelCase")]
    BookCreated {
        /// The book's id (also the stream id, duplicated for consumers).
        book_id: BookId,
        /// Opaque unique key, checked at creation time.
        isbn: Isbn,
        /// Title.
        title: String,
        /// Author.
        author: String,
        /// Publication year.
        publication_year: i32,
        /// Publisher.
        publisher: String,
        /// Retail price.
        price: Money,
        /// Creation time.
        created_at: DateTime<Utc>,
        /// Last-update time (same as `created_at` here).
        updated_at: DateTime<Utc>,
    },

    /// Some fields changed; the payload carries only the changed ones.
    #[serde(rename_all = "camelCase")]
    BookUpdated {
        /// Prior values of the changed fields.
        previous: BookChanges,
        /// New values of the changed fields.
        updated: BookChanges,
        /// When the change happened.
        updated_at: DateTime<Utc>,
    },

    /// The retail price changed. Emitted alongside `BookUpdated` whenever an
    /// update touches `price`, for consumers that only track pricing.
    #[serde(rename_all = "camelCase")]
    BookRetailPriceUpdated {
        /// The new retail price.
        price: Money,
        /// When the change happened.
        updated_at: DateTime<Utc>,
    },

    /// The book was removed from the catalog (soft delete; history stays).
    #[serde(rename_all = "camelCase")]
    BookDeleted {
        /// When the deletion happened.
        deleted_at: DateTime<Utc>,
    },
}

impl DomainEvent for BookEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::BookCreated { .. } => "BookCreated",
            Self::BookUpdated { .. } => "BookUpdated",
            Self::BookRetailPriceUpdated { .. } => "BookRetailPriceUpdated",
            Self::BookDeleted { .. } => "BookDeleted",
        }
    }
}

/// Reservation lifecycle states.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    /// Just created, awaiting book validation.
    Created,
    /// Book validated, awaiting the fee debit.
    PendingPayment,
    /// Fee paid; the book is out.
    Reserved,
    /// Validation or payment failed. Terminal.
    Rejected,
    /// Returned after the due date, awaiting settlement.
    Late,
    /// Returned. Terminal.
    Returned,
    /// Cancelled while reserved. Terminal.
    Cancelled,
    /// Late fees reached the retail price; the reservation converted into a
    /// forced purchase. Terminal.
    Brought,
}

impl ReservationStatus {
    /// The wire tag for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::PendingPayment => "PENDING_PAYMENT",
            Self::Reserved => "RESERVED",
            Self::Rejected => "REJECTED",
            Self::Late => "LATE",
            Self::Returned => "RETURNED",
            Self::Cancelled => "CANCELLED",
            Self::Brought => "BROUGHT",
        }
    }

    /// Whether this status admits no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Returned | Self::Cancelled | Self::Brought
        )
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Events of the Reservation aggregate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ReservationEvent {
    /// A user asked to reserve a book reference.
    #[serde(rename_all = "camelCase")]
    ReservationCreated {
        /// The reservation id (also the stream id).
        reservation_id: ReservationId,
        /// The reserving user.
        user_id: UserId,
        /// The book reference being reserved.
        book_id: BookId,
        /// When the reservation was made.
        reserved_at: DateTime<Utc>,
        /// `reserved_at` plus the configured due offset.
        due_date: DateTime<Utc>,
        /// The reservation fee to be debited.
        fee_charged: Money,
    },

    /// The Books service reported whether the reference exists.
    #[serde(rename_all = "camelCase")]
    ReservationBookValidated {
        /// Whether the book reference is valid and reservable.
        is_valid: bool,
        /// Why validation failed, when it did.
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        /// The book's retail price, captured for the buyout threshold.
        #[serde(skip_serializing_if = "Option::is_none")]
        retail_price: Option<Money>,
        /// When the result was produced.
        validated_at: DateTime<Utc>,
    },

    /// The wallet debit succeeded.
    #[serde(rename_all = "camelCase")]
    ReservationPaymentSuccess {
        /// Amount debited.
        amount: Money,
        /// Correlates with the wallet-side payment event.
        payment_reference: String,
        /// When the debit happened.
        paid_at: DateTime<Utc>,
    },

    /// The wallet debit was declined.
    #[serde(rename_all = "camelCase")]
    ReservationPaymentDeclined {
        /// Why the payment failed.
        reason: String,
        /// When the decline happened.
        declined_at: DateTime<Utc>,
    },

    /// The book came back (on time, or late with fees below the buyout
    /// threshold).
    #[serde(rename_all = "camelCase")]
    ReservationReturned {
        /// When the book was returned.
        returned_at: DateTime<Utc>,
        /// Whole days past the due date (0 for on-time returns).
        days_late: u32,
        /// The late fee settled against the wallet.
        late_fee_applied: Money,
    },

    /// The user cancelled a reserved book.
    #[serde(rename_all = "camelCase")]
    ReservationCancelled {
        /// When the cancellation happened.
        cancelled_at: DateTime<Utc>,
        /// Optional caller-supplied reason.
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// A late return was recorded; doubles as the settlement request the
    /// Wallets service consumes.
    #[serde(rename_all = "camelCase")]
    ReservationOverdue {
        /// The wallet owner to settle against.
        user_id: UserId,
        /// Whole days past the due date.
        days_late: u32,
        /// The retail price captured at validation (the buyout threshold).
        retail_price: Money,
        /// When the overdue return was recorded.
        recorded_at: DateTime<Utc>,
    },

    /// Late fees reached the retail price; the book is considered bought.
    #[serde(rename_all = "camelCase")]
    ReservationBookBrought {
        /// The capped fee, equal to the retail price.
        purchase_price: Money,
        /// When the conversion happened.
        brought_at: DateTime<Utc>,
    },

    /// The reservation record was removed (terminal cleanup).
    #[serde(rename_all = "camelCase")]
    ReservationDeleted {
        /// When the deletion happened.
        deleted_at: DateTime<Utc>,
    },
}

impl DomainEvent for ReservationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::ReservationCreated { .. } => "ReservationCreated",
            Self::ReservationBookValidated { .. } => "ReservationBookValidated",
            Self::ReservationPaymentSuccess { .. } => "ReservationPaymentSuccess",
            Self::ReservationPaymentDeclined { .. } => "ReservationPaymentDeclined",
            Self::ReservationReturned { .. } => "ReservationReturned",
            Self::ReservationCancelled { .. } => "ReservationCancelled",
            Self::ReservationOverdue { .. } => "ReservationOverdue",
            Self::ReservationBookBrought { .. } => "ReservationBookBrought",
            Self::ReservationDeleted { .. } => "ReservationDeleted",
        }
    }
}

/// Events of the Wallet aggregate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WalletEvent {
    /// A wallet was opened for a user.
    #[serde(rename_all = "camelCase")]
    WalletCreated {
        /// The owning user; unique across live wallets.
        user_id: UserId,
        /// Opening balance.
        initial_balance: Money,
        /// When the wallet was opened.
        created_at: DateTime<Utc>,
    },

    /// The balance moved (debit or credit).
    #[serde(rename_all = "camelCase")]
    WalletBalanceChanged {
        /// Signed change (negative for debits).
        delta: Money,
        /// Balance after the change.
        balance: Money,
        /// What caused the change.
        reason: String,
        /// When the change happened.
        changed_at: DateTime<Utc>,
    },

    /// A reservation fee debit went through.
    #[serde(rename_all = "camelCase")]
    WalletPaymentSuccess {
        /// The reservation whose fee was paid.
        reservation_id: ReservationId,
        /// Amount debited.
        amount: Money,
        /// When the debit happened.
        paid_at: DateTime<Utc>,
    },

    /// A reservation fee debit was declined.
    #[serde(rename_all = "camelCase")]
    WalletPaymentDeclined {
        /// The reservation whose fee was declined.
        reservation_id: ReservationId,
        /// Amount requested.
        amount: Money,
        /// Why the debit was declined.
        reason: String,
        /// When the decline happened.
        declined_at: DateTime<Utc>,
    },

    /// A late-return settlement was applied; the signal the Reservations
    /// service uses to finalize the return.
    #[serde(rename_all = "camelCase")]
    WalletLateReturnApplied {
        /// The reservation being settled.
        reservation_id: ReservationId,
        /// Whole days past the due date.
        days_late: u32,
        /// The fee actually debited (capped at the retail price).
        fee_applied: Money,
        /// The retail price used as the cap.
        retail_price: Money,
        /// Whether the fee reached the cap, converting the reservation into
        /// a purchase.
        bought: bool,
        /// When the settlement was applied.
        applied_at: DateTime<Utc>,
    },

    /// The wallet was closed.
    #[serde(rename_all = "camelCase")]
    WalletDeleted {
        /// When the wallet was closed.
        deleted_at: DateTime<Utc>,
    },
}

impl DomainEvent for WalletEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::WalletCreated { .. } => "WalletCreated",
            Self::WalletBalanceChanged { .. } => "WalletBalanceChanged",
            Self::WalletPaymentSuccess { .. } => "WalletPaymentSuccess",
            Self::WalletPaymentDeclined { .. } => "WalletPaymentDeclined",
            Self::WalletLateReturnApplied { .. } => "WalletLateReturnApplied",
            Self::WalletDeleted { .. } => "WalletDeleted",
        }
    }
}
