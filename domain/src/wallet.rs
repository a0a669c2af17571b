//! The Wallet aggregate: one balance per user.
//!
//! Ordinary debits reject overdrafts with `WALLET_INSUFFICIENT_FUNDS`. The
//! late-return settlement is the single exception: it may drive the balance
//! negative, but never by more than the capped fee (the retail price of the
//! book being settled).

use crate::events::WalletEvent;
use crate::ids::{ReservationId, UserId};
use chrono::{DateTime, Utc};
use circulate_core::aggregate::Aggregate;
use circulate_core::error::{DomainError, ErrorKind};
use circulate_core::money::Money;
use std::collections::HashMap;

/// Outcome of a reservation-fee debit attempt. Both branches produce events:
/// a decline is a fact worth recording, not an error.
#[derive(Clone, Debug)]
pub struct FeePayment {
    /// Whether the debit went through.
    pub approved: bool,
    /// Why it was declined, when it was.
    pub reason: Option<String>,
    /// The wallet events to append.
    pub events: Vec<WalletEvent>,
}

/// Outcome of a late-return settlement.
#[derive(Clone, Debug)]
pub struct LateReturnSettlement {
    /// The fee actually debited (capped at the retail price).
    pub fee_applied: Money,
    /// Whether the cap was reached, converting the reservation into a
    /// purchase.
    pub bought: bool,
    /// The wallet events to append.
    pub events: Vec<WalletEvent>,
}

/// The Wallet aggregate state: a fold of its event stream.
///
/// Per-reservation outcomes are part of the fold so that at-least-once
/// delivery of the same settlement request replays as a no-op instead of a
/// second debit.
#[derive(Clone, Debug, Default)]
pub struct Wallet {
    user_id: Option<UserId>,
    balance: Money,
    created_at: Option<DateTime<Utc>>,
    deleted_at: Option<DateTime<Utc>>,
    /// Reservation-fee outcomes already recorded: id → approved.
    fee_payments: HashMap<ReservationId, bool>,
    /// Late-return settlements already recorded: id → (fee, bought).
    late_settlements: HashMap<ReservationId, (Money, bool)>,
}

impl Wallet {
    /// The owning user, once created.
    #[must_use]
    pub const fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    /// The current balance.
    #[must_use]
    pub const fn balance(&self) -> Money {
        self.balance
    }

    /// Whether the wallet was closed.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Open a wallet for a user. One active wallet per user; the handler
    /// checks the log for an existing live wallet before calling this.
    ///
    /// # Errors
    ///
    /// - `VALIDATION_ERROR` when this stream already holds a wallet or the
    ///   opening balance is negative
    pub fn create(
        &self,
        user_id: UserId,
        initial_balance: Money,
        now: DateTime<Utc>,
    ) -> Result<WalletEvent, DomainError> {
        if self.user_id.is_some() || self.is_deleted() {
            return Err(DomainError::validation("wallet already exists"));
        }
        if initial_balance.is_negative() {
            return Err(DomainError::validation("initial balance cannot be negative"));
        }

        Ok(WalletEvent::WalletCreated {
            user_id,
            initial_balance,
            created_at: now,
        })
    }

    /// Debit the wallet.
    ///
    /// # Errors
    ///
    /// - `WALLET_NOT_FOUND` when the wallet does not exist
    /// - `VALIDATION_ERROR` for a non-positive amount
    /// - `WALLET_INSUFFICIENT_FUNDS` when the debit would overdraw
    pub fn debit(
        &self,
        amount: Money,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<WalletEvent, DomainError> {
        self.require_live()?;
        require_positive(amount)?;
        if (self.balance - amount).is_negative() {
            return Err(self.insufficient_funds(amount));
        }

        Ok(self.balance_changed(-amount, reason.into(), now))
    }

    /// Credit the wallet.
    ///
    /// # Errors
    ///
    /// - `WALLET_NOT_FOUND` when the wallet does not exist
    /// - `VALIDATION_ERROR` for a non-positive amount
    pub fn credit(
        &self,
        amount: Money,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<WalletEvent, DomainError> {
        self.require_live()?;
        require_positive(amount)?;
        Ok(self.balance_changed(amount, reason.into(), now))
    }

    /// Attempt the reservation-fee debit. A decline is recorded as an event,
    /// not surfaced as an error, because the attempt itself is a fact the
    /// choreography depends on.
    ///
    /// # Errors
    ///
    /// - `WALLET_NOT_FOUND` when the wallet does not exist
    /// - `VALIDATION_ERROR` for a non-positive fee
    pub fn attempt_fee_payment(
        &self,
        reservation_id: ReservationId,
        amount: Money,
        now: DateTime<Utc>,
    ) -> Result<FeePayment, DomainError> {
        self.require_live()?;
        require_positive(amount)?;

        // Redelivered request: replay the recorded outcome, emit nothing.
        if let Some(&approved) = self.fee_payments.get(&reservation_id) {
            return Ok(FeePayment {
                approved,
                reason: None,
                events: Vec::new(),
            });
        }

        if (self.balance - amount).is_negative() {
            let reason = format!(
                "insufficient funds: balance {} below fee {}",
                self.balance, amount
            );
            return Ok(FeePayment {
                approved: false,
                reason: Some(reason.clone()),
                events: vec![WalletEvent::WalletPaymentDeclined {
                    reservation_id,
                    amount,
                    reason,
                    declined_at: now,
                }],
            });
        }

        Ok(FeePayment {
            approved: true,
            reason: None,
            events: vec![
                self.balance_changed(
                    -amount,
                    format!("reservation fee for {reservation_id}"),
                    now,
                ),
                WalletEvent::WalletPaymentSuccess {
                    reservation_id,
                    amount,
                    paid_at: now,
                },
            ],
        })
    }

    /// Apply the late-return settlement: `fee = days_late × fee_per_day`,
    /// capped at the retail price. Reaching the cap converts the reservation
    /// into a purchase. This is the only path allowed to overdraw.
    ///
    /// # Errors
    ///
    /// - `WALLET_NOT_FOUND` when the wallet does not exist
    pub fn apply_late_return(
        &self,
        reservation_id: ReservationId,
        days_late: u32,
        retail_price: Money,
        fee_per_day: Money,
        now: DateTime<Utc>,
    ) -> Result<LateReturnSettlement, DomainError> {
        self.require_live()?;

        // Redelivered request: replay the recorded settlement, emit nothing.
        if let Some(&(fee_applied, bought)) = self.late_settlements.get(&reservation_id) {
            return Ok(LateReturnSettlement {
                fee_applied,
                bought,
                events: Vec::new(),
            });
        }

        let raw_fee = fee_per_day.times(u64::from(days_late));
        let bought = raw_fee >= retail_price;
        let fee_applied = raw_fee.min(retail_price);

        let mut events = Vec::with_capacity(2);
        if !fee_applied.is_zero() {
            events.push(self.balance_changed(
                -fee_applied,
                format!("late return settlement for {reservation_id}"),
                now,
            ));
        }
        events.push(WalletEvent::WalletLateReturnApplied {
            reservation_id,
            days_late,
            fee_applied,
            retail_price,
            bought,
            applied_at: now,
        });

        Ok(LateReturnSettlement {
            fee_applied,
            bought,
            events,
        })
    }

    /// Close the wallet.
    ///
    /// # Errors
    ///
    /// - `WALLET_NOT_FOUND` when it does not exist or is already closed
    pub fn delete(&self, now: DateTime<Utc>) -> Result<WalletEvent, DomainError> {
        self.require_live()?;
        Ok(WalletEvent::WalletDeleted { deleted_at: now })
    }

    fn balance_changed(&self, delta: Money, reason: String, now: DateTime<Utc>) -> WalletEvent {
        WalletEvent::WalletBalanceChanged {
            delta,
            balance: self.balance + delta,
            reason,
            changed_at: now,
        }
    }

    fn require_live(&self) -> Result<(), DomainError> {
        if self.user_id.is_none() || self.is_deleted() {
            return Err(DomainError::new(
                ErrorKind::WalletNotFound,
                "wallet does not exist",
            ));
        }
        Ok(())
    }

    fn insufficient_funds(&self, amount: Money) -> DomainError {
        DomainError::new(
            ErrorKind::WalletInsufficientFunds,
            format!("balance {} below requested {}", self.balance, amount),
        )
        .with_details(serde_json::json!({
            "balance": self.balance.cents(),
            "requested": amount.cents(),
        }))
    }
}

fn require_positive(amount: Money) -> Result<(), DomainError> {
    if amount.is_zero() || amount.is_negative() {
        return Err(DomainError::validation("amount must be positive"));
    }
    Ok(())
}

impl Aggregate for Wallet {
    type Event = WalletEvent;

    fn aggregate_type() -> &'static str {
        "wallet"
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            WalletEvent::WalletCreated {
                user_id,
                initial_balance,
                created_at,
            } => {
                self.user_id = Some(*user_id);
                self.balance = *initial_balance;
                self.created_at = Some(*created_at);
            }
            WalletEvent::WalletBalanceChanged { balance, .. } => {
                self.balance = *balance;
            }
            // Payment outcomes carry no balance movement of their own (the
            // paired WalletBalanceChanged does that); they feed the
            // per-reservation dedup maps.
            WalletEvent::WalletPaymentSuccess { reservation_id, .. } => {
                self.fee_payments.insert(*reservation_id, true);
            }
            WalletEvent::WalletPaymentDeclined { reservation_id, .. } => {
                self.fee_payments.insert(*reservation_id, false);
            }
            WalletEvent::WalletLateReturnApplied {
                reservation_id,
                fee_applied,
                bought,
                ..
            } => {
                self.late_settlements
                    .insert(*reservation_id, (*fee_applied, *bought));
            }
            WalletEvent::WalletDeleted { deleted_at } => {
                self.deleted_at = Some(*deleted_at);
            }
        }
    }
}
