//! Wallet ledger: append-only transactions and a derived balance.
//!
//! Every balance change appends a [`Transaction`]; the cached
//! `wallet_balance` must always equal the sum of signed transaction
//! amounts. Debits are validated against the balance before anything is
//! appended, so the balance can never go negative.

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use crate::error::RegistrationError;
use crate::types::{
    EventId, Money, PaymentId, Transaction, TransactionId, TransactionKind, UserAccount,
};

impl UserAccount {
    /// Credit the wallet.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::InvalidAmount`] for a zero amount.
    #[instrument(skip(self), fields(user = %self.id))]
    pub fn deposit(
        &mut self,
        amount: Money,
        description: impl Into<String> + std::fmt::Debug,
        now: DateTime<Utc>,
    ) -> Result<&Transaction, RegistrationError> {
        if amount.is_zero() {
            return Err(RegistrationError::InvalidAmount {
                message: "deposit amount must be positive".to_string(),
            });
        }

        self.append(TransactionKind::Deposit, amount, None, None, description.into(), now)
    }

    /// Debit the wallet to pay for an event.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::InvalidAmount`] for a zero amount, or
    /// [`RegistrationError::InsufficientFunds`] when the balance cannot
    /// cover the charge. Nothing is recorded on error.
    #[instrument(skip(self), fields(user = %self.id, payment = %payment_id))]
    pub fn pay(
        &mut self,
        amount: Money,
        payment_id: PaymentId,
        event_id: EventId,
        description: impl Into<String> + std::fmt::Debug,
        now: DateTime<Utc>,
    ) -> Result<&Transaction, RegistrationError> {
        if amount.is_zero() {
            return Err(RegistrationError::InvalidAmount {
                message: "payment amount must be positive".to_string(),
            });
        }
        if self.wallet_balance < amount {
            return Err(RegistrationError::InsufficientFunds {
                balance: self.wallet_balance,
                requested: amount,
            });
        }

        self.append(
            TransactionKind::Payment,
            amount,
            Some(payment_id),
            Some(event_id),
            description.into(),
            now,
        )
    }

    /// Credit the wallet with a refund for a prior payment.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::DuplicateRefund`] when a refund entry
    /// already exists for `payment_id`, and
    /// [`RegistrationError::InvalidAmount`] for a zero amount.
    #[instrument(skip(self), fields(user = %self.id, payment = %payment_id))]
    pub fn refund(
        &mut self,
        amount: Money,
        payment_id: PaymentId,
        event_id: EventId,
        description: impl Into<String> + std::fmt::Debug,
        now: DateTime<Utc>,
    ) -> Result<&Transaction, RegistrationError> {
        if amount.is_zero() {
            return Err(RegistrationError::InvalidAmount {
                message: "refund amount must be positive".to_string(),
            });
        }
        let already_refunded = self.transactions.iter().any(|tx| {
            tx.kind == TransactionKind::Refund && tx.payment_id == Some(payment_id)
        });
        if already_refunded {
            return Err(RegistrationError::DuplicateRefund { payment: payment_id });
        }

        self.append(
            TransactionKind::Refund,
            amount,
            Some(payment_id),
            Some(event_id),
            description.into(),
            now,
        )
    }

    /// Current balance.
    #[must_use]
    pub const fn balance(&self) -> Money {
        self.wallet_balance
    }

    /// Balance recomputed from the transaction history.
    #[must_use]
    pub fn recomputed_balance(&self) -> i64 {
        self.transactions.iter().map(Transaction::signed_cents).sum()
    }

    /// Check that the cached balance matches the transaction history.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::InvariantViolation`] on drift.
    pub fn verify_balance(&self) -> Result<(), RegistrationError> {
        let recomputed = self.recomputed_balance();
        #[allow(clippy::cast_possible_wrap)]
        let cached = self.wallet_balance.cents() as i64;
        if recomputed == cached {
            Ok(())
        } else {
            Err(RegistrationError::invariant(format!(
                "wallet balance drift for user {}: cached {cached} cents, ledger sums to {recomputed} cents",
                self.id
            )))
        }
    }

    fn append(
        &mut self,
        kind: TransactionKind,
        amount: Money,
        payment_id: Option<PaymentId>,
        event_id: Option<EventId>,
        description: String,
        now: DateTime<Utc>,
    ) -> Result<&Transaction, RegistrationError> {
        let tx = Transaction {
            id: TransactionId::new(),
            kind,
            amount,
            payment_id,
            event_id,
            description,
            recorded_at: now,
        };

        self.wallet_balance = if kind.is_credit() {
            self.wallet_balance
                .checked_add(amount)
                .ok_or_else(|| RegistrationError::invariant("wallet balance overflow"))?
        } else {
            // Debits are pre-validated; hitting this means a caller skipped
            // the balance check.
            self.wallet_balance
                .checked_sub(amount)
                .ok_or_else(|| RegistrationError::invariant("wallet balance underflow"))?
        };

        debug!(kind = ?kind, amount = %amount, balance = %self.wallet_balance, "Ledger entry recorded");

        self.transactions.push(tx);
        self.transactions
            .last()
            .ok_or_else(|| RegistrationError::invariant("transaction vanished after push"))
    }
}
