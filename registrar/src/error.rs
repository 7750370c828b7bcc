//! Error taxonomy for registration, payments, and the wallet ledger.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{EventId, Money, PaymentId, UserId};

/// Everything that can go wrong while registering, paying, or cancelling.
///
/// Business rejections (insufficient funds, closed cancellation window,
/// duplicate registration) are expected outcomes and map to 4xx responses.
/// [`RegistrationError::PaymentGateway`] is transient and retryable.
/// [`RegistrationError::InvariantViolation`] means a bookkeeping bug and is
/// logged loudly.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum RegistrationError {
    /// Malformed or contradictory input.
    #[error("Validation failed: {message}")]
    Validation {
        /// What was wrong with the input.
        message: String,
    },

    /// No such user account.
    #[error("User not found: {user}")]
    UserNotFound {
        /// The unknown user id.
        user: UserId,
    },

    /// No such event.
    #[error("Event not found: {event}")]
    EventNotFound {
        /// The unknown event id.
        event: EventId,
    },

    /// No such payment.
    #[error("Payment not found: {payment}")]
    PaymentNotFound {
        /// The unknown payment id.
        payment: PaymentId,
    },

    /// The user already holds an active registration on this event.
    #[error("User {user} is already registered for event {event}")]
    AlreadyRegistered {
        /// The user.
        user: UserId,
        /// The event.
        event: EventId,
    },

    /// The user has no active registration on this event.
    #[error("User {user} has no active registration for event {event}")]
    NotRegistered {
        /// The user.
        user: UserId,
        /// The event.
        event: EventId,
    },

    /// Wallet balance cannot cover the charge.
    #[error("Insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// Current wallet balance.
        balance: Money,
        /// Amount that was requested.
        requested: Money,
    },

    /// Zero or otherwise unusable amount.
    #[error("Invalid amount: {message}")]
    InvalidAmount {
        /// Why the amount was rejected.
        message: String,
    },

    /// Payment flow invoked for a free event.
    #[error("Event {event} is free; no payment is required")]
    EventIsFree {
        /// The free event.
        event: EventId,
    },

    /// Cancellation requested after the cutoff.
    #[error("Cancellation window closed {days_past_cutoff} day(s) ago")]
    CancellationWindowClosed {
        /// How many days past the cutoff the request arrived.
        days_past_cutoff: i64,
    },

    /// Cancellation requested for an event that already ended.
    #[error("Event {event} has already ended")]
    EventAlreadyEnded {
        /// The finished event.
        event: EventId,
    },

    /// The external payment gateway failed or was unreachable. Retryable.
    #[error("Payment gateway error: {message}")]
    PaymentGateway {
        /// Gateway or transport error detail.
        message: String,
    },

    /// A second refund was attempted against the same payment.
    #[error("Payment {payment} has already been refunded")]
    DuplicateRefund {
        /// The already-refunded payment.
        payment: PaymentId,
    },

    /// Internal bookkeeping contradiction (balance mismatch, capacity
    /// overflow). Indicates a bug, not bad input.
    #[error("Invariant violation: {message}")]
    InvariantViolation {
        /// Which invariant broke and where.
        message: String,
    },
}

impl RegistrationError {
    /// Build a validation error from anything stringy.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Build a gateway error from anything stringy.
    pub fn gateway(message: impl Into<String>) -> Self {
        Self::PaymentGateway {
            message: message.into(),
        }
    }

    /// Build an invariant violation from anything stringy.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Whether retrying the same request may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::PaymentGateway { .. })
    }

    /// Whether this error indicates corrupted bookkeeping.
    #[must_use]
    pub const fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_actionable() {
        let err = RegistrationError::InsufficientFunds {
            balance: Money::from_cents(500),
            requested: Money::from_cents(2_000),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds: balance $5.00, requested $20.00"
        );
    }

    #[test]
    fn retryable_classification() {
        assert!(RegistrationError::gateway("connection refused").is_retryable());
        assert!(!RegistrationError::validation("bad input").is_retryable());
        assert!(RegistrationError::invariant("balance drift").is_invariant_violation());
    }
}
