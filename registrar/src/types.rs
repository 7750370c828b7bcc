//! Core domain types for campus event registration.
//!
//! Money is stored as unsigned cents; the ledger derives signs from
//! transaction kinds so a wallet balance can never be constructed negative.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::error::RegistrationError;

/// Monetary amount in cents (always non-negative).
///
/// Direction (credit vs. debit) is carried by [`TransactionKind`], not by
/// the amount itself.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Money(u64);

impl Money {
    /// Zero dollars.
    pub const ZERO: Self = Self(0);

    /// Create from cents.
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Create from whole dollars.
    #[must_use]
    pub const fn from_dollars(dollars: u64) -> Self {
        Self(dollars * 100)
    }

    /// Amount in cents.
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Whether this amount is zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checked addition.
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(sum) => Some(Self(sum)),
            None => None,
        }
    }

    /// Checked subtraction; `None` when it would go negative.
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(diff) => Some(Self(diff)),
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new random id.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// The underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a user account.
    UserId
);
uuid_id!(
    /// Unique identifier for a campus event.
    EventId
);
uuid_id!(
    /// Unique identifier for a payment.
    PaymentId
);
uuid_id!(
    /// Unique identifier for a ledger transaction.
    TransactionId
);

/// Kind of ledger transaction. Determines the sign applied to the amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Funds added to the wallet.
    Deposit,
    /// Funds deducted to pay for an event.
    Payment,
    /// Funds returned after a cancellation.
    Refund,
    /// Funds withdrawn from the wallet.
    Withdrawal,
}

impl TransactionKind {
    /// Whether this kind credits the wallet.
    #[must_use]
    pub const fn is_credit(self) -> bool {
        matches!(self, Self::Deposit | Self::Refund)
    }
}

/// An immutable ledger entry. Never mutated or deleted after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction id.
    pub id: TransactionId,
    /// Credit or debit kind.
    pub kind: TransactionKind,
    /// Magnitude in cents; sign derives from `kind`.
    pub amount: Money,
    /// Payment this entry settles or refunds, if any.
    pub payment_id: Option<PaymentId>,
    /// Event this entry relates to, if any.
    pub event_id: Option<EventId>,
    /// Human-readable description for statements.
    pub description: String,
    /// When the entry was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl Transaction {
    /// Signed amount in cents: credits positive, debits negative.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn signed_cents(&self) -> i64 {
        if self.kind.is_credit() {
            self.amount.cents() as i64
        } else {
            -(self.amount.cents() as i64)
        }
    }
}

/// A user account with an embedded wallet and transaction history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    /// User id.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Current wallet balance. Invariant: equals the sum of signed
    /// transaction amounts and is never negative.
    pub wallet_balance: Money,
    /// Append-only transaction history, oldest first.
    pub transactions: Vec<Transaction>,
    /// When the account was opened.
    pub opened_at: DateTime<Utc>,
}

impl UserAccount {
    /// Open an account with an empty wallet.
    #[must_use]
    pub const fn open(id: UserId, name: String, opened_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name,
            wallet_balance: Money::ZERO,
            transactions: Vec::new(),
            opened_at,
        }
    }
}

/// Lifecycle status of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    /// Holds a confirmed seat.
    Registered,
    /// Queued for a seat, FIFO.
    Waitlisted,
    /// Attended the event.
    Attended,
    /// Cancelled by the user.
    Cancelled,
}

impl RegistrationStatus {
    /// Whether this registration still occupies a roster position
    /// (a seat or a waitlist slot).
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Registered | Self::Waitlisted)
    }

    /// Whether this registration counts against event capacity.
    #[must_use]
    pub const fn holds_seat(self) -> bool {
        matches!(self, Self::Registered | Self::Attended)
    }
}

/// A user's registration on one event's roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// The registered user.
    pub user: UserId,
    /// Current lifecycle status.
    pub status: RegistrationStatus,
    /// Amount the user paid for the seat (zero for free events and
    /// waitlisted registrations).
    pub amount_paid: Money,
    /// Payment that funded this registration, if the event was paid.
    pub payment_id: Option<PaymentId>,
    /// When the user joined the roster. Waitlist promotion order.
    pub registered_at: DateTime<Utc>,
    /// When the registration was cancelled, if it was.
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// How a registration was paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Deducted from the user's wallet balance.
    Wallet,
    /// Charged through the external card gateway.
    Gateway,
}

/// Lifecycle status of a payment. Transitions are forward-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Awaiting gateway confirmation.
    Pending,
    /// Funds captured.
    Completed,
    /// Gateway declined or the intent was abandoned.
    Failed,
    /// Refunded after cancellation.
    Refunded,
}

impl PaymentStatus {
    /// Whether a transition to `next` is allowed.
    ///
    /// `Pending → Completed | Failed`, `Completed → Refunded`; terminal
    /// states never move.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Completed | Self::Failed) | (Self::Completed, Self::Refunded)
        )
    }
}

/// A payment record linking a user, an event, and (for card payments) a
/// gateway intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Unique payment id. Carried in gateway intent metadata.
    pub id: PaymentId,
    /// The paying user.
    pub user: UserId,
    /// The event being paid for.
    pub event: EventId,
    /// Wallet or gateway.
    pub method: PaymentMethod,
    /// Charged amount.
    pub amount: Money,
    /// Current status. The idempotency gate for gateway confirmation.
    pub status: PaymentStatus,
    /// Gateway intent id, for gateway payments.
    pub gateway_intent_id: Option<String>,
    /// Client secret the frontend uses to complete the card flow.
    pub client_secret: Option<String>,
    /// Amount refunded, once refunded.
    pub refund_amount: Option<Money>,
    /// When the payment was created.
    pub created_at: DateTime<Utc>,
    /// When the payment reached a terminal-ish status.
    pub finalized_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// Advance the status along a legal edge, stamping the finalization
    /// time.
    ///
    /// # Errors
    ///
    /// `InvariantViolation` if the edge is not allowed by
    /// [`PaymentStatus::can_transition_to`]; the payment is left untouched.
    pub fn transition_to(
        &mut self,
        next: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<(), RegistrationError> {
        if !self.status.can_transition_to(next) {
            return Err(RegistrationError::invariant(format!(
                "payment {} cannot move from {:?} to {next:?}",
                self.id, self.status
            )));
        }
        self.status = next;
        self.finalized_at = Some(at);
        Ok(())
    }
}

/// Event category, used in API paths and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// An on-campus workshop.
    Workshop,
    /// An off-campus trip.
    Trip,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workshop => write!(f, "workshop"),
            Self::Trip => write!(f, "trip"),
        }
    }
}

/// Capacity, pricing, schedule, and roster shared by every event kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCore {
    /// Event id.
    pub id: EventId,
    /// Display title.
    pub title: String,
    /// Maximum confirmed seats.
    pub capacity: u32,
    /// Count of registrations currently holding a seat
    /// (status registered or attended). Invariant: `<= capacity`.
    pub registered_count: u32,
    /// Price per seat. Zero means free.
    pub price: Money,
    /// When the event starts. Anchors the cancellation cutoff.
    pub starts_at: DateTime<Utc>,
    /// When the event ends.
    pub ends_at: DateTime<Utc>,
    /// All registrations, in insertion order (waitlist FIFO order).
    pub roster: Vec<Registration>,
}

impl EventCore {
    /// Create an empty event core.
    #[must_use]
    pub const fn new(
        id: EventId,
        title: String,
        capacity: u32,
        price: Money,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            title,
            capacity,
            registered_count: 0,
            price,
            starts_at,
            ends_at,
            roster: Vec::new(),
        }
    }

    /// Whether all seats are taken.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.registered_count >= self.capacity
    }

    /// Remaining confirmed seats.
    #[must_use]
    pub const fn seats_remaining(&self) -> u32 {
        self.capacity.saturating_sub(self.registered_count)
    }
}

/// An on-campus workshop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workshop {
    /// Shared capacity and schedule data.
    pub core: EventCore,
    /// Who runs the workshop.
    pub instructor: String,
    /// Room or building.
    pub location: String,
}

/// An off-campus trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trip {
    /// Shared capacity and schedule data.
    pub core: EventCore,
    /// Where the trip goes.
    pub destination: String,
    /// Where participants assemble.
    pub meeting_point: String,
}

/// Behavior shared by every registrable event kind.
///
/// Capacity and roster logic is written once against this trait; adding a
/// new event kind means implementing it and extending [`CampusEvent`].
pub trait RegistrableEvent {
    /// Shared capacity and schedule data.
    fn core(&self) -> &EventCore;

    /// Mutable access to shared data.
    fn core_mut(&mut self) -> &mut EventCore;

    /// The event's category.
    fn kind(&self) -> EventKind;
}

impl RegistrableEvent for Workshop {
    fn core(&self) -> &EventCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EventCore {
        &mut self.core
    }

    fn kind(&self) -> EventKind {
        EventKind::Workshop
    }
}

impl RegistrableEvent for Trip {
    fn core(&self) -> &EventCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EventCore {
        &mut self.core
    }

    fn kind(&self) -> EventKind {
        EventKind::Trip
    }
}

/// Any registrable campus event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CampusEvent {
    /// An on-campus workshop.
    Workshop(Workshop),
    /// An off-campus trip.
    Trip(Trip),
}

impl RegistrableEvent for CampusEvent {
    fn core(&self) -> &EventCore {
        match self {
            Self::Workshop(w) => w.core(),
            Self::Trip(t) => t.core(),
        }
    }

    fn core_mut(&mut self) -> &mut EventCore {
        match self {
            Self::Workshop(w) => w.core_mut(),
            Self::Trip(t) => t.core_mut(),
        }
    }

    fn kind(&self) -> EventKind {
        match self {
            Self::Workshop(w) => w.kind(),
            Self::Trip(t) => t.kind(),
        }
    }
}

/// Notifications emitted when registrations and payments change.
///
/// Appended to [`RegistrarState::outbox`] within the same reduction that
/// applies the change, so consumers observe them in commit order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// Funds were added to a wallet.
    FundsDeposited {
        /// Account credited.
        user: UserId,
        /// Amount credited.
        amount: Money,
    },
    /// A user secured a confirmed seat.
    RegistrationConfirmed {
        /// The registered user.
        user: UserId,
        /// The event.
        event: EventId,
        /// Amount paid for the seat.
        amount_paid: Money,
    },
    /// A user joined the waitlist.
    RegistrationWaitlisted {
        /// The waitlisted user.
        user: UserId,
        /// The event.
        event: EventId,
    },
    /// A waitlisted user was promoted into a freed seat.
    WaitlistPromoted {
        /// The promoted user.
        user: UserId,
        /// The event.
        event: EventId,
    },
    /// A registration was cancelled.
    RegistrationCancelled {
        /// The cancelling user.
        user: UserId,
        /// The event.
        event: EventId,
        /// Amount refunded to the wallet.
        refund_amount: Money,
    },
    /// Attendance was recorded.
    AttendanceMarked {
        /// The attending user.
        user: UserId,
        /// The event.
        event: EventId,
    },
    /// A payment reached completed.
    PaymentCompleted {
        /// The payment.
        payment: PaymentId,
    },
    /// A payment reached failed.
    PaymentFailed {
        /// The payment.
        payment: PaymentId,
    },
    /// A payment was refunded.
    PaymentRefunded {
        /// The payment.
        payment: PaymentId,
        /// Refunded amount.
        amount: Money,
    },
}

/// The registrar's entire in-memory state: users, events, payments, and
/// the outbox of emitted domain events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrarState {
    /// All user accounts.
    pub users: HashMap<UserId, UserAccount>,
    /// All scheduled events.
    pub events: HashMap<EventId, CampusEvent>,
    /// All payments.
    pub payments: HashMap<PaymentId, Payment>,
    /// Domain events emitted in commit order, oldest first.
    pub outbox: Vec<DomainEvent>,
    /// Error from the most recent rejected command, if any.
    pub last_error: Option<RegistrationError>,
}

impl RegistrarState {
    /// Empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a user's registration on an event, active or not.
    #[must_use]
    pub fn registration(&self, user: UserId, event: EventId) -> Option<&Registration> {
        self.events
            .get(&event)
            .and_then(|e| e.core().roster.iter().find(|r| r.user == user))
    }

    /// Look up a user's *active* registration on an event.
    #[must_use]
    pub fn active_registration(&self, user: UserId, event: EventId) -> Option<&Registration> {
        self.events.get(&event).and_then(|e| {
            e.core()
                .roster
                .iter()
                .find(|r| r.user == user && r.status.is_active())
        })
    }

    /// Find the payment behind a gateway intent id.
    #[must_use]
    pub fn payment_for_intent(&self, intent_id: &str) -> Option<&Payment> {
        self.payments
            .values()
            .find(|p| p.gateway_intent_id.as_deref() == Some(intent_id))
    }
}
