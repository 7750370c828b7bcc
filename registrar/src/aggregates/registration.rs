//! The registration aggregate: one reducer over users, events, and payments.
//!
//! All money movement, seat accounting, and payment transitions happen
//! inside single reductions, which the runtime serializes. That makes each
//! command all-or-nothing: a wallet charge and its admission commit
//! together, and a cancellation's refund, release, and promotion commit
//! together.
//!
//! Gateway calls are the only I/O, and they run as effects *between*
//! reductions: registering with a card opens an intent but commits nothing;
//! only the confirmation feedback action creates and later completes the
//! payment.

use std::sync::Arc;

use registrar_core::effect::Effect;
use registrar_core::environment::Clock;
use registrar_core::reducer::{Effects, Reducer};
use registrar_core::smallvec;
use tracing::{debug, error, info, warn};

use crate::error::RegistrationError;
use crate::gateway::{IntentMetadata, IntentStatus, PaymentGateway};
use crate::policy::{CancellationPolicy, DenialReason};
use crate::types::{
    CampusEvent, DomainEvent, EventId, Money, Payment, PaymentId, PaymentMethod, PaymentStatus,
    RegistrableEvent, RegistrarState, RegistrationStatus, UserAccount, UserId,
};

/// Commands and gateway feedback processed by [`RegistrationReducer`].
#[derive(Debug, Clone)]
pub enum RegistrationAction {
    // -- Commands --
    /// Open a user account with an empty wallet.
    OpenAccount {
        /// New account id.
        user: UserId,
        /// Display name.
        name: String,
    },
    /// Schedule a new event.
    ScheduleEvent {
        /// The event to schedule.
        event: CampusEvent,
    },
    /// Add funds to a wallet.
    DepositFunds {
        /// Account to credit.
        user: UserId,
        /// Amount to credit.
        amount: Money,
    },
    /// Register a user for an event.
    Register {
        /// The registering user.
        user: UserId,
        /// The target event.
        event: EventId,
        /// How to pay, if the event is priced.
        method: PaymentMethod,
    },
    /// Confirm a pending gateway payment against the gateway's
    /// authoritative intent status. Idempotent.
    ConfirmGatewayPayment {
        /// The pending payment.
        payment: PaymentId,
    },
    /// Cancel an active registration.
    Cancel {
        /// The cancelling user.
        user: UserId,
        /// The event.
        event: EventId,
    },
    /// Record attendance for a registered user.
    MarkAttended {
        /// The attending user.
        user: UserId,
        /// The event.
        event: EventId,
    },

    // -- Gateway feedback --
    /// An intent was opened for a card registration.
    IntentOpened {
        /// The registering user.
        user: UserId,
        /// The target event.
        event: EventId,
        /// The payment record to create.
        payment: PaymentId,
        /// The charge amount.
        amount: Money,
        /// Gateway intent id.
        intent_id: String,
        /// Secret for the frontend card flow.
        client_secret: String,
    },
    /// Intent creation failed; nothing was committed.
    IntentOpenFailed {
        /// The registering user.
        user: UserId,
        /// The target event.
        event: EventId,
        /// Gateway error detail.
        message: String,
    },
    /// The gateway reported an intent's status during confirmation.
    IntentResolved {
        /// The payment being confirmed.
        payment: PaymentId,
        /// Authoritative status from the gateway.
        status: IntentStatus,
    },
    /// Confirmation could not reach the gateway; the payment stays pending.
    IntentResolveFailed {
        /// The payment left pending.
        payment: PaymentId,
        /// Gateway error detail.
        message: String,
    },
}

/// Injected dependencies for the registration reducer.
pub struct RegistrationEnvironment {
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Card payment provider.
    pub gateway: Arc<dyn PaymentGateway>,
    /// Cancellation window rules.
    pub policy: CancellationPolicy,
}

/// Reducer implementing registration, payment, and cancellation flows.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistrationReducer;

impl RegistrationReducer {
    /// Create the reducer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn ok() -> Effects<RegistrationAction> {
        smallvec![]
    }

    fn fail(state: &mut RegistrarState, err: RegistrationError) -> Effects<RegistrationAction> {
        if err.is_invariant_violation() {
            error!(error = %err, "Invariant violation");
        } else {
            warn!(error = %err, "Command rejected");
        }
        state.last_error = Some(err);
        smallvec![]
    }

    fn handle_open_account(
        state: &mut RegistrarState,
        user: UserId,
        name: String,
        env: &RegistrationEnvironment,
    ) -> Effects<RegistrationAction> {
        if state.users.contains_key(&user) {
            return Self::fail(
                state,
                RegistrationError::validation(format!("account {user} already exists")),
            );
        }

        let account = UserAccount::open(user, name, env.clock.now());
        info!(user = %user, "Account opened");
        state.users.insert(user, account);
        Self::ok()
    }

    fn handle_schedule_event(
        state: &mut RegistrarState,
        event: CampusEvent,
    ) -> Effects<RegistrationAction> {
        let core = event.core();
        if state.events.contains_key(&core.id) {
            return Self::fail(
                state,
                RegistrationError::validation(format!("event {} already scheduled", core.id)),
            );
        }
        if core.ends_at < core.starts_at {
            return Self::fail(
                state,
                RegistrationError::validation("event ends before it starts"),
            );
        }
        if !core.roster.is_empty() || core.registered_count != 0 {
            return Self::fail(
                state,
                RegistrationError::validation("new events must have an empty roster"),
            );
        }

        info!(event = %core.id, title = %core.title, capacity = core.capacity, "Event scheduled");
        state.events.insert(core.id, event);
        Self::ok()
    }

    fn handle_deposit(
        state: &mut RegistrarState,
        user: UserId,
        amount: Money,
        env: &RegistrationEnvironment,
    ) -> Effects<RegistrationAction> {
        let now = env.clock.now();
        let Some(account) = state.users.get_mut(&user) else {
            return Self::fail(state, RegistrationError::UserNotFound { user });
        };

        if let Err(err) = account.deposit(amount, "wallet top-up", now) {
            return Self::fail(state, err);
        }

        state.outbox.push(DomainEvent::FundsDeposited { user, amount });
        Self::ok()
    }

    fn handle_register(
        state: &mut RegistrarState,
        user: UserId,
        event_id: EventId,
        method: PaymentMethod,
        env: &RegistrationEnvironment,
    ) -> Effects<RegistrationAction> {
        let now = env.clock.now();

        if !state.users.contains_key(&user) {
            return Self::fail(state, RegistrationError::UserNotFound { user });
        }
        let Some(event) = state.events.get(&event_id) else {
            return Self::fail(state, RegistrationError::EventNotFound { event: event_id });
        };
        let core = event.core();
        if now >= core.ends_at {
            return Self::fail(state, RegistrationError::EventAlreadyEnded { event: event_id });
        }
        if state.active_registration(user, event_id).is_some() {
            return Self::fail(
                state,
                RegistrationError::AlreadyRegistered { user, event: event_id },
            );
        }

        let price = core.price;
        let title = core.title.clone();

        // Free events bypass payment entirely, whatever method the caller
        // named.
        if price.is_zero() {
            return Self::admit_unpaid(state, user, event_id, now);
        }

        // Priced events charge up front even when the event is full: the
        // waitlisted entry carries its amount_paid and payment link, so a
        // freed seat goes to someone who has already paid and cancelling
        // from the waitlist refunds in full.
        match method {
            PaymentMethod::Wallet => {
                Self::register_via_wallet(state, user, event_id, price, &title, now)
            },
            PaymentMethod::Gateway => Self::register_via_gateway(env, user, event_id, price),
        }
    }

    /// Admit a free event's registration; no payment or ledger entry.
    fn admit_unpaid(
        state: &mut RegistrarState,
        user: UserId,
        event_id: EventId,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Effects<RegistrationAction> {
        let Some(event) = state.events.get_mut(&event_id) else {
            return Self::fail(state, RegistrationError::EventNotFound { event: event_id });
        };
        let status = match event.core_mut().admit(user, now) {
            Ok(status) => status,
            Err(err) => return Self::fail(state, err),
        };

        state.outbox.push(match status {
            RegistrationStatus::Registered | RegistrationStatus::Attended => {
                DomainEvent::RegistrationConfirmed {
                    user,
                    event: event_id,
                    amount_paid: Money::ZERO,
                }
            },
            RegistrationStatus::Waitlisted | RegistrationStatus::Cancelled => {
                DomainEvent::RegistrationWaitlisted { user, event: event_id }
            },
        });
        Self::ok()
    }

    /// Wallet path: charge and admit inside this reduction, all-or-nothing.
    fn register_via_wallet(
        state: &mut RegistrarState,
        user: UserId,
        event_id: EventId,
        price: Money,
        title: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Effects<RegistrationAction> {
        if price.is_zero() {
            // Charging paths only ever see priced events.
            return Self::fail(state, RegistrationError::EventIsFree { event: event_id });
        }
        let payment_id = PaymentId::new();

        {
            let Some(account) = state.users.get_mut(&user) else {
                return Self::fail(state, RegistrationError::UserNotFound { user });
            };
            if let Err(err) = account.pay(price, payment_id, event_id, title, now) {
                return Self::fail(state, err);
            }
        }

        let status = {
            let Some(event) = state.events.get_mut(&event_id) else {
                return Self::fail(state, RegistrationError::EventNotFound { event: event_id });
            };
            match event.core_mut().admit(user, now) {
                Ok(status) => status,
                Err(err) => {
                    // Reverse the charge; nothing from this reduction is
                    // visible until it returns.
                    if let Some(account) = state.users.get_mut(&user) {
                        let _ = account.refund(
                            price,
                            payment_id,
                            event_id,
                            "registration reversal",
                            now,
                        );
                    }
                    return Self::fail(state, err);
                },
            }
        };

        Self::stamp_registration(state, user, event_id, price, payment_id);
        state.payments.insert(
            payment_id,
            Payment {
                id: payment_id,
                user,
                event: event_id,
                method: PaymentMethod::Wallet,
                amount: price,
                status: PaymentStatus::Completed,
                gateway_intent_id: None,
                client_secret: None,
                refund_amount: None,
                created_at: now,
                finalized_at: Some(now),
            },
        );

        info!(user = %user, event = %event_id, payment = %payment_id, amount = %price, status = ?status, "Wallet registration");
        state.outbox.push(match status {
            RegistrationStatus::Registered | RegistrationStatus::Attended => {
                DomainEvent::RegistrationConfirmed {
                    user,
                    event: event_id,
                    amount_paid: price,
                }
            },
            RegistrationStatus::Waitlisted | RegistrationStatus::Cancelled => {
                DomainEvent::RegistrationWaitlisted { user, event: event_id }
            },
        });
        state.outbox.push(DomainEvent::PaymentCompleted { payment: payment_id });
        Self::ok()
    }

    /// Gateway path: open an intent as an effect. Nothing is committed
    /// here; the feedback action creates the pending payment, and
    /// confirmation admits.
    fn register_via_gateway(
        env: &RegistrationEnvironment,
        user: UserId,
        event_id: EventId,
        price: Money,
    ) -> Effects<RegistrationAction> {
        let payment_id = PaymentId::new();
        let gateway = Arc::clone(&env.gateway);
        let metadata = IntentMetadata {
            user,
            event: event_id,
            payment: payment_id,
        };

        smallvec![Effect::future(async move {
            match gateway.create_intent(price.cents(), "usd", metadata).await {
                Ok(intent) => Some(RegistrationAction::IntentOpened {
                    user,
                    event: event_id,
                    payment: payment_id,
                    amount: price,
                    intent_id: intent.intent_id,
                    client_secret: intent.client_secret,
                }),
                Err(err) => Some(RegistrationAction::IntentOpenFailed {
                    user,
                    event: event_id,
                    message: err.to_string(),
                }),
            }
        })]
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_intent_opened(
        state: &mut RegistrarState,
        user: UserId,
        event_id: EventId,
        payment_id: PaymentId,
        amount: Money,
        intent_id: String,
        client_secret: String,
        env: &RegistrationEnvironment,
    ) -> Effects<RegistrationAction> {
        debug!(payment = %payment_id, intent = %intent_id, "Gateway intent opened");
        state.payments.insert(
            payment_id,
            Payment {
                id: payment_id,
                user,
                event: event_id,
                method: PaymentMethod::Gateway,
                amount,
                status: PaymentStatus::Pending,
                gateway_intent_id: Some(intent_id),
                client_secret: Some(client_secret),
                refund_amount: None,
                created_at: env.clock.now(),
                finalized_at: None,
            },
        );
        Self::ok()
    }

    fn handle_confirm(
        state: &mut RegistrarState,
        payment_id: PaymentId,
        env: &RegistrationEnvironment,
    ) -> Effects<RegistrationAction> {
        let Some(payment) = state.payments.get(&payment_id) else {
            return Self::fail(state, RegistrationError::PaymentNotFound { payment: payment_id });
        };

        if !payment.status.can_transition_to(PaymentStatus::Completed) {
            // At-least-once webhooks and client retries land here.
            debug!(payment = %payment_id, status = ?payment.status, "Confirmation replay ignored");
            return Self::ok();
        }

        let Some(intent_id) = payment.gateway_intent_id.clone() else {
            return Self::fail(
                state,
                RegistrationError::invariant(format!(
                    "pending gateway payment {payment_id} has no intent id"
                )),
            );
        };

        let gateway = Arc::clone(&env.gateway);
        smallvec![Effect::future(async move {
            match gateway.retrieve_intent(&intent_id).await {
                Ok(status) => Some(RegistrationAction::IntentResolved {
                    payment: payment_id,
                    status,
                }),
                Err(err) => Some(RegistrationAction::IntentResolveFailed {
                    payment: payment_id,
                    message: err.to_string(),
                }),
            }
        })]
    }

    fn handle_intent_resolved(
        state: &mut RegistrarState,
        payment_id: PaymentId,
        status: IntentStatus,
        env: &RegistrationEnvironment,
    ) -> Effects<RegistrationAction> {
        let now = env.clock.now();

        let Some(payment) = state.payments.get(&payment_id) else {
            return Self::fail(state, RegistrationError::PaymentNotFound { payment: payment_id });
        };
        // The status gate: replays of an already-finalized payment are
        // no-ops, which makes the whole confirmation path idempotent.
        if !payment.status.can_transition_to(PaymentStatus::Completed) {
            debug!(payment = %payment_id, status = ?payment.status, "Intent resolution replay ignored");
            return Self::ok();
        }

        match status {
            IntentStatus::Pending => {
                debug!(payment = %payment_id, "Intent still pending at the gateway");
                Self::ok()
            },
            IntentStatus::Failed | IntentStatus::Canceled => {
                if let Some(payment) = state.payments.get_mut(&payment_id) {
                    if let Err(err) = payment.transition_to(PaymentStatus::Failed, now) {
                        return Self::fail(state, err);
                    }
                }
                info!(payment = %payment_id, gateway_status = ?status, "Gateway payment failed");
                state.outbox.push(DomainEvent::PaymentFailed { payment: payment_id });
                Self::ok()
            },
            IntentStatus::Succeeded => Self::finalize_admission(state, payment_id, now),
        }
    }

    /// Complete a succeeded gateway payment: transition it, record the
    /// offsetting ledger pair, and admit the user. Runs at most once per
    /// payment thanks to the pending-status gate.
    fn finalize_admission(
        state: &mut RegistrarState,
        payment_id: PaymentId,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Effects<RegistrationAction> {
        let (user, event_id, amount) = {
            let Some(payment) = state.payments.get_mut(&payment_id) else {
                return Self::fail(
                    state,
                    RegistrationError::PaymentNotFound { payment: payment_id },
                );
            };
            if let Err(err) = payment.transition_to(PaymentStatus::Completed, now) {
                return Self::fail(state, err);
            }
            (payment.user, payment.event, payment.amount)
        };

        let title = state
            .events
            .get(&event_id)
            .map(|e| e.core().title.clone())
            .unwrap_or_default();

        // Card funds flow through the wallet ledger as a deposit/payment
        // pair: the balance is unchanged, and the payment gets its single
        // debit entry for the audit trail.
        if let Some(account) = state.users.get_mut(&user) {
            let credited = account
                .deposit(amount, format!("card payment received: {title}"), now)
                .map(|_| ());
            let debited = credited.and_then(|()| {
                account
                    .pay(amount, payment_id, event_id, &title, now)
                    .map(|_| ())
            });
            if let Err(err) = debited {
                return Self::fail(
                    state,
                    RegistrationError::invariant(format!(
                        "ledger rejected completed gateway payment {payment_id}: {err}"
                    )),
                );
            }
        }

        let admitted = {
            let Some(event) = state.events.get_mut(&event_id) else {
                return Self::fail(
                    state,
                    RegistrationError::invariant(format!(
                        "completed payment {payment_id} references missing event {event_id}"
                    )),
                );
            };
            event.core_mut().admit(user, now)
        };

        match admitted {
            Ok(status) => {
                Self::stamp_registration(state, user, event_id, amount, payment_id);
                info!(user = %user, event = %event_id, payment = %payment_id, status = ?status, "Gateway registration finalized");
                state.outbox.push(match status {
                    RegistrationStatus::Registered | RegistrationStatus::Attended => {
                        DomainEvent::RegistrationConfirmed {
                            user,
                            event: event_id,
                            amount_paid: amount,
                        }
                    },
                    RegistrationStatus::Waitlisted | RegistrationStatus::Cancelled => {
                        DomainEvent::RegistrationWaitlisted { user, event: event_id }
                    },
                });
                state.outbox.push(DomainEvent::PaymentCompleted { payment: payment_id });
                Self::ok()
            },
            Err(RegistrationError::AlreadyRegistered { .. }) => {
                // The user registered through another path while the card
                // flow was in flight. Money moved; flag for reconciliation.
                Self::fail(
                    state,
                    RegistrationError::invariant(format!(
                        "payment {payment_id} completed but user {user} already holds a registration on {event_id}"
                    )),
                )
            },
            Err(err) => Self::fail(state, err),
        }
    }

    fn handle_cancel(
        state: &mut RegistrarState,
        user: UserId,
        event_id: EventId,
        env: &RegistrationEnvironment,
    ) -> Effects<RegistrationAction> {
        let now = env.clock.now();

        if !state.users.contains_key(&user) {
            return Self::fail(state, RegistrationError::UserNotFound { user });
        }
        let Some(event) = state.events.get(&event_id) else {
            return Self::fail(state, RegistrationError::EventNotFound { event: event_id });
        };
        let core = event.core();

        let Some(registration) = state.active_registration(user, event_id) else {
            return Self::fail(state, RegistrationError::NotRegistered { user, event: event_id });
        };
        let refund_amount = registration.amount_paid;
        let payment_id = registration.payment_id;

        let decision = env.policy.evaluate(core, now);
        if !decision.allowed {
            let err = match decision.reason {
                Some(DenialReason::EventEnded) => {
                    RegistrationError::EventAlreadyEnded { event: event_id }
                },
                Some(DenialReason::WindowClosed) | None => {
                    RegistrationError::CancellationWindowClosed {
                        days_past_cutoff: (now - decision.cutoff_date).num_days(),
                    }
                },
            };
            return Self::fail(state, err);
        }
        let title = core.title.clone();

        // Validate the refund fully before touching anything, so the
        // release, refund, and payment transition land together or not
        // at all.
        if !refund_amount.is_zero() {
            let Some(pid) = payment_id else {
                return Self::fail(
                    state,
                    RegistrationError::invariant(format!(
                        "paid registration for {user} on {event_id} has no payment id"
                    )),
                );
            };
            match state.payments.get(&pid).map(|p| p.status) {
                Some(PaymentStatus::Completed) => {},
                Some(PaymentStatus::Refunded) => {
                    return Self::fail(state, RegistrationError::DuplicateRefund { payment: pid });
                },
                Some(other) => {
                    return Self::fail(
                        state,
                        RegistrationError::invariant(format!(
                            "refund requested for payment {pid} in status {other:?}"
                        )),
                    );
                },
                None => {
                    return Self::fail(state, RegistrationError::PaymentNotFound { payment: pid });
                },
            }
            let duplicate = state.users.get(&user).is_some_and(|account| {
                account.transactions.iter().any(|tx| {
                    tx.kind == crate::types::TransactionKind::Refund
                        && tx.payment_id == Some(pid)
                })
            });
            if duplicate {
                return Self::fail(state, RegistrationError::DuplicateRefund { payment: pid });
            }
        }

        // Commit: refund, payment transition, release + promotion.
        if !refund_amount.is_zero() {
            if let (Some(pid), Some(account)) = (payment_id, state.users.get_mut(&user)) {
                if let Err(err) = account.refund(
                    refund_amount,
                    pid,
                    event_id,
                    format!("refund: {title}"),
                    now,
                ) {
                    return Self::fail(state, err);
                }
                if let Some(payment) = state.payments.get_mut(&pid) {
                    if let Err(err) = payment.transition_to(PaymentStatus::Refunded, now) {
                        return Self::fail(state, err);
                    }
                    payment.refund_amount = Some(refund_amount);
                }
                state.outbox.push(DomainEvent::PaymentRefunded {
                    payment: pid,
                    amount: refund_amount,
                });
            }
        }

        let outcome = {
            let Some(event) = state.events.get_mut(&event_id) else {
                return Self::fail(state, RegistrationError::EventNotFound { event: event_id });
            };
            match event.core_mut().release(user, now) {
                Ok(outcome) => outcome,
                Err(err) => return Self::fail(state, err),
            }
        };

        info!(
            user = %user,
            event = %event_id,
            refund = %refund_amount,
            promoted = ?outcome.promoted,
            "Registration cancelled"
        );
        state.outbox.push(DomainEvent::RegistrationCancelled {
            user,
            event: event_id,
            refund_amount,
        });
        if let Some(promoted) = outcome.promoted {
            state.outbox.push(DomainEvent::WaitlistPromoted {
                user: promoted,
                event: event_id,
            });
        }
        Self::ok()
    }

    fn handle_mark_attended(
        state: &mut RegistrarState,
        user: UserId,
        event_id: EventId,
    ) -> Effects<RegistrationAction> {
        let result = {
            let Some(event) = state.events.get_mut(&event_id) else {
                return Self::fail(state, RegistrationError::EventNotFound { event: event_id });
            };
            event.core_mut().mark_attended(user)
        };
        match result {
            Ok(()) => {
                state.outbox.push(DomainEvent::AttendanceMarked { user, event: event_id });
                Self::ok()
            },
            Err(err) => Self::fail(state, err),
        }
    }

    /// Record the price and payment on the roster entry `admit` created.
    fn stamp_registration(
        state: &mut RegistrarState,
        user: UserId,
        event_id: EventId,
        amount: Money,
        payment_id: PaymentId,
    ) {
        if let Some(event) = state.events.get_mut(&event_id) {
            if let Some(entry) = event
                .core_mut()
                .roster
                .iter_mut()
                .rev()
                .find(|r| r.user == user && r.status.is_active())
            {
                entry.amount_paid = amount;
                entry.payment_id = Some(payment_id);
            }
        }
    }
}

impl Reducer for RegistrationReducer {
    type State = RegistrarState;
    type Action = RegistrationAction;
    type Environment = RegistrationEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Effects<Self::Action> {
        // Each action reports its own outcome; a rejection from a previous
        // action must not leak into this one.
        state.last_error = None;

        match action {
            RegistrationAction::OpenAccount { user, name } => {
                Self::handle_open_account(state, user, name, env)
            },
            RegistrationAction::ScheduleEvent { event } => {
                Self::handle_schedule_event(state, event)
            },
            RegistrationAction::DepositFunds { user, amount } => {
                Self::handle_deposit(state, user, amount, env)
            },
            RegistrationAction::Register { user, event, method } => {
                Self::handle_register(state, user, event, method, env)
            },
            RegistrationAction::ConfirmGatewayPayment { payment } => {
                Self::handle_confirm(state, payment, env)
            },
            RegistrationAction::Cancel { user, event } => {
                Self::handle_cancel(state, user, event, env)
            },
            RegistrationAction::MarkAttended { user, event } => {
                Self::handle_mark_attended(state, user, event)
            },
            RegistrationAction::IntentOpened {
                user,
                event,
                payment,
                amount,
                intent_id,
                client_secret,
            } => Self::handle_intent_opened(
                state,
                user,
                event,
                payment,
                amount,
                intent_id,
                client_secret,
                env,
            ),
            RegistrationAction::IntentOpenFailed { user, event, message } => {
                warn!(user = %user, event = %event, error = %message, "Intent creation failed");
                Self::fail(state, RegistrationError::gateway(message))
            },
            RegistrationAction::IntentResolved { payment, status } => {
                Self::handle_intent_resolved(state, payment, status, env)
            },
            RegistrationAction::IntentResolveFailed { payment, message } => {
                warn!(payment = %payment, error = %message, "Confirmation could not reach gateway");
                Self::fail(state, RegistrationError::gateway(message))
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::gateway::MockGateway;
    use crate::types::{EventCore, Workshop};
    use chrono::{Duration, TimeZone, Utc};
    use registrar_core::environment::FixedClock;
    use registrar_testing::{ReducerTest, assertions};

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 1, 12, 0, 0).single().expect("valid date")
    }

    fn env_at(time: chrono::DateTime<Utc>) -> RegistrationEnvironment {
        RegistrationEnvironment {
            clock: Arc::new(FixedClock::at(time)),
            gateway: Arc::new(MockGateway::new()),
            policy: CancellationPolicy::default(),
        }
    }

    fn workshop(id: EventId, capacity: u32, price: Money, starts_in_days: i64) -> CampusEvent {
        let starts_at = now() + Duration::days(starts_in_days);
        CampusEvent::Workshop(Workshop {
            core: EventCore::new(
                id,
                "Letterpress Basics".to_string(),
                capacity,
                price,
                starts_at,
                starts_at + Duration::hours(3),
            ),
            instructor: "R. Ortiz".to_string(),
            location: "Print Lab".to_string(),
        })
    }

    /// State with one funded user and one scheduled event.
    fn seeded(
        user: UserId,
        balance: Money,
        event: CampusEvent,
        env: &RegistrationEnvironment,
    ) -> RegistrarState {
        let mut state = RegistrarState::new();
        let reducer = RegistrationReducer::new();
        reducer.reduce(
            &mut state,
            RegistrationAction::OpenAccount {
                user,
                name: "Sam Park".to_string(),
            },
            env,
        );
        if !balance.is_zero() {
            reducer.reduce(
                &mut state,
                RegistrationAction::DepositFunds { user, amount: balance },
                env,
            );
        }
        reducer.reduce(&mut state, RegistrationAction::ScheduleEvent { event }, env);
        state
    }

    #[test]
    fn deposit_credits_wallet() {
        let user = UserId::new();
        let env = env_at(now());
        let mut state = RegistrarState::new();
        RegistrationReducer::new().reduce(
            &mut state,
            RegistrationAction::OpenAccount { user, name: "Sam".to_string() },
            &env,
        );

        ReducerTest::new(RegistrationReducer::new())
            .with_env(env)
            .given_state(state)
            .when_action(RegistrationAction::DepositFunds {
                user,
                amount: Money::from_dollars(40),
            })
            .then_state(move |s| {
                let account = s.users.get(&user).expect("account");
                assert_eq!(account.balance(), Money::from_dollars(40));
                assert!(s.last_error.is_none());
                assert!(matches!(
                    s.outbox.last(),
                    Some(DomainEvent::FundsDeposited { .. })
                ));
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn free_event_registers_without_payment() {
        let user = UserId::new();
        let event_id = EventId::new();
        let env = env_at(now());
        let state = seeded(user, Money::ZERO, workshop(event_id, 5, Money::ZERO, 30), &env);

        ReducerTest::new(RegistrationReducer::new())
            .with_env(env)
            .given_state(state)
            .when_action(RegistrationAction::Register {
                user,
                event: event_id,
                method: PaymentMethod::Wallet,
            })
            .then_state(move |s| {
                let reg = s.active_registration(user, event_id).expect("registration");
                assert_eq!(reg.status, RegistrationStatus::Registered);
                assert_eq!(reg.amount_paid, Money::ZERO);
                assert!(reg.payment_id.is_none());
                assert!(s.payments.is_empty());
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn wallet_registration_charges_and_confirms() {
        let user = UserId::new();
        let event_id = EventId::new();
        let env = env_at(now());
        let price = Money::from_dollars(25);
        let state = seeded(user, Money::from_dollars(60), workshop(event_id, 5, price, 30), &env);

        ReducerTest::new(RegistrationReducer::new())
            .with_env(env)
            .given_state(state)
            .when_action(RegistrationAction::Register {
                user,
                event: event_id,
                method: PaymentMethod::Wallet,
            })
            .then_state(move |s| {
                let account = s.users.get(&user).expect("account");
                assert_eq!(account.balance(), Money::from_dollars(35));
                account.verify_balance().expect("ledger invariant");

                let reg = s.active_registration(user, event_id).expect("registration");
                assert_eq!(reg.status, RegistrationStatus::Registered);
                assert_eq!(reg.amount_paid, price);

                let payment_id = reg.payment_id.expect("payment link");
                let payment = s.payments.get(&payment_id).expect("payment");
                assert_eq!(payment.status, PaymentStatus::Completed);
                assert_eq!(payment.method, PaymentMethod::Wallet);
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn wallet_registration_rejected_when_broke() {
        let user = UserId::new();
        let event_id = EventId::new();
        let env = env_at(now());
        let state = seeded(
            user,
            Money::from_dollars(5),
            workshop(event_id, 5, Money::from_dollars(25), 30),
            &env,
        );

        ReducerTest::new(RegistrationReducer::new())
            .with_env(env)
            .given_state(state)
            .when_action(RegistrationAction::Register {
                user,
                event: event_id,
                method: PaymentMethod::Wallet,
            })
            .then_state(move |s| {
                assert!(matches!(
                    s.last_error,
                    Some(RegistrationError::InsufficientFunds { .. })
                ));
                // Nothing committed.
                assert!(s.registration(user, event_id).is_none());
                assert!(s.payments.is_empty());
                let account = s.users.get(&user).expect("account");
                assert_eq!(account.balance(), Money::from_dollars(5));
            })
            .run();
    }

    #[test]
    fn full_event_waitlists_with_the_charge_applied() {
        let seated = UserId::new();
        let user = UserId::new();
        let event_id = EventId::new();
        let env = env_at(now());
        let price = Money::from_dollars(10);
        let mut state = seeded(seated, Money::from_dollars(50), workshop(event_id, 1, price, 30), &env);

        let reducer = RegistrationReducer::new();
        reducer.reduce(
            &mut state,
            RegistrationAction::Register {
                user: seated,
                event: event_id,
                method: PaymentMethod::Wallet,
            },
            &env,
        );
        reducer.reduce(
            &mut state,
            RegistrationAction::OpenAccount { user, name: "Ana".to_string() },
            &env,
        );
        reducer.reduce(
            &mut state,
            RegistrationAction::DepositFunds { user, amount: Money::from_dollars(50) },
            &env,
        );

        ReducerTest::new(reducer)
            .with_env(env)
            .given_state(state)
            .when_action(RegistrationAction::Register {
                user,
                event: event_id,
                method: PaymentMethod::Wallet,
            })
            .then_state(move |s| {
                // Priced events charge even into the waitlist, so a freed
                // seat goes to someone who has already paid.
                let reg = s.active_registration(user, event_id).expect("registration");
                assert_eq!(reg.status, RegistrationStatus::Waitlisted);
                assert_eq!(reg.amount_paid, Money::from_dollars(10));
                let payment_id = reg.payment_id.expect("payment link");
                let payment = s.payments.get(&payment_id).expect("payment");
                assert_eq!(payment.status, PaymentStatus::Completed);

                let account = s.users.get(&user).expect("account");
                assert_eq!(account.balance(), Money::from_dollars(40));
                account.verify_balance().expect("ledger invariant");

                // The seat count is untouched by the waitlisted entry.
                let event = s.events.get(&event_id).expect("event");
                assert_eq!(event.core().registered_count, 1);
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn free_event_admits_whatever_payment_method_is_named() {
        let user = UserId::new();
        let event_id = EventId::new();
        let env = env_at(now());
        let state = seeded(user, Money::ZERO, workshop(event_id, 5, Money::ZERO, 30), &env);

        ReducerTest::new(RegistrationReducer::new())
            .with_env(env)
            .given_state(state)
            .when_action(RegistrationAction::Register {
                user,
                event: event_id,
                method: PaymentMethod::Gateway,
            })
            .then_state(move |s| {
                assert!(s.last_error.is_none());
                let reg = s.active_registration(user, event_id).expect("registration");
                assert_eq!(reg.status, RegistrationStatus::Registered);
                assert_eq!(reg.amount_paid, Money::ZERO);
                assert!(s.payments.is_empty());
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn duplicate_registration_rejected() {
        let user = UserId::new();
        let event_id = EventId::new();
        let env = env_at(now());
        let state = seeded(user, Money::ZERO, workshop(event_id, 5, Money::ZERO, 30), &env);

        ReducerTest::new(RegistrationReducer::new())
            .with_env(env)
            .given_state(state)
            .when_action(RegistrationAction::Register {
                user,
                event: event_id,
                method: PaymentMethod::Wallet,
            })
            .when_action(RegistrationAction::Register {
                user,
                event: event_id,
                method: PaymentMethod::Wallet,
            })
            .then_state(move |s| {
                assert!(matches!(
                    s.last_error,
                    Some(RegistrationError::AlreadyRegistered { .. })
                ));
                let event = s.events.get(&event_id).expect("event");
                assert_eq!(event.core().roster.len(), 1);
            })
            .run();
    }

    #[test]
    fn gateway_registration_defers_commitment_to_feedback() {
        let user = UserId::new();
        let event_id = EventId::new();
        let env = env_at(now());
        let state = seeded(
            user,
            Money::ZERO,
            workshop(event_id, 5, Money::from_dollars(30), 30),
            &env,
        );

        ReducerTest::new(RegistrationReducer::new())
            .with_env(env)
            .given_state(state)
            .when_action(RegistrationAction::Register {
                user,
                event: event_id,
                method: PaymentMethod::Gateway,
            })
            .then_state(move |s| {
                // Nothing committed until the intent-opened feedback lands.
                assert!(s.registration(user, event_id).is_none());
                assert!(s.payments.is_empty());
            })
            .then_effects(assertions::assert_has_future_effect)
            .run();
    }

    #[test]
    fn intent_opened_records_pending_payment() {
        let user = UserId::new();
        let event_id = EventId::new();
        let payment_id = PaymentId::new();
        let env = env_at(now());
        let state = seeded(
            user,
            Money::ZERO,
            workshop(event_id, 5, Money::from_dollars(30), 30),
            &env,
        );

        ReducerTest::new(RegistrationReducer::new())
            .with_env(env)
            .given_state(state)
            .when_action(RegistrationAction::IntentOpened {
                user,
                event: event_id,
                payment: payment_id,
                amount: Money::from_dollars(30),
                intent_id: "pi_test_1".to_string(),
                client_secret: "pi_test_1_secret".to_string(),
            })
            .then_state(move |s| {
                let payment = s.payments.get(&payment_id).expect("payment");
                assert_eq!(payment.status, PaymentStatus::Pending);
                assert_eq!(payment.gateway_intent_id.as_deref(), Some("pi_test_1"));
                assert_eq!(payment.client_secret.as_deref(), Some("pi_test_1_secret"));
                // Admission waits for confirmation.
                assert!(s.registration(user, event_id).is_none());
            })
            .run();
    }

    #[test]
    fn resolved_success_completes_payment_and_admits() {
        let user = UserId::new();
        let event_id = EventId::new();
        let payment_id = PaymentId::new();
        let env = env_at(now());
        let amount = Money::from_dollars(30);
        let state = seeded(user, Money::ZERO, workshop(event_id, 5, amount, 30), &env);

        ReducerTest::new(RegistrationReducer::new())
            .with_env(env)
            .given_state(state)
            .when_action(RegistrationAction::IntentOpened {
                user,
                event: event_id,
                payment: payment_id,
                amount,
                intent_id: "pi_test_1".to_string(),
                client_secret: "pi_test_1_secret".to_string(),
            })
            .when_action(RegistrationAction::IntentResolved {
                payment: payment_id,
                status: IntentStatus::Succeeded,
            })
            .then_state(move |s| {
                let payment = s.payments.get(&payment_id).expect("payment");
                assert_eq!(payment.status, PaymentStatus::Completed);

                let reg = s.active_registration(user, event_id).expect("registration");
                assert_eq!(reg.status, RegistrationStatus::Registered);
                assert_eq!(reg.amount_paid, amount);
                assert_eq!(reg.payment_id, Some(payment_id));

                // Card funds pass through the ledger as a balanced pair.
                let account = s.users.get(&user).expect("account");
                assert_eq!(account.balance(), Money::ZERO);
                assert_eq!(account.transactions.len(), 2);
                account.verify_balance().expect("ledger invariant");
            })
            .run();
    }

    #[test]
    fn resolved_success_replay_is_idempotent() {
        let user = UserId::new();
        let event_id = EventId::new();
        let payment_id = PaymentId::new();
        let env = env_at(now());
        let amount = Money::from_dollars(30);
        let state = seeded(user, Money::ZERO, workshop(event_id, 5, amount, 30), &env);

        ReducerTest::new(RegistrationReducer::new())
            .with_env(env)
            .given_state(state)
            .when_action(RegistrationAction::IntentOpened {
                user,
                event: event_id,
                payment: payment_id,
                amount,
                intent_id: "pi_test_1".to_string(),
                client_secret: "pi_test_1_secret".to_string(),
            })
            .when_action(RegistrationAction::IntentResolved {
                payment: payment_id,
                status: IntentStatus::Succeeded,
            })
            .when_action(RegistrationAction::IntentResolved {
                payment: payment_id,
                status: IntentStatus::Succeeded,
            })
            .then_state(move |s| {
                // One registration, one ledger pair, despite the replay.
                let event = s.events.get(&event_id).expect("event");
                let entries = event
                    .core()
                    .roster
                    .iter()
                    .filter(|r| r.user == user)
                    .count();
                assert_eq!(entries, 1);

                let account = s.users.get(&user).expect("account");
                assert_eq!(account.transactions.len(), 2);
                assert_eq!(account.balance(), Money::ZERO);
            })
            .run();
    }

    #[test]
    fn resolved_failure_marks_failed_without_admission() {
        let user = UserId::new();
        let event_id = EventId::new();
        let payment_id = PaymentId::new();
        let env = env_at(now());
        let state = seeded(
            user,
            Money::ZERO,
            workshop(event_id, 5, Money::from_dollars(30), 30),
            &env,
        );

        ReducerTest::new(RegistrationReducer::new())
            .with_env(env)
            .given_state(state)
            .when_action(RegistrationAction::IntentOpened {
                user,
                event: event_id,
                payment: payment_id,
                amount: Money::from_dollars(30),
                intent_id: "pi_test_1".to_string(),
                client_secret: "pi_test_1_secret".to_string(),
            })
            .when_action(RegistrationAction::IntentResolved {
                payment: payment_id,
                status: IntentStatus::Failed,
            })
            .then_state(move |s| {
                let payment = s.payments.get(&payment_id).expect("payment");
                assert_eq!(payment.status, PaymentStatus::Failed);
                assert!(s.registration(user, event_id).is_none());
                let account = s.users.get(&user).expect("account");
                assert!(account.transactions.is_empty());
            })
            .run();
    }

    #[test]
    fn late_success_cannot_revive_a_failed_payment() {
        let user = UserId::new();
        let event_id = EventId::new();
        let payment_id = PaymentId::new();
        let env = env_at(now());
        let state = seeded(
            user,
            Money::ZERO,
            workshop(event_id, 5, Money::from_dollars(30), 30),
            &env,
        );

        ReducerTest::new(RegistrationReducer::new())
            .with_env(env)
            .given_state(state)
            .when_action(RegistrationAction::IntentOpened {
                user,
                event: event_id,
                payment: payment_id,
                amount: Money::from_dollars(30),
                intent_id: "pi_test_1".to_string(),
                client_secret: "pi_test_1_secret".to_string(),
            })
            .when_action(RegistrationAction::IntentResolved {
                payment: payment_id,
                status: IntentStatus::Failed,
            })
            .when_action(RegistrationAction::IntentResolved {
                payment: payment_id,
                status: IntentStatus::Succeeded,
            })
            .then_state(move |s| {
                // Failed is terminal; a stale success report changes nothing.
                let payment = s.payments.get(&payment_id).expect("payment");
                assert_eq!(payment.status, PaymentStatus::Failed);
                assert!(s.registration(user, event_id).is_none());
                let account = s.users.get(&user).expect("account");
                assert!(account.transactions.is_empty());
            })
            .run();
    }

    #[test]
    fn cancel_before_cutoff_refunds_releases_and_promotes() {
        let first = UserId::new();
        let second = UserId::new();
        let event_id = EventId::new();
        let env = env_at(now());
        let price = Money::from_dollars(20);
        // Event starts in 30 days; cutoff is at 16 days out.
        let mut state = seeded(first, Money::from_dollars(20), workshop(event_id, 1, price, 30), &env);

        let reducer = RegistrationReducer::new();
        reducer.reduce(
            &mut state,
            RegistrationAction::Register {
                user: first,
                event: event_id,
                method: PaymentMethod::Wallet,
            },
            &env,
        );
        reducer.reduce(
            &mut state,
            RegistrationAction::OpenAccount { user: second, name: "Ana".to_string() },
            &env,
        );
        reducer.reduce(
            &mut state,
            RegistrationAction::DepositFunds { user: second, amount: price },
            &env,
        );
        reducer.reduce(
            &mut state,
            RegistrationAction::Register {
                user: second,
                event: event_id,
                method: PaymentMethod::Wallet,
            },
            &env,
        );

        ReducerTest::new(reducer)
            .with_env(env)
            .given_state(state)
            .when_action(RegistrationAction::Cancel { user: first, event: event_id })
            .then_state(move |s| {
                // Refund landed.
                let account = s.users.get(&first).expect("account");
                assert_eq!(account.balance(), Money::from_dollars(20));
                account.verify_balance().expect("ledger invariant");

                // Seat released and handed to the waitlisted user, who paid
                // at registration time; promotion moves no money.
                let cancelled = s.registration(first, event_id).expect("entry");
                assert_eq!(cancelled.status, RegistrationStatus::Cancelled);
                let promoted = s.active_registration(second, event_id).expect("entry");
                assert_eq!(promoted.status, RegistrationStatus::Registered);
                assert_eq!(promoted.amount_paid, Money::from_dollars(20));
                let second_account = s.users.get(&second).expect("account");
                assert_eq!(second_account.balance(), Money::ZERO);

                // Payment moved to refunded.
                let payment_id = cancelled.payment_id.expect("payment link");
                let payment = s.payments.get(&payment_id).expect("payment");
                assert_eq!(payment.status, PaymentStatus::Refunded);
                assert_eq!(payment.refund_amount, Some(Money::from_dollars(20)));

                assert!(s.outbox.iter().any(|e| matches!(
                    e,
                    DomainEvent::WaitlistPromoted { user, .. } if *user == second
                )));
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn cancel_inside_window_rejected() {
        let user = UserId::new();
        let event_id = EventId::new();
        let env = env_at(now());
        // Event starts in 5 days: inside the 14-day window.
        let mut state = seeded(user, Money::from_dollars(20), workshop(event_id, 3, Money::from_dollars(20), 5), &env);
        let reducer = RegistrationReducer::new();
        reducer.reduce(
            &mut state,
            RegistrationAction::Register {
                user,
                event: event_id,
                method: PaymentMethod::Wallet,
            },
            &env,
        );

        ReducerTest::new(reducer)
            .with_env(env)
            .given_state(state)
            .when_action(RegistrationAction::Cancel { user, event: event_id })
            .then_state(move |s| {
                assert!(matches!(
                    s.last_error,
                    Some(RegistrationError::CancellationWindowClosed { .. })
                ));
                // Registration and money untouched.
                let reg = s.active_registration(user, event_id).expect("registration");
                assert_eq!(reg.status, RegistrationStatus::Registered);
                let account = s.users.get(&user).expect("account");
                assert_eq!(account.balance(), Money::ZERO);
            })
            .run();
    }

    #[test]
    fn cancel_twice_rejected() {
        let user = UserId::new();
        let event_id = EventId::new();
        let env = env_at(now());
        let mut state = seeded(user, Money::from_dollars(20), workshop(event_id, 3, Money::from_dollars(20), 30), &env);
        let reducer = RegistrationReducer::new();
        reducer.reduce(
            &mut state,
            RegistrationAction::Register {
                user,
                event: event_id,
                method: PaymentMethod::Wallet,
            },
            &env,
        );

        ReducerTest::new(reducer)
            .with_env(env)
            .given_state(state)
            .when_action(RegistrationAction::Cancel { user, event: event_id })
            .when_action(RegistrationAction::Cancel { user, event: event_id })
            .then_state(move |s| {
                assert!(matches!(
                    s.last_error,
                    Some(RegistrationError::NotRegistered { .. })
                ));
                // Only one refund landed.
                let account = s.users.get(&user).expect("account");
                assert_eq!(account.balance(), Money::from_dollars(20));
            })
            .run();
    }

    #[test]
    fn mark_attended_records_attendance() {
        let user = UserId::new();
        let event_id = EventId::new();
        let env = env_at(now());
        let mut state = seeded(user, Money::ZERO, workshop(event_id, 3, Money::ZERO, 30), &env);
        let reducer = RegistrationReducer::new();
        reducer.reduce(
            &mut state,
            RegistrationAction::Register {
                user,
                event: event_id,
                method: PaymentMethod::Wallet,
            },
            &env,
        );

        ReducerTest::new(reducer)
            .with_env(env)
            .given_state(state)
            .when_action(RegistrationAction::MarkAttended { user, event: event_id })
            .then_state(move |s| {
                let reg = s.registration(user, event_id).expect("registration");
                assert_eq!(reg.status, RegistrationStatus::Attended);
                assert!(matches!(
                    s.outbox.last(),
                    Some(DomainEvent::AttendanceMarked { .. })
                ));
            })
            .run();
    }

    #[test]
    fn register_after_event_ended_rejected() {
        let user = UserId::new();
        let event_id = EventId::new();
        let env = env_at(now());
        // Started and ended 10 days ago.
        let state = seeded(user, Money::ZERO, workshop(event_id, 3, Money::ZERO, -10), &env);

        ReducerTest::new(RegistrationReducer::new())
            .with_env(env)
            .given_state(state)
            .when_action(RegistrationAction::Register {
                user,
                event: event_id,
                method: PaymentMethod::Wallet,
            })
            .then_state(move |s| {
                assert!(matches!(
                    s.last_error,
                    Some(RegistrationError::EventAlreadyEnded { .. })
                ));
            })
            .run();
    }
}
