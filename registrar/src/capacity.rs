//! Event capacity: seat accounting, waitlisting, and FIFO promotion.
//!
//! All mutations go through [`EventCore`] methods so the seat count and the
//! roster can never be edited independently. `registered_count` counts
//! registrations holding a seat (registered or attended) and must stay
//! within `0..=capacity`.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::RegistrationError;
use crate::types::{EventCore, Money, PaymentId, Registration, RegistrationStatus, UserId};

/// Outcome of releasing a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseOutcome {
    /// Whether the released registration held a confirmed seat
    /// (as opposed to a waitlist slot).
    pub held_seat: bool,
    /// Amount the released registration had paid.
    pub amount_paid: Money,
    /// Payment that funded the released registration, if any.
    pub payment_id: Option<PaymentId>,
    /// Waitlisted user promoted into the freed seat, if any.
    pub promoted: Option<UserId>,
}

impl EventCore {
    /// Admit a user: confirmed seat while capacity remains, waitlist after.
    ///
    /// Returns the status the new registration was given.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::AlreadyRegistered`] when the user
    /// already holds an active registration on this event.
    pub fn admit(
        &mut self,
        user: UserId,
        now: DateTime<Utc>,
    ) -> Result<RegistrationStatus, RegistrationError> {
        if self.roster.iter().any(|r| r.user == user && r.status.is_active()) {
            return Err(RegistrationError::AlreadyRegistered {
                user,
                event: self.id,
            });
        }

        let status = if self.is_full() {
            RegistrationStatus::Waitlisted
        } else {
            self.registered_count += 1;
            RegistrationStatus::Registered
        };

        self.roster.push(Registration {
            user,
            status,
            amount_paid: Money::ZERO,
            payment_id: None,
            registered_at: now,
            cancelled_at: None,
        });

        debug!(
            event = %self.id,
            user = %user,
            status = ?status,
            seats = self.registered_count,
            capacity = self.capacity,
            "Admitted to roster"
        );

        Ok(status)
    }

    /// Release a user's active registration and promote the longest-waiting
    /// waitlisted user into the freed seat, in one step.
    ///
    /// Releasing a waitlist slot frees no seat, so no promotion happens.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::NotRegistered`] when the user has no
    /// active registration on this event.
    pub fn release(
        &mut self,
        user: UserId,
        now: DateTime<Utc>,
    ) -> Result<ReleaseOutcome, RegistrationError> {
        let idx = self
            .roster
            .iter()
            .position(|r| r.user == user && r.status.is_active())
            .ok_or(RegistrationError::NotRegistered {
                user,
                event: self.id,
            })?;

        let held_seat = self.roster[idx].status == RegistrationStatus::Registered;
        self.roster[idx].status = RegistrationStatus::Cancelled;
        self.roster[idx].cancelled_at = Some(now);
        let amount_paid = self.roster[idx].amount_paid;
        let payment_id = self.roster[idx].payment_id;

        let mut promoted = None;
        if held_seat {
            self.registered_count = self.registered_count.checked_sub(1).ok_or_else(|| {
                RegistrationError::invariant(format!(
                    "seat count underflow on event {} while releasing {user}",
                    self.id
                ))
            })?;

            // Promotion order: earliest registered_at wins, roster position
            // breaks ties.
            let next = self
                .roster
                .iter()
                .enumerate()
                .filter(|(_, r)| r.status == RegistrationStatus::Waitlisted)
                .min_by_key(|(i, r)| (r.registered_at, *i))
                .map(|(i, _)| i);

            if let Some(next_idx) = next {
                self.roster[next_idx].status = RegistrationStatus::Registered;
                self.registered_count += 1;
                promoted = Some(self.roster[next_idx].user);
                info!(
                    event = %self.id,
                    promoted = %self.roster[next_idx].user,
                    "Promoted from waitlist"
                );
            }
        }

        Ok(ReleaseOutcome {
            held_seat,
            amount_paid,
            payment_id,
            promoted,
        })
    }

    /// Record that a registered user attended the event.
    ///
    /// Attendance keeps the seat, so the count does not change.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::NotRegistered`] when the user holds no
    /// confirmed seat (waitlisted users cannot attend).
    pub fn mark_attended(&mut self, user: UserId) -> Result<(), RegistrationError> {
        let entry = self
            .roster
            .iter_mut()
            .find(|r| r.user == user && r.status == RegistrationStatus::Registered)
            .ok_or(RegistrationError::NotRegistered {
                user,
                event: self.id,
            })?;

        entry.status = RegistrationStatus::Attended;
        Ok(())
    }

    /// Check that the seat count matches the roster.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::InvariantViolation`] when the count
    /// drifts from the roster or exceeds capacity.
    pub fn verify_capacity(&self) -> Result<(), RegistrationError> {
        let seated =
            u32::try_from(self.roster.iter().filter(|r| r.status.holds_seat()).count())
                .map_err(|_| RegistrationError::invariant("roster larger than u32"))?;

        if seated != self.registered_count {
            return Err(RegistrationError::invariant(format!(
                "event {}: registered_count {} but roster holds {seated} seats",
                self.id, self.registered_count
            )));
        }
        if self.registered_count > self.capacity {
            return Err(RegistrationError::invariant(format!(
                "event {}: {} seats taken with capacity {}",
                self.id, self.registered_count, self.capacity
            )));
        }
        Ok(())
    }
}
