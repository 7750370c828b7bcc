//! Cancellation policy: the refund cutoff window.
//!
//! Cancellations are allowed strictly before the cutoff, which sits a fixed
//! number of days ahead of the event *start*. The clock is injected so the
//! policy can be tested against pinned times.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::EventCore;

/// Days before an event's start when cancellation closes.
pub const DEFAULT_CUTOFF_DAYS: i64 = 14;

/// Why a cancellation was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// The request arrived at or after the cutoff.
    WindowClosed,
    /// The event has already ended.
    EventEnded,
}

/// The policy's verdict on a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationDecision {
    /// Whether the cancellation may proceed.
    pub allowed: bool,
    /// Why not, when denied.
    pub reason: Option<DenialReason>,
    /// The instant cancellation closes for this event.
    pub cutoff_date: DateTime<Utc>,
    /// Whole days from now until the event starts (negative once started).
    pub days_remaining: i64,
}

/// Evaluates cancellation requests against the cutoff window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancellationPolicy {
    cutoff_days: i64,
}

impl CancellationPolicy {
    /// Policy with the given cutoff, in days before event start.
    #[must_use]
    pub const fn new(cutoff_days: i64) -> Self {
        Self { cutoff_days }
    }

    /// The configured cutoff in days.
    #[must_use]
    pub const fn cutoff_days(&self) -> i64 {
        self.cutoff_days
    }

    /// The instant cancellation closes for an event.
    #[must_use]
    pub fn cutoff_for(&self, event: &EventCore) -> DateTime<Utc> {
        event.starts_at - Duration::days(self.cutoff_days)
    }

    /// Decide whether a cancellation at `now` is allowed.
    ///
    /// Allowed strictly before the cutoff; a request exactly at the cutoff
    /// is denied. An event that already ended is denied regardless.
    #[must_use]
    pub fn evaluate(&self, event: &EventCore, now: DateTime<Utc>) -> CancellationDecision {
        let cutoff_date = self.cutoff_for(event);
        let days_remaining = (event.starts_at - now).num_days();

        let reason = if now >= event.ends_at {
            Some(DenialReason::EventEnded)
        } else if now >= cutoff_date {
            Some(DenialReason::WindowClosed)
        } else {
            None
        };

        CancellationDecision {
            allowed: reason.is_none(),
            reason,
            cutoff_date,
            days_remaining,
        }
    }
}

impl Default for CancellationPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CUTOFF_DAYS)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::types::{EventId, Money};
    use chrono::TimeZone;

    fn event_starting_at(starts_at: DateTime<Utc>) -> EventCore {
        EventCore::new(
            EventId::new(),
            "Sailing Trip".to_string(),
            10,
            Money::from_dollars(80),
            starts_at,
            starts_at + Duration::hours(6),
        )
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).single().expect("valid date")
    }

    #[test]
    fn allowed_well_before_cutoff() {
        let event = event_starting_at(at(2026, 10, 20));
        let policy = CancellationPolicy::default();

        // 20 days out, cutoff at 14 days.
        let decision = policy.evaluate(&event, at(2026, 9, 30));

        assert!(decision.allowed);
        assert_eq!(decision.reason, None);
        assert_eq!(decision.cutoff_date, at(2026, 10, 6));
        assert_eq!(decision.days_remaining, 20);
    }

    #[test]
    fn denied_inside_window() {
        let event = event_starting_at(at(2026, 10, 20));
        let policy = CancellationPolicy::default();

        // 5 days out.
        let decision = policy.evaluate(&event, at(2026, 10, 15));

        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenialReason::WindowClosed));
        assert_eq!(decision.days_remaining, 5);
    }

    #[test]
    fn denied_exactly_at_cutoff() {
        let event = event_starting_at(at(2026, 10, 20));
        let policy = CancellationPolicy::default();

        let decision = policy.evaluate(&event, at(2026, 10, 6));

        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenialReason::WindowClosed));
    }

    #[test]
    fn denied_after_event_ended() {
        let event = event_starting_at(at(2026, 10, 20));
        let policy = CancellationPolicy::default();

        let decision = policy.evaluate(&event, at(2026, 11, 1));

        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenialReason::EventEnded));
        assert!(decision.days_remaining < 0);
    }

    #[test]
    fn custom_cutoff_is_respected() {
        let event = event_starting_at(at(2026, 10, 20));
        let policy = CancellationPolicy::new(3);

        assert!(policy.evaluate(&event, at(2026, 10, 15)).allowed);
        assert!(!policy.evaluate(&event, at(2026, 10, 18)).allowed);
    }
}
