//! # Registrar Core
//!
//! Core traits and types for the campus registrar's event-driven core.
//!
//! The registration and wallet logic is written as reducers: pure functions
//! `(State, Action, Environment) → (State, Effects)`. Side effects (payment
//! gateway calls, delayed actions) are returned as *descriptions* and
//! executed by the runtime's `Store`, which feeds resulting actions back
//! into the reducer.
//!
//! ## Core Concepts
//!
//! - **State**: owned domain state (users, events, payments)
//! - **Action**: all possible inputs to a reducer (commands and events)
//! - **Reducer**: the business logic, deterministic and testable
//! - **Effect**: side effect descriptions, not execution
//! - **Environment**: injected dependencies (clock, gateway) via traits

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use smallvec::{SmallVec, smallvec};

/// Reducer module - the core trait for business logic
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// The number of effects a reducer returns without heap allocation.
    pub const INLINE_EFFECTS: usize = 4;

    /// Effect vector returned by reducers.
    pub type Effects<Action> = SmallVec<[Effect<Action>; INLINE_EFFECTS]>;

    /// The Reducer trait - core abstraction for business logic.
    ///
    /// A reducer validates the incoming action against current state,
    /// applies resulting events in place, and returns effect descriptions
    /// for the runtime to execute. It must not perform I/O itself.
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects.
        ///
        /// The runtime guarantees that calls are serialized per store, so a
        /// single reduction is the atomicity unit: everything applied to
        /// `state` before returning is visible to the next action as one
        /// committed step.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> Effects<Self::Action>;
    }
}

/// Effect module - side effect descriptions
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    /// Boxed future that may feed an action back into the reducer.
    pub type EffectFuture<Action> = Pin<Box<dyn Future<Output = Option<Action>> + Send>>;

    /// Describes a side effect to be executed by the Store runtime.
    ///
    /// Effects are values. Returning one from a reducer commits nothing;
    /// the runtime executes it after the reduction and dispatches any
    /// produced action as a fresh input.
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Run effects in parallel
        Parallel(Vec<Effect<Action>>),

        /// Run effects sequentially
        Sequential(Vec<Effect<Action>>),

        /// Delayed action (for timeouts, retries)
        Delay {
            /// How long to wait
            duration: Duration,
            /// Action to dispatch after the delay
            action: Box<Action>,
        },

        /// Arbitrary async computation.
        ///
        /// Returns `Option<Action>`; `Some` is fed back into the reducer.
        Future(EffectFuture<Action>),
    }

    impl<Action> Effect<Action> {
        /// Wrap an async computation as an effect.
        pub fn future<F>(fut: F) -> Self
        where
            F: Future<Output = Option<Action>> + Send + 'static,
        {
            Self::Future(Box::pin(fut))
        }

        /// Combine effects to run in parallel.
        #[must_use]
        pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Parallel(effects)
        }

        /// Chain effects to run sequentially.
        #[must_use]
        pub const fn chain(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Sequential(effects)
        }
    }

    // Manual Debug implementation since Future doesn't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Parallel(effects) => {
                    f.debug_tuple("Effect::Parallel").field(effects).finish()
                },
                Effect::Sequential(effects) => {
                    f.debug_tuple("Effect::Sequential").field(effects).finish()
                },
                Effect::Delay { duration, action } => f
                    .debug_struct("Effect::Delay")
                    .field("duration", duration)
                    .field("action", action)
                    .finish(),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }
}

/// Environment module - dependency injection traits
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time for testability.
    ///
    /// Production code injects [`SystemClock`]; policy and ledger tests
    /// inject [`FixedClock`] to pin "now" against event schedules.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Clock backed by the system time.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Clock pinned to a fixed instant, for deterministic tests.
    #[derive(Clone, Copy, Debug)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Creates a clock that always reports `time`.
        #[must_use]
        pub const fn at(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }
}
