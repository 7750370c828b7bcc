//! # Registrar Runtime
//!
//! Runtime implementation for the campus registrar's reducer core.
//!
//! The [`Store`] owns domain state behind an async lock and serializes all
//! reductions: each dispatched action is reduced, its effects executed, and
//! any feedback actions reduced in turn, before `send` returns. That
//! serialization is the concurrency mechanism the registration core relies
//! on - capacity checks, balance checks, and payment-status gates are all
//! validated and applied within a single uninterrupted reduction.

use registrar_core::effect::Effect;
use registrar_core::reducer::Reducer;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;

/// Retry logic with exponential backoff
pub mod retry;

pub use retry::RetryPolicy;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug)]
    pub enum StoreError {
        /// Timed out waiting for an action and its effect chain to settle.
        ///
        /// The action may have partially executed its effect chain; state
        /// reflects whatever reductions completed before the deadline.
        #[error("Timed out waiting for action to settle")]
        Timeout,
    }
}

pub use error::StoreError;

/// The Store runtime: state + reducer + environment.
///
/// Cloneable handle; clones share the same state.
pub struct Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    state: Arc<RwLock<S>>,
    reducer: Arc<R>,
    environment: Arc<E>,
}

impl<S, A, E, R> Clone for Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            reducer: Arc::clone(&self.reducer),
            environment: Arc::clone(&self.environment),
        }
    }
}

impl<S, A, E, R> Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
    A: Send + 'static,
    S: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Create a new store with initial state, reducer, and environment.
    #[must_use]
    pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
        Self {
            state: Arc::new(RwLock::new(initial_state)),
            reducer: Arc::new(reducer),
            environment: Arc::new(environment),
        }
    }

    /// Dispatch an action and drive its effect chain to completion.
    ///
    /// The write lock is held only for the duration of each reduction, not
    /// across effect execution, so gateway I/O never blocks other actions.
    /// Feedback actions produced by effects are dispatched in FIFO order.
    pub async fn send(&self, action: A) {
        self.send_observing(action, |_| ()).await;
    }

    /// Dispatch an action, projecting the state after each reduction and
    /// returning the last projection.
    ///
    /// The projection runs under the same lock as the reduction it
    /// observes. Other senders may interleave between this dispatch's
    /// reductions, but they can never alter what this dispatch observed,
    /// so per-dispatch outcomes recorded in state (a command's rejection,
    /// for example) are read back race-free.
    pub async fn send_observing<F, T>(&self, action: A, mut observe: F) -> T
    where
        F: FnMut(&S) -> T,
        T: Default,
    {
        let mut queue = VecDeque::new();
        queue.push_back(action);
        let mut outcome = T::default();

        while let Some(next) = queue.pop_front() {
            let effects = {
                let mut state = self.state.write().await;
                let effects = self.reducer.reduce(&mut state, next, &self.environment);
                outcome = observe(&state);
                effects
            };

            for effect in effects {
                Self::execute(effect, &mut queue).await;
            }
        }

        outcome
    }

    /// Dispatch an action with a deadline on the whole effect chain.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] if the chain does not settle in time
    /// (e.g. an unresponsive payment gateway); completed reductions remain
    /// applied.
    pub async fn send_timeout(&self, action: A, deadline: Duration) -> Result<(), StoreError> {
        match tokio::time::timeout(deadline, self.send(action)).await {
            Ok(()) => Ok(()),
            Err(_) => {
                warn!(?deadline, "Action did not settle before the deadline");
                Err(StoreError::Timeout)
            },
        }
    }

    /// Read a projection of current state.
    pub async fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&S) -> T,
    {
        let state = self.state.read().await;
        f(&state)
    }

    /// Execute one effect, pushing any feedback actions onto the queue.
    async fn execute(effect: Effect<A>, queue: &mut VecDeque<A>) {
        match effect {
            Effect::None => {},
            Effect::Future(fut) => {
                if let Some(action) = fut.await {
                    queue.push_back(action);
                }
            },
            Effect::Delay { duration, action } => {
                tokio::time::sleep(duration).await;
                queue.push_back(*action);
            },
            Effect::Sequential(effects) => {
                for inner in effects {
                    Box::pin(Self::execute(inner, queue)).await;
                }
            },
            Effect::Parallel(effects) => {
                // Futures run concurrently; feedback actions are still
                // queued in declaration order for determinism.
                let mut futures = Vec::new();
                let mut rest = Vec::new();
                for inner in effects {
                    match inner {
                        Effect::Future(fut) => futures.push(fut),
                        other => rest.push(other),
                    }
                }
                for action in futures::future::join_all(futures)
                    .await
                    .into_iter()
                    .flatten()
                {
                    queue.push_back(action);
                }
                for inner in rest {
                    Box::pin(Self::execute(inner, queue)).await;
                }
            },
        }
    }
}
