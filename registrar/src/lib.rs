//! # Registrar
//!
//! Event capacity allocation and wallet ledger core for a campus events
//! marketplace. Users hold prepaid wallets, register for capacity-limited
//! workshops and trips (paying from the wallet or through an external card
//! gateway), join FIFO waitlists when events fill, and cancel for a refund
//! while outside the cutoff window.
//!
//! The domain is one reducer over the full registrar state; the runtime
//! serializes reductions, so every command commits atomically. See
//! [`aggregates::registration`] for the flows and [`api`] for the HTTP
//! surface.

pub mod aggregates;
pub mod api;
pub mod capacity;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod policy;
pub mod types;

pub use aggregates::{RegistrationAction, RegistrationEnvironment, RegistrationReducer};
pub use config::Config;
pub use error::RegistrationError;
