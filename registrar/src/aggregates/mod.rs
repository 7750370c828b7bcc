//! Aggregates: reducers that own a slice of registrar state.

pub mod registration;

pub use registration::{RegistrationAction, RegistrationEnvironment, RegistrationReducer};
