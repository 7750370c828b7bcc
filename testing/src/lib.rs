//! Testing utilities for registrar reducers.
//!
//! Provides [`ReducerTest`], a fluent Given-When-Then harness for exercising
//! a single reduction, and effect assertions under [`reducer_test::assertions`].


pub use reducer_test::{ReducerTest, assertions};
