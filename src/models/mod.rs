//! Core data models for chorus.
//!
//! Epistemic mapping:
//! - K_i (Knowledge): Concrete types with compile-time guarantees
//! - B_i (Beliefs): Wrapped in Result and tagged outcome enums
//! - I^R (Resolvable): Config parameters
//! - I^B (Bounded): Error variants classified by `ErrorKind`

mod config;
mod error;
mod model;

pub use config::*;
pub use error::*;
pub use model::*;

#[cfg(test)]
pub(crate) use model::fixtures;
