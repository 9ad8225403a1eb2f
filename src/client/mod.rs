//! Gateway client module.

mod credentials;
mod gateway;

pub use credentials::*;
pub use gateway::*;

#[cfg(test)]
pub(crate) use gateway::testing;
