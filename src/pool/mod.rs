//! Pool module - fan-out/fan-in over the gateway.

mod correlator;
mod dispatcher;

pub use correlator::*;
pub use dispatcher::*;
