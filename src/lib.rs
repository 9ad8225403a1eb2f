//! chorus - Send one prompt to several LLMs through an OpenAI-compatible gateway.
//!
//! ## Architecture
//!
//! - **Gateway Client**: chat completion, generation stats and model catalog calls
//! - **Dispatcher**: fans a prompt out to every selected model concurrently
//! - **Stats Correlator**: looks up cost and usage for each successful answer
//! - **Aggregator**: joins both into one record per model
//!
//! ## Pipeline
//!
//! Dispatch → Correlate → Aggregate → (optional) JSON export
//!
//! ## Epistemic Design
//!
//! - K_i (Knowledge): One result per model, typed as Response | Failure
//! - B_i (Beliefs): Every network call may fail; failures are values, not panics
//! - I^R (Resolvable): Gateway URL, credential source, timeouts, defaults
//! - I^B (Bounded): Stats are advisory and may be Absent

pub mod client;
pub mod models;
pub mod pipeline;
pub mod pool;

// Re-exports for convenience
pub use client::{CredentialProvider, GatewayClient, credential_provider};
pub use models::{
    AggregatedRecord, ChatResult, ChorusError, Config, GenerationParams, Model, Result,
    StatsResult,
};
pub use pipeline::{Comparison, ComparisonPipeline, aggregate};
pub use pool::{Dispatcher, StatsCorrelator};
