//! Model, result and record types for chorus.
//!
//! K_i: These types represent the data flow of one comparison:
//! models → chat results → stats results → aggregated records.
//! Every value is built once and never mutated afterwards.

use crate::models::{ChorusError, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Finish reason recorded when the gateway omits one.
pub const FINISH_REASON_NOT_AVAILABLE: &str = "not available";

/// A model offered by the gateway catalog.
///
/// K_i: Identity is the `id` alone. Prices are floats and two catalog
/// fetches may differ in representation, so they never take part in
/// equality or hashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    /// Gateway model id (e.g. "openai/gpt-4o")
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Price per prompt token (USD)
    pub pricing_prompt: f64,

    /// Price per completion token (USD)
    pub pricing_completion: f64,

    /// Context window in tokens
    pub context_length: u64,

    /// Completion ceiling advertised by the top provider (0 = unknown)
    pub max_completion_tokens: u64,

    /// Tokenizer family
    pub tokenizer: String,

    /// Instruction format (absent for base models)
    #[serde(default)]
    pub instruct_type: Option<String>,
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Model {}

impl Hash for Model {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

impl Model {
    /// Sort models by name, then id.
    pub fn sort_by_name(models: &mut [Model]) {
        models.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    }

    /// Whether `max_tokens` asks for more than this model advertises.
    ///
    /// Unknown ceilings (0) are never exceeded.
    pub fn exceeds_completion_ceiling(&self, max_tokens: u32) -> bool {
        self.max_completion_tokens > 0 && u64::from(max_tokens) > self.max_completion_tokens
    }
}

/// Validated sampling parameters for a chat call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f64,
    pub max_tokens: u32,
}

impl GenerationParams {
    /// Validate and build parameters.
    ///
    /// Temperature must lie in [0.0, 1.0]; max tokens must be at least 1.
    pub fn new(temperature: f64, max_tokens: i64) -> Result<Self> {
        if !temperature.is_finite() || !(0.0..=1.0).contains(&temperature) {
            return Err(ChorusError::InvalidInput(format!(
                "temperature must be between 0.0 and 1.0, got {temperature}"
            )));
        }
        if max_tokens < 1 {
            return Err(ChorusError::InvalidInput(format!(
                "max_tokens must be a positive integer, got {max_tokens}"
            )));
        }
        let max_tokens = u32::try_from(max_tokens).map_err(|_| {
            ChorusError::InvalidInput(format!("max_tokens is too large: {max_tokens}"))
        })?;
        Ok(Self {
            temperature,
            max_tokens,
        })
    }

    /// Re-check values that may have been built without `new`.
    pub fn validate(&self) -> Result<()> {
        Self::new(self.temperature, i64::from(self.max_tokens)).map(|_| ())
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 2048,
        }
    }
}

/// A successful chat completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Correlation id returned by the gateway
    pub id: String,

    /// Requested model id
    pub model: String,

    /// System prompt sent
    pub system_prompt: String,

    /// User input sent
    pub user_input: String,

    /// Answer text of the first choice
    pub answer: String,

    /// Finish reason, or [`FINISH_REASON_NOT_AVAILABLE`]
    pub finish_reason: String,

    /// Request body as sent
    pub raw_request: serde_json::Value,

    /// Response body as received
    pub raw_response: serde_json::Value,

    /// Round-trip time in milliseconds
    pub elapsed_ms: u64,
}

/// A chat call that did not produce a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    /// Requested model id
    pub model: String,

    pub kind: ErrorKind,

    /// HTTP status when the gateway answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    pub message: String,
}

impl Failure {
    /// Build a failure entry from an error raised for `model`.
    pub fn from_error(model: impl Into<String>, error: &ChorusError) -> Self {
        Self {
            model: model.into(),
            kind: error.kind(),
            status: error.status(),
            message: error.to_string(),
        }
    }
}

/// Outcome of one dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChatResult {
    Response(Response),
    Failure(Failure),
}

impl ChatResult {
    /// Model id this result belongs to.
    pub fn model_id(&self) -> &str {
        match self {
            ChatResult::Response(r) => &r.model,
            ChatResult::Failure(f) => &f.model,
        }
    }

    pub fn as_response(&self) -> Option<&Response> {
        match self {
            ChatResult::Response(r) => Some(r),
            ChatResult::Failure(_) => None,
        }
    }

    pub fn as_failure(&self) -> Option<&Failure> {
        match self {
            ChatResult::Response(_) => None,
            ChatResult::Failure(f) => Some(f),
        }
    }

    pub fn is_response(&self) -> bool {
        matches!(self, ChatResult::Response(_))
    }
}

/// Usage and cost telemetry for one generation.
///
/// K_i: `tokens_*` are counted with the gateway's reference tokenizer,
/// `native_tokens_*` with the serving model's own tokenizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    /// Correlation id; equals the originating [`Response::id`]
    pub id: String,

    pub tokens_prompt: u64,
    pub tokens_completion: u64,
    pub native_tokens_prompt: u64,
    pub native_tokens_completion: u64,

    /// Cost in USD
    pub cost: f64,

    /// `data` object as received
    pub raw_response: serde_json::Value,

    /// Round-trip time in milliseconds
    pub elapsed_ms: u64,
}

impl Stats {
    /// Prompt plus completion tokens (normalized tokenizer).
    pub fn tokens_total(&self) -> u64 {
        self.tokens_prompt + self.tokens_completion
    }

    /// Prompt plus completion tokens (native tokenizer).
    pub fn native_tokens_total(&self) -> u64 {
        self.native_tokens_prompt + self.native_tokens_completion
    }
}

/// Why no stats exist for a correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AbsentReason {
    /// The gateway has no data for the id (expired, invalid or not computed yet)
    NotFound,
    /// The lookup itself failed; telemetry is best-effort so this is not escalated
    LookupFailed { kind: ErrorKind, message: String },
}

impl std::fmt::Display for AbsentReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbsentReason::NotFound => write!(f, "not found"),
            AbsentReason::LookupFailed { kind, message } => {
                write!(f, "lookup failed ({kind}): {message}")
            }
        }
    }
}

/// No stats for a correlation id. Not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Absent {
    pub id: String,
    #[serde(flatten)]
    pub reason: AbsentReason,
}

/// Outcome of one stats lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StatsResult {
    Stats(Stats),
    Absent(Absent),
}

impl StatsResult {
    pub fn not_found(id: impl Into<String>) -> Self {
        StatsResult::Absent(Absent {
            id: id.into(),
            reason: AbsentReason::NotFound,
        })
    }

    pub fn lookup_failed(id: impl Into<String>, error: &ChorusError) -> Self {
        StatsResult::Absent(Absent {
            id: id.into(),
            reason: AbsentReason::LookupFailed {
                kind: error.kind(),
                message: error.to_string(),
            },
        })
    }

    /// Correlation id, present in both variants.
    pub fn id(&self) -> &str {
        match self {
            StatsResult::Stats(s) => &s.id,
            StatsResult::Absent(a) => &a.id,
        }
    }

    pub fn as_stats(&self) -> Option<&Stats> {
        match self {
            StatsResult::Stats(s) => Some(s),
            StatsResult::Absent(_) => None,
        }
    }
}

/// A value paired with the model it was produced for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerModel<T> {
    pub model: Model,
    pub value: T,
}

/// Per-model results keyed by model id.
pub type ModelMap<T> = HashMap<String, PerModel<T>>;

/// Final per-model unit handed to the presentation layer.
///
/// K_i: `stats` is `None` when no lookup ran (the chat call failed).
/// A lookup that found nothing is kept as `Some(StatsResult::Absent)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRecord {
    pub model: Model,
    pub chat: ChatResult,
    pub stats: Option<StatsResult>,
}

impl AggregatedRecord {
    pub fn response(&self) -> Option<&Response> {
        self.chat.as_response()
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.chat.as_failure()
    }

    /// Stats when they are available; `None` for "no lookup" and "absent" alike.
    pub fn cost_and_stats(&self) -> Option<&Stats> {
        self.stats.as_ref().and_then(StatsResult::as_stats)
    }
}
