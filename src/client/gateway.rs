//! Gateway API client.
//!
//! Epistemic foundation:
//! - K_i: One HTTP round trip per call, no retries (retry policy belongs to callers)
//! - B_i: API will respond within the per-call timeout (might fail)
//! - B_i: Response will carry the fields we read (might fail → Protocol)
//! - I^B: Stats may be missing for a valid id (expired, not computed) → Absent

use crate::client::CredentialProvider;
use crate::models::{
    ChatResult, ChorusError, ConfigError, FINISH_REASON_NOT_AVAILABLE, Failure, GatewayConfig,
    GatewayError, GenerationParams, Model, Response, Result, Stats, StatsResult,
};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{RequestBuilder, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Message in a chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Chat completion request payload.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f64,
    max_tokens: u32,
}

/// Chat completion response (fields we read; the rest is kept raw).
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    id: String,
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Generation stats envelope.
#[derive(Debug, Deserialize)]
struct GenerationEnvelope {
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GenerationData {
    tokens_prompt: u64,
    tokens_completion: u64,
    native_tokens_prompt: u64,
    native_tokens_completion: u64,
    usage: f64,
}

/// Model catalog envelope.
#[derive(Debug, Deserialize)]
struct CatalogEnvelope {
    data: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    id: String,
    name: String,
    pricing: CatalogPricing,
    context_length: u64,
    architecture: CatalogArchitecture,
    top_provider: CatalogTopProvider,
}

#[derive(Debug, Deserialize)]
struct CatalogPricing {
    #[serde(deserialize_with = "deserialize_price")]
    prompt: f64,
    #[serde(deserialize_with = "deserialize_price")]
    completion: f64,
}

#[derive(Debug, Deserialize)]
struct CatalogArchitecture {
    tokenizer: String,
    instruct_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CatalogTopProvider {
    max_completion_tokens: Option<u64>,
}

impl From<CatalogEntry> for Model {
    fn from(entry: CatalogEntry) -> Self {
        Self {
            id: entry.id,
            name: entry.name,
            pricing_prompt: entry.pricing.prompt,
            pricing_completion: entry.pricing.completion,
            context_length: entry.context_length,
            // null means the provider publishes no ceiling
            max_completion_tokens: entry.top_provider.max_completion_tokens.unwrap_or(0),
            tokenizer: entry.architecture.tokenizer,
            instruct_type: entry.architecture.instruct_type,
        }
    }
}

/// Prices arrive as decimal strings ("0.000003") or plain numbers.
fn deserialize_price<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Price {
        Number(f64),
        Text(String),
    }

    match Price::deserialize(deserializer)? {
        Price::Number(n) => Ok(n),
        Price::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| serde::de::Error::custom(format!("invalid price {s:?}: {e}"))),
    }
}

/// API error response (OpenAI-compatible).
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Client for the gateway's chat, generation stats and catalog operations.
///
/// The credential provider is consulted for every request, so a rotated
/// key takes effect on the next call. The underlying `reqwest::Client` is
/// shared by all tasks; it holds no per-call state.
pub struct GatewayClient {
    client: reqwest::Client,
    /// Base URL without trailing slash
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
    /// Timeout for chat completions
    chat_timeout: Duration,
    /// Timeout for stats and catalog calls
    metadata_timeout: Duration,
    referer: String,
    title: String,
}

impl GatewayClient {
    /// Create a new gateway client.
    pub fn new(config: &GatewayConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(ChorusError::Network)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
            chat_timeout: Duration::from_secs(config.chat_timeout_secs),
            metadata_timeout: Duration::from_secs(config.metadata_timeout_secs),
            referer: config.referer.clone(),
            title: config.title.clone(),
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the credential provider.
    pub fn credentials(&self) -> &Arc<dyn CredentialProvider> {
        &self.credentials
    }

    /// Resolve the credential now, without making a request.
    pub fn check_credentials(&self) -> Result<()> {
        self.credentials.api_key()?;
        Ok(())
    }

    /// Build headers for a request, resolving the credential fresh.
    fn headers(&self) -> Result<HeaderMap> {
        let api_key = self.credentials.api_key()?;
        let invalid = |field: &str| {
            ChorusError::Config(ConfigError::InvalidValue {
                field: field.to_string(),
                message: "contains characters not allowed in an HTTP header".to_string(),
            })
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|_| invalid("api key"))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "HTTP-Referer",
            HeaderValue::from_str(&self.referer).map_err(|_| invalid("gateway.referer"))?,
        );
        headers.insert(
            "X-Title",
            HeaderValue::from_str(&self.title).map_err(|_| invalid("gateway.title"))?,
        );
        Ok(headers)
    }

    /// Send a request with auth headers and a per-call timeout.
    async fn send(&self, request: RequestBuilder, timeout: Duration) -> Result<reqwest::Response> {
        request
            .headers(self.headers()?)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))
    }

    /// Read a 2xx body as JSON.
    async fn read_json(
        response: reqwest::Response,
        call: &str,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(e, timeout))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| invalid_response(call, format!("body is not JSON: {e}")))
    }

    /// Turn a non-2xx response into an error naming the call.
    async fn status_error(response: reqwest::Response, call: &str) -> ChorusError {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return GatewayError::AuthenticationFailed {
                call: call.to_string(),
            }
            .into();
        }

        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ApiErrorResponse>(&body) {
            Ok(api_error) => api_error.error.message,
            Err(_) if body.trim().is_empty() => {
                status.canonical_reason().unwrap_or("unknown").to_string()
            }
            Err(_) => body,
        };

        GatewayError::Status {
            status: status.as_u16(),
            call: call.to_string(),
            message,
        }
        .into()
    }

    /// Request a chat completion from one model.
    ///
    /// B_i(API available) → Result
    /// B_i(valid response) → Result
    pub async fn complete(
        &self,
        model_id: &str,
        system_prompt: &str,
        user_input: &str,
        params: GenerationParams,
    ) -> Result<Response> {
        params.validate()?;

        let request = ChatCompletionRequest {
            model: model_id,
            messages: vec![Message::system(system_prompt), Message::user(user_input)],
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };
        let raw_request = serde_json::to_value(&request)
            .map_err(|e| ChorusError::Internal(format!("Failed to encode request: {e}")))?;

        let url = format!("{}/chat/completions", self.base_url);
        let start = Instant::now();

        let response = self
            .send(self.client.post(&url).json(&raw_request), self.chat_timeout)
            .await?;

        if !response.status().is_success() {
            return Err(Self::status_error(response, model_id).await);
        }

        let raw_response = Self::read_json(response, model_id, self.chat_timeout).await?;
        let elapsed = start.elapsed();

        // Required fields are read strictly so contract drift fails loudly.
        let body: ChatCompletionResponse = serde_json::from_value(raw_response.clone())
            .map_err(|e| invalid_response(model_id, e.to_string()))?;
        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| invalid_response(model_id, "no choices in response".to_string()))?;

        debug!(
            model = model_id,
            id = %body.id,
            elapsed_ms = elapsed.as_millis() as u64,
            "Chat completion received"
        );

        Ok(Response {
            id: body.id,
            model: model_id.to_string(),
            system_prompt: system_prompt.to_string(),
            user_input: user_input.to_string(),
            answer: choice.message.content,
            finish_reason: choice
                .finish_reason
                .unwrap_or_else(|| FINISH_REASON_NOT_AVAILABLE.to_string()),
            raw_request,
            raw_response,
            elapsed_ms: elapsed.as_millis() as u64,
        })
    }

    /// Request a chat completion, folding any error into a [`Failure`].
    pub async fn send_chat(
        &self,
        model_id: &str,
        system_prompt: &str,
        user_input: &str,
        params: GenerationParams,
    ) -> ChatResult {
        match self
            .complete(model_id, system_prompt, user_input, params)
            .await
        {
            Ok(response) => ChatResult::Response(response),
            Err(e) => {
                warn!(model = model_id, error = %e, "Chat completion failed");
                ChatResult::Failure(Failure::from_error(model_id, &e))
            }
        }
    }

    /// Look up usage and cost for a generation.
    ///
    /// 404 is an expected outcome and maps to `Absent`, not an error.
    pub async fn fetch_stats(&self, id: &str) -> Result<StatsResult> {
        let call = format!("generation:{id}");
        let url = format!("{}/generation", self.base_url);
        let start = Instant::now();

        let response = self
            .send(
                self.client.get(&url).query(&[("id", id)]),
                self.metadata_timeout,
            )
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(id = id, "Generation stats not found");
            return Ok(StatsResult::not_found(id));
        }
        if !response.status().is_success() {
            return Err(Self::status_error(response, &call).await);
        }

        let raw = Self::read_json(response, &call, self.metadata_timeout).await?;
        let elapsed = start.elapsed();

        let envelope: GenerationEnvelope =
            serde_json::from_value(raw).map_err(|e| invalid_response(&call, e.to_string()))?;
        let data: GenerationData = serde_json::from_value(envelope.data.clone())
            .map_err(|e| invalid_response(&call, e.to_string()))?;

        debug!(
            id = id,
            cost = data.usage,
            elapsed_ms = elapsed.as_millis() as u64,
            "Generation stats received"
        );

        Ok(StatsResult::Stats(Stats {
            id: id.to_string(),
            tokens_prompt: data.tokens_prompt,
            tokens_completion: data.tokens_completion,
            native_tokens_prompt: data.native_tokens_prompt,
            native_tokens_completion: data.native_tokens_completion,
            cost: data.usage,
            raw_response: envelope.data,
            elapsed_ms: elapsed.as_millis() as u64,
        }))
    }

    /// Fetch the model catalog.
    pub async fn list_models(&self) -> Result<Vec<Model>> {
        let call = "models";
        let url = format!("{}/models", self.base_url);

        let response = self
            .send(self.client.get(&url), self.metadata_timeout)
            .await?;
        if !response.status().is_success() {
            return Err(Self::status_error(response, call).await);
        }

        let raw = Self::read_json(response, call, self.metadata_timeout).await?;
        let envelope: CatalogEnvelope =
            serde_json::from_value(raw).map_err(|e| invalid_response(call, e.to_string()))?;

        let models: Vec<Model> = envelope.data.into_iter().map(Model::from).collect();
        debug!(count = models.len(), "Model catalog loaded");
        Ok(models)
    }
}

fn transport_error(e: reqwest::Error, timeout: Duration) -> ChorusError {
    if e.is_timeout() {
        ChorusError::Timeout(timeout)
    } else {
        ChorusError::Network(e)
    }
}

fn invalid_response(call: &str, message: String) -> ChorusError {
    GatewayError::InvalidResponse {
        call: call.to_string(),
        message,
    }
    .into()
}
