//! Request dispatcher: one prompt, many models, concurrently.
//!
//! Epistemic foundation:
//! - K_i: Every requested model yields exactly one ChatResult
//! - K_i: Tasks return tagged values, so one failure never unwinds the join loop
//! - B_i: Each chat call may succeed or fail → Response | Failure
//! - I^B: A missing credential dooms every call → abort before spawning

use crate::client::GatewayClient;
use crate::models::{
    ChatResult, ChorusError, ErrorKind, Failure, GenerationParams, Model, ModelMap, PerModel,
    Result,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Fans a prompt out to several models and gathers one result per model.
///
/// One task is spawned per model for each batch; there is no long-lived
/// worker pool and no concurrency cap beyond what the transport imposes.
pub struct Dispatcher {
    client: Arc<GatewayClient>,
}

impl Dispatcher {
    pub fn new(client: Arc<GatewayClient>) -> Self {
        Self { client }
    }

    /// Send the prompt to every model and wait for all of them.
    ///
    /// Returns `Err` only for batch-level problems detected before any
    /// request is made (no models, invalid parameters, missing credential).
    /// Per-model errors are returned as `ChatResult::Failure` entries.
    pub async fn dispatch(
        &self,
        models: &[Model],
        system_prompt: &str,
        user_input: &str,
        params: GenerationParams,
    ) -> Result<ModelMap<ChatResult>> {
        if models.is_empty() {
            return Err(ChorusError::InvalidInput(
                "at least one model is required".to_string(),
            ));
        }
        params.validate()?;
        self.client.check_credentials()?;

        let system_prompt: Arc<str> = Arc::from(system_prompt);
        let user_input: Arc<str> = Arc::from(user_input);

        let mut seen = HashSet::new();
        let mut handles = Vec::with_capacity(models.len());

        for model in models {
            if !seen.insert(model.id.as_str()) {
                warn!(model = %model.id, "Duplicate model in batch, dispatching once");
                continue;
            }

            let client = Arc::clone(&self.client);
            let system_prompt = Arc::clone(&system_prompt);
            let user_input = Arc::clone(&user_input);
            let model_id = model.id.clone();

            let handle = tokio::spawn(async move {
                client
                    .send_chat(&model_id, &system_prompt, &user_input, params)
                    .await
            });
            handles.push((model.clone(), handle));
        }

        debug!(tasks = handles.len(), "Dispatched chat requests");

        let mut results = HashMap::with_capacity(handles.len());
        for (model, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(model = %model.id, error = %e, "Chat task panicked");
                    ChatResult::Failure(Failure {
                        model: model.id.clone(),
                        kind: ErrorKind::Internal,
                        status: None,
                        message: format!("task failed: {e}"),
                    })
                }
            };
            results.insert(model.id.clone(), PerModel {
                model,
                value: result,
            });
        }

        let responses = results.values().filter(|e| e.value.is_response()).count();
        info!(
            models = results.len(),
            responses = responses,
            failures = results.len() - responses,
            "Dispatch complete"
        );

        Ok(results)
    }
}
