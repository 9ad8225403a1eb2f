//! Comparison pipeline: dispatch → correlate → aggregate, plus JSON export.
//!
//! Epistemic foundation:
//! - K_i: One record per dispatched model, in presentation order
//! - B_i: Some models fail and some stats stay unavailable; both are reported, not raised
//! - I^R: Where the export lands is user-chosen

use crate::client::GatewayClient;
use crate::models::{AggregatedRecord, ChorusError, GenerationParams, Model, Result};
use crate::pipeline::aggregate;
use crate::pool::{Dispatcher, StatsCorrelator};
use chrono::{DateTime, Local, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Export file name prefix; the local timestamp follows.
const EXPORT_PREFIX: &str = "llm-comparison";
const EXPORT_TIMESTAMP: &str = "%Y-%m-%d-%H-%M-%S";

/// Counters for one comparison run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub total_models: usize,
    pub responses: usize,
    pub failures: usize,
    pub stats_available: usize,
    pub stats_unavailable: usize,
    pub total_cost_usd: f64,
    pub runtime_secs: f64,
}

impl ComparisonSummary {
    /// Tally records and stamp the runtime.
    pub fn from_records(records: &[AggregatedRecord], runtime: Duration) -> Self {
        let mut summary = Self {
            total_models: records.len(),
            runtime_secs: runtime.as_secs_f64(),
            ..Self::default()
        };

        for record in records {
            if record.response().is_none() {
                summary.failures += 1;
                continue;
            }
            summary.responses += 1;
            match record.cost_and_stats() {
                Some(stats) => {
                    summary.stats_available += 1;
                    summary.total_cost_usd += stats.cost;
                }
                None => summary.stats_unavailable += 1,
            }
        }

        summary
    }
}

/// Outcome of sending one prompt to several models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comparison {
    pub started_at: DateTime<Utc>,
    pub system_prompt: String,
    pub user_input: String,
    pub params: GenerationParams,
    pub records: Vec<AggregatedRecord>,
    pub summary: ComparisonSummary,
}

impl Comparison {
    /// Export document keyed by model name.
    ///
    /// Each entry holds `response` and `cost_and_stats` (null when
    /// unavailable), or `failure` and a null `cost_and_stats` when the call
    /// failed. A model whose name is already taken is keyed as `name (id)`.
    pub fn to_export_json(&self) -> Result<Value> {
        let mut document = Map::new();

        for record in &self.records {
            let mut entry = Map::new();
            match (record.response(), record.failure()) {
                (Some(response), _) => {
                    entry.insert("response".to_string(), to_value(response)?);
                }
                (None, Some(failure)) => {
                    entry.insert("failure".to_string(), to_value(failure)?);
                }
                (None, None) => {}
            }
            entry.insert(
                "cost_and_stats".to_string(),
                match record.cost_and_stats() {
                    Some(stats) => to_value(stats)?,
                    None => Value::Null,
                },
            );

            let key = if document.contains_key(&record.model.name) {
                record.model.to_string()
            } else {
                record.model.name.clone()
            };
            document.insert(key, Value::Object(entry));
        }

        Ok(Value::Object(document))
    }

    /// File name for this run's export.
    pub fn export_file_name(&self) -> String {
        let local = self.started_at.with_timezone(&Local);
        format!("{EXPORT_PREFIX}-{}.json", local.format(EXPORT_TIMESTAMP))
    }

    /// Write the export document into `dir`, creating it if needed.
    pub fn write_json(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .map_err(|e| ChorusError::io(format!("creating {}", dir.display()), e))?;

        let path = dir.join(self.export_file_name());
        let body = serde_json::to_string_pretty(&self.to_export_json()?)
            .map_err(|e| ChorusError::Internal(format!("serializing export: {e}")))?;
        std::fs::write(&path, body)
            .map_err(|e| ChorusError::io(format!("writing {}", path.display()), e))?;

        info!(path = %path.display(), records = self.records.len(), "Exported comparison");
        Ok(path)
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| ChorusError::Internal(format!("serializing export: {e}")))
}

/// Runs a full comparison for one prompt.
pub struct ComparisonPipeline {
    dispatcher: Dispatcher,
    correlator: StatsCorrelator,
    show_progress: bool,
}

impl ComparisonPipeline {
    pub fn new(client: Arc<GatewayClient>) -> Self {
        Self {
            dispatcher: Dispatcher::new(Arc::clone(&client)),
            correlator: StatsCorrelator::new(client),
            show_progress: false,
        }
    }

    /// Show terminal spinners while each stage runs.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    fn spinner(&self, message: &'static str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(message);
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    }

    /// Dispatch, correlate and aggregate.
    ///
    /// Fails only on batch-level errors (no models, invalid parameters,
    /// missing credential). Per-model problems land in the records.
    pub async fn run(
        &self,
        models: &[Model],
        system_prompt: &str,
        user_input: &str,
        params: GenerationParams,
    ) -> Result<Comparison> {
        let started_at = Utc::now();
        let start = Instant::now();

        info!(
            models = models.len(),
            temperature = params.temperature,
            max_tokens = params.max_tokens,
            "Starting comparison"
        );

        let spinner = self.spinner("Sending request...");
        let chat_results = self
            .dispatcher
            .dispatch(models, system_prompt, user_input, params)
            .await;
        spinner.finish_and_clear();
        let chat_results = chat_results?;

        let spinner = self.spinner("Calculating cost and stats...");
        let stats_results = self.correlator.correlate(&chat_results).await;
        spinner.finish_and_clear();

        let records = aggregate(&chat_results, &stats_results);
        let summary = ComparisonSummary::from_records(&records, start.elapsed());

        info!(
            responses = summary.responses,
            failures = summary.failures,
            stats_unavailable = summary.stats_unavailable,
            cost = format!("${:.6}", summary.total_cost_usd),
            runtime = format!("{:.1}s", summary.runtime_secs),
            "Comparison complete"
        );

        Ok(Comparison {
            started_at,
            system_prompt: system_prompt.to_string(),
            user_input: user_input.to_string(),
            params,
            records,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::{chat_body, client_for, stats_body};
    use crate::models::fixtures::{model, response, stats};
    use crate::models::{ChatResult, ErrorKind, Failure, StatsResult};
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_model(server: &MockServer, model_id: &str, correlation_id: &str) {
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .and(body_partial_json(json!({"model": model_id})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(chat_body(correlation_id, "4")),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_three_model_comparison() {
        let mock_server = MockServer::start().await;
        mount_model(&mock_server, "a/alpha", "gen-a").await;
        mount_model(&mock_server, "b/beta", "gen-b").await;
        mount_model(&mock_server, "c/gamma", "gen-c").await;
        for (id, cost) in [("gen-a", 0.001), ("gen-b", 0.002)] {
            Mock::given(method("GET"))
                .and(path("/api/v1/generation"))
                .and(query_param("id", id))
                .respond_with(ResponseTemplate::new(200).set_body_json(stats_body(cost)))
                .mount(&mock_server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/api/v1/generation"))
            .and(query_param("id", "gen-c"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let models = vec![
            model("c/gamma", "Gamma"),
            model("a/alpha", "Alpha"),
            model("b/beta", "Beta"),
        ];
        let pipeline = ComparisonPipeline::new(Arc::new(client_for(&mock_server)));
        let comparison = pipeline
            .run(
                &models,
                "You are a helpful assistant.",
                "2+2=?",
                GenerationParams::new(0.0, 2048).unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(comparison.records.len(), 3);
        let names: Vec<_> = comparison
            .records
            .iter()
            .map(|r| r.model.name.as_str())
            .collect();
        assert_eq!(names, vec!["Alpha", "Beta", "Gamma"]);

        for record in &comparison.records {
            let response = record.response().unwrap();
            assert!(!response.id.is_empty());
            if let Some(stats) = record.cost_and_stats() {
                assert_eq!(stats.id, response.id);
                assert!(stats.cost >= 0.0);
            }
        }
        assert!(comparison.records[2].cost_and_stats().is_none());

        let summary = &comparison.summary;
        assert_eq!(summary.total_models, 3);
        assert_eq!(summary.responses, 3);
        assert_eq!(summary.failures, 0);
        assert_eq!(summary.stats_available, 2);
        assert_eq!(summary.stats_unavailable, 1);
        assert!((summary.total_cost_usd - 0.003).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_batch_error_propagates() {
        let mock_server = MockServer::start().await;
        let pipeline = ComparisonPipeline::new(Arc::new(client_for(&mock_server)));
        let err = pipeline
            .run(&[], "sys", "hi", GenerationParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    fn sample_comparison() -> Comparison {
        let records = vec![
            AggregatedRecord {
                model: model("a/alpha", "Alpha"),
                chat: ChatResult::Response(response("a/alpha", "gen-a")),
                stats: Some(StatsResult::Stats(stats("gen-a", 0.5))),
            },
            AggregatedRecord {
                model: model("b/beta", "Beta"),
                chat: ChatResult::Failure(Failure {
                    model: "b/beta".to_string(),
                    kind: ErrorKind::Protocol,
                    status: Some(503),
                    message: "overloaded".to_string(),
                }),
                stats: None,
            },
            AggregatedRecord {
                model: model("c/gamma", "Gamma"),
                chat: ChatResult::Response(response("c/gamma", "gen-c")),
                stats: Some(StatsResult::not_found("gen-c")),
            },
        ];
        let summary = ComparisonSummary::from_records(&records, Duration::from_millis(1500));
        Comparison {
            started_at: Utc::now(),
            system_prompt: "You are a helpful assistant.".to_string(),
            user_input: "2+2=?".to_string(),
            params: GenerationParams::default(),
            records,
            summary,
        }
    }

    #[test]
    fn test_summary_counts() {
        let summary = sample_comparison().summary;
        assert_eq!(summary.total_models, 3);
        assert_eq!(summary.responses, 2);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.stats_available, 1);
        assert_eq!(summary.stats_unavailable, 1);
        assert_eq!(summary.total_cost_usd, 0.5);
        assert_eq!(summary.runtime_secs, 1.5);
    }

    #[test]
    fn test_export_document() {
        let export = sample_comparison().to_export_json().unwrap();

        assert_eq!(export["Alpha"]["response"]["id"], "gen-a");
        assert_eq!(export["Alpha"]["response"]["answer"], "4");
        assert_eq!(export["Alpha"]["cost_and_stats"]["cost"], 0.5);

        assert_eq!(export["Beta"]["failure"]["status"], 503);
        assert!(export["Beta"]["cost_and_stats"].is_null());
        assert!(export["Beta"].get("response").is_none());

        assert_eq!(export["Gamma"]["response"]["id"], "gen-c");
        assert!(export["Gamma"]["cost_and_stats"].is_null());
    }

    #[test]
    fn test_export_duplicate_names() {
        let mut comparison = sample_comparison();
        comparison.records[1].model.name = "Alpha".to_string();

        let export = comparison.to_export_json().unwrap();
        let object = export.as_object().unwrap();
        assert_eq!(object.len(), 3);
        assert!(object.contains_key("Alpha (b/beta)"));
    }

    #[test]
    fn test_write_json() {
        let dir = TempDir::new().unwrap();
        let out_dir = dir.path().join("exports");
        let comparison = sample_comparison();

        let path = comparison.write_json(&out_dir).unwrap();
        assert!(path.starts_with(&out_dir));

        let file_name = path.file_name().unwrap().to_str().unwrap();
        assert!(file_name.starts_with("llm-comparison-"));
        assert!(file_name.ends_with(".json"));
        // llm-comparison-YYYY-MM-DD-HH-MM-SS.json
        assert_eq!(file_name.len(), "llm-comparison-".len() + 19 + ".json".len());

        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, comparison.to_export_json().unwrap());
    }
}
