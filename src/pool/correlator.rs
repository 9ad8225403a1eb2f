//! Stats correlator: cost and usage lookups keyed by correlation id.
//!
//! Epistemic foundation:
//! - K_i: Only Responses carry a correlation id; Failures are skipped
//! - B_i: Stats may be delayed, expired or missing at the gateway
//! - I^B: Telemetry is advisory → every failure path resolves to Absent

use crate::client::GatewayClient;
use crate::models::{ChatResult, ChorusError, ModelMap, PerModel, StatsResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Looks up generation stats for every successful dispatch.
pub struct StatsCorrelator {
    client: Arc<GatewayClient>,
}

impl StatsCorrelator {
    pub fn new(client: Arc<GatewayClient>) -> Self {
        Self { client }
    }

    /// Fetch stats for each Response in `results`, concurrently.
    ///
    /// The returned map holds one entry per Response and none for Failures.
    /// Each entry is `Stats` or `Absent`; lookup errors never escape.
    pub async fn correlate(&self, results: &ModelMap<ChatResult>) -> ModelMap<StatsResult> {
        let mut handles = Vec::new();

        for entry in results.values() {
            let ChatResult::Response(response) = &entry.value else {
                continue;
            };

            let client = Arc::clone(&self.client);
            let id = response.id.clone();
            let handle = tokio::spawn(async move {
                match client.fetch_stats(&id).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(id = %id, error = %e, "Stats lookup failed");
                        StatsResult::lookup_failed(id, &e)
                    }
                }
            });
            handles.push((entry.model.clone(), response.id.clone(), handle));
        }

        debug!(tasks = handles.len(), "Dispatched stats lookups");

        let mut stats = HashMap::with_capacity(handles.len());
        for (model, id, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(model = %model.id, error = %e, "Stats task panicked");
                    StatsResult::lookup_failed(
                        id,
                        &ChorusError::Internal(format!("task failed: {e}")),
                    )
                }
            };
            if let StatsResult::Absent(absent) = &result {
                warn!(model = %model.id, id = %absent.id, reason = %absent.reason, "Stats unavailable");
            }
            stats.insert(model.id.clone(), PerModel {
                model,
                value: result,
            });
        }

        let available = stats.values().filter(|e| e.value.as_stats().is_some()).count();
        info!(
            lookups = stats.len(),
            available = available,
            absent = stats.len() - available,
            "Correlation complete"
        );

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::{client_for, stats_body};
    use crate::models::fixtures::{model, response};
    use crate::models::{AbsentReason, ErrorKind, Failure};
    use std::time::{Duration, Instant};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chat_results(entries: Vec<(&str, ChatResult)>) -> ModelMap<ChatResult> {
        entries
            .into_iter()
            .map(|(id, value)| {
                (id.to_string(), PerModel {
                    model: model(id, id),
                    value,
                })
            })
            .collect()
    }

    fn failure(model_id: &str) -> ChatResult {
        ChatResult::Failure(Failure {
            model: model_id.to_string(),
            kind: ErrorKind::Transport,
            status: None,
            message: "connection refused".to_string(),
        })
    }

    #[tokio::test]
    async fn test_only_failures_yields_empty() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(stats_body(0.1)))
            .expect(0)
            .mount(&mock_server)
            .await;

        let results = chat_results(vec![("a/alpha", failure("a/alpha")), ("b/beta", failure("b/beta"))]);
        let correlator = StatsCorrelator::new(Arc::new(client_for(&mock_server)));
        let stats = correlator.correlate(&results).await;
        assert!(stats.is_empty());
    }

    #[tokio::test]
    async fn test_correlates_by_response_id() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/generation"))
            .and(query_param("id", "gen-a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(stats_body(0.25)))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/generation"))
            .and(query_param("id", "gen-c"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let results = chat_results(vec![
            ("a/alpha", ChatResult::Response(response("a/alpha", "gen-a"))),
            ("b/beta", failure("b/beta")),
            ("c/gamma", ChatResult::Response(response("c/gamma", "gen-c"))),
        ]);
        let correlator = StatsCorrelator::new(Arc::new(client_for(&mock_server)));
        let stats = correlator.correlate(&results).await;

        assert_eq!(stats.len(), 2);
        assert!(!stats.contains_key("b/beta"));

        let alpha = stats["a/alpha"].value.as_stats().unwrap();
        assert_eq!(alpha.id, "gen-a");
        assert_eq!(alpha.cost, 0.25);

        match &stats["c/gamma"].value {
            StatsResult::Absent(absent) => {
                assert_eq!(absent.id, "gen-c");
                assert_eq!(absent.reason, AbsentReason::NotFound);
            }
            other => panic!("expected Absent, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_lookups_run_concurrently() {
        const DELAY: Duration = Duration::from_millis(500);
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/generation"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(stats_body(0.01))
                    .set_delay(DELAY),
            )
            .expect(4)
            .mount(&mock_server)
            .await;

        let results = chat_results(vec![
            ("a/alpha", ChatResult::Response(response("a/alpha", "gen-a"))),
            ("b/beta", ChatResult::Response(response("b/beta", "gen-b"))),
            ("c/gamma", ChatResult::Response(response("c/gamma", "gen-c"))),
            ("d/delta", ChatResult::Response(response("d/delta", "gen-d"))),
        ]);
        let correlator = StatsCorrelator::new(Arc::new(client_for(&mock_server)));

        let start = Instant::now();
        let stats = correlator.correlate(&results).await;
        let elapsed = start.elapsed();

        assert_eq!(stats.len(), 4);
        assert!(stats.values().all(|e| e.value.as_stats().is_some()));
        // Sequential lookups would take 4 × DELAY.
        assert!(elapsed >= DELAY);
        assert!(elapsed < DELAY * 2, "correlate took {elapsed:?}");
    }

    #[tokio::test]
    async fn test_lookup_errors_fold_to_absent() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&mock_server)
            .await;

        let results = chat_results(vec![(
            "a/alpha",
            ChatResult::Response(response("a/alpha", "gen-a")),
        )]);
        let correlator = StatsCorrelator::new(Arc::new(client_for(&mock_server)));
        let stats = correlator.correlate(&results).await;

        match &stats["a/alpha"].value {
            StatsResult::Absent(absent) => {
                assert_eq!(absent.id, "gen-a");
                assert!(matches!(
                    absent.reason,
                    AbsentReason::LookupFailed {
                        kind: ErrorKind::Protocol,
                        ..
                    }
                ));
            }
            other => panic!("expected Absent, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_stats_fold_to_absent() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"data": {"tokens_prompt": 1}})),
            )
            .mount(&mock_server)
            .await;

        let results = chat_results(vec![(
            "a/alpha",
            ChatResult::Response(response("a/alpha", "gen-a")),
        )]);
        let correlator = StatsCorrelator::new(Arc::new(client_for(&mock_server)));
        let stats = correlator.correlate(&results).await;
        assert!(stats["a/alpha"].value.as_stats().is_none());
    }
}
