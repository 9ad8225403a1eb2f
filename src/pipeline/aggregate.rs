//! Response aggregator: joins chat and stats results per model.

use crate::models::{AggregatedRecord, ChatResult, ModelMap, StatsResult};
use tracing::warn;

/// Merge dispatch and stats outcomes into one record per dispatched model.
///
/// Pure join. Records are ordered by model name, then id. A model with no
/// stats entry (its chat call failed) gets `stats: None`; a stats entry whose
/// id does not match the model's response id is dropped.
pub fn aggregate(
    chat_results: &ModelMap<ChatResult>,
    stats_results: &ModelMap<StatsResult>,
) -> Vec<AggregatedRecord> {
    let mut records: Vec<AggregatedRecord> = chat_results
        .iter()
        .map(|(model_id, entry)| {
            let stats = stats_results
                .get(model_id)
                .map(|s| &s.value)
                .filter(|stats| match entry.value.as_response() {
                    Some(response) if response.id == stats.id() => true,
                    _ => {
                        warn!(
                            model = %model_id,
                            stats_id = stats.id(),
                            "Stats do not belong to this model's response, dropping"
                        );
                        false
                    }
                })
                .cloned();

            AggregatedRecord {
                model: entry.model.clone(),
                chat: entry.value.clone(),
                stats,
            }
        })
        .collect();

    records.sort_by(|a, b| {
        a.model
            .name
            .cmp(&b.model.name)
            .then_with(|| a.model.id.cmp(&b.model.id))
    });
    records
}
