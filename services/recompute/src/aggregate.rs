//! Monthly aggregator: sums daily summaries into a month summary and keeps
//! the all-time per-episode first-download markers current.
//!
//! The month merge is commutative (sums and lexicographic minima), so input
//! order never matters. Missing daily summaries are skipped — a partial
//! month is a valid state, reproduced identically by a later full run. The
//! overall summary is read-modify-write but written only on monotone change.

use crate::accumulator;
use crate::blob_store::{BlobStore, PutBody};
use crate::error::RecomputeError;
use crate::keys;
use crate::summary::{EpisodeSummary, ShowSummary, OVERALL_PERIOD};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Outcome of one aggregation run.
#[derive(Debug, Clone)]
pub struct AggregateOutcome {
    pub summary: ShowSummary,
    /// Input keys that existed and were summed.
    pub summed: usize,
    /// Whether the overall summary changed and was rewritten.
    pub overall_written: bool,
}

pub struct MonthlyAggregator {
    store: Arc<dyn BlobStore>,
}

impl MonthlyAggregator {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Sum the given daily summaries into a summary for `output_period`,
    /// persist it, and fold its episodes into the overall summary.
    pub async fn aggregate(
        &self,
        show: &Uuid,
        input_keys: &[String],
        output_period: &str,
    ) -> Result<AggregateOutcome, RecomputeError> {
        let mut aggregate = ShowSummary::new(*show, output_period);
        let mut dimensions: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();
        let mut summed = 0usize;

        for input_key in input_keys {
            let Some(read) = self.store.get_text_with_etag(input_key).await? else {
                debug!(key = %input_key, "Daily summary absent, skipping");
                continue;
            };
            let daily: ShowSummary = serde_json::from_str(&read.text)
                .map_err(|e| RecomputeError::corrupt(format!("{input_key}: {e}")))?;

            accumulator::increment_all(&mut aggregate.hourly_downloads, &daily.hourly_downloads);

            if let Some(daily_dims) = &daily.dimension_downloads {
                for (dimension, buckets) in daily_dims {
                    accumulator::increment_all(
                        dimensions.entry(dimension.clone()).or_default(),
                        buckets,
                    );
                }
            }

            for (episode_id, daily_episode) in &daily.episodes {
                let episode = aggregate
                    .episodes
                    .entry(episode_id.clone())
                    .or_insert_with(|| EpisodeSummary::new(&daily_episode.first_hour));
                episode.observe_hour(&daily_episode.first_hour);
                accumulator::increment_all(
                    &mut episode.hourly_downloads,
                    &daily_episode.hourly_downloads,
                );
            }

            aggregate.sources.insert(input_key.clone(), read.etag);
            summed += 1;
        }

        aggregate.dimension_downloads = (!dimensions.is_empty()).then_some(dimensions);

        let output_key = keys::summary_key(show, output_period);
        let json = serde_json::to_string(&aggregate)
            .map_err(|e| RecomputeError::corrupt(format!("{output_key}: serialize failed: {e}")))?;
        self.store.put(&output_key, PutBody::Text(json)).await?;

        let overall_written = self.merge_overall(show, &aggregate).await?;

        metrics::counter!("recompute.aggregates.written").increment(1);
        debug!(
            show = %show,
            period = %output_period,
            summed,
            overall_written,
            "Aggregated summaries"
        );

        Ok(AggregateOutcome {
            summary: aggregate,
            summed,
            overall_written,
        })
    }

    /// Fold the month's episode first-hours into the overall summary.
    ///
    /// The overall summary carries only per-episode `first_hour` plus its
    /// original provenance; it is rewritten only when an episode appears for
    /// the first time or an earlier first-hour is observed.
    async fn merge_overall(
        &self,
        show: &Uuid,
        month_summary: &ShowSummary,
    ) -> Result<bool, RecomputeError> {
        let overall_key = keys::summary_key(show, OVERALL_PERIOD);

        let existing = self.store.get_text(&overall_key).await?;
        let mut overall = match &existing {
            Some(text) => serde_json::from_str::<ShowSummary>(text)
                .map_err(|e| RecomputeError::corrupt(format!("{overall_key}: {e}")))?,
            None => ShowSummary::new(*show, OVERALL_PERIOD),
        };

        let mut changed = existing.is_none();
        for (episode_id, month_episode) in &month_summary.episodes {
            match overall.episodes.get_mut(episode_id) {
                Some(overall_episode) => {
                    if month_episode.first_hour < overall_episode.first_hour {
                        overall_episode.first_hour = month_episode.first_hour.clone();
                        changed = true;
                    }
                }
                None => {
                    overall.episodes.insert(
                        episode_id.clone(),
                        EpisodeSummary::new(&month_episode.first_hour),
                    );
                    changed = true;
                }
            }
        }

        if changed {
            let json = serde_json::to_string(&overall).map_err(|e| {
                RecomputeError::corrupt(format!("{overall_key}: serialize failed: {e}"))
            })?;
            self.store.put(&overall_key, PutBody::Text(json)).await?;
        }
        Ok(changed)
    }
}
