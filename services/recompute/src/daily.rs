//! Daily computer: derives one (show, date) summary from the raw daily file.
//!
//! Streams the show-daily TSV once, accumulating hourly totals, per-episode
//! totals with first-download markers, dimensional breakdowns, and the
//! first-seen timestamp of every audience id. Bot rows are excluded from
//! everything. The resulting summary carries the source blob's ETag for
//! provenance and is rewritten in full on every run.

use crate::accumulator;
use crate::blob_store::{BlobStore, PutBody};
use crate::error::RecomputeError;
use crate::keys;
use crate::summary::{EpisodeSummary, ShowSummary};
use crate::tsv::{TsvReader, TsvRecord};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Result of one daily computation: the summary plus the first-seen
/// timestamp of every audience id, in row order.
#[derive(Debug, Clone)]
pub struct DailyComputation {
    pub summary: ShowSummary,
    pub audience_timestamps: Vec<(String, String)>,
}

pub struct DailyComputer {
    store: Arc<dyn BlobStore>,
}

impl DailyComputer {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Compute the summary for a date using the canonical daily key.
    pub async fn compute_for_date(
        &self,
        show: &Uuid,
        date: &str,
    ) -> Result<DailyComputation, RecomputeError> {
        let key = keys::show_daily_key(show, date);
        self.compute_from_key(show, &key, date).await
    }

    /// Compute the summary for a date from an already-listed daily key.
    pub async fn compute_from_key(
        &self,
        show: &Uuid,
        key: &str,
        date: &str,
    ) -> Result<DailyComputation, RecomputeError> {
        let stream = self
            .store
            .get_stream(key)
            .await?
            .ok_or_else(|| RecomputeError::missing(key.to_string()))?;
        let source_etag = stream.etag;

        let mut tsv = TsvReader::new(stream.reader)
            .await
            .map_err(|e| RecomputeError::corrupt(format!("{key}: {e}")))?;

        let mut hourly_downloads = BTreeMap::new();
        let mut episodes: BTreeMap<String, EpisodeSummary> = BTreeMap::new();
        let mut dimensions: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();
        let mut audience_timestamps: Vec<(String, String)> = Vec::new();
        let mut seen_audience: HashSet<String> = HashSet::new();

        while let Some(record) = tsv
            .next_record()
            .await
            .map_err(|e| RecomputeError::corrupt(format!("{key}: {e}")))?
        {
            // Bot rows count nowhere: not hourly, not dimensions, not audience.
            if record.get_non_empty("botType").is_some() {
                continue;
            }

            let time = record
                .get_non_empty("time")
                .ok_or_else(|| RecomputeError::corrupt(format!("{key}: row missing time")))?;
            let hour = hour_bucket(time)
                .ok_or_else(|| RecomputeError::corrupt(format!("{key}: bad time {time:?}")))?;

            accumulator::increment(&mut hourly_downloads, hour);

            if let Some(audience_id) = record.get_non_empty("audienceId") {
                if !seen_audience.contains(audience_id) {
                    seen_audience.insert(audience_id.to_string());
                    audience_timestamps
                        .push((audience_id.to_string(), compact_timestamp(time)));
                }
            }

            if let Some(episode_id) = record.get_non_empty("episodeId") {
                let episode = episodes
                    .entry(episode_id.to_string())
                    .or_insert_with(|| EpisodeSummary::new(hour));
                episode.observe_hour(hour);
                accumulator::increment(&mut episode.hourly_downloads, hour);
            }

            record_dimensions(&mut dimensions, &record);
        }

        let downloads = accumulator::total(&hourly_downloads);
        metrics::counter!("recompute.daily.downloads").increment(downloads);
        debug!(
            show = %show,
            date = %date,
            downloads,
            episodes = episodes.len(),
            audience = audience_timestamps.len(),
            "Computed daily summary"
        );

        let mut summary = ShowSummary::new(*show, date);
        summary.hourly_downloads = hourly_downloads;
        summary.episodes = episodes;
        summary.dimension_downloads = (!dimensions.is_empty()).then_some(dimensions);
        summary.sources.insert(key.to_string(), source_etag);

        Ok(DailyComputation {
            summary,
            audience_timestamps,
        })
    }

    /// Persist a summary at its period key. Returns the key written.
    pub async fn save_summary(&self, summary: &ShowSummary) -> Result<String, RecomputeError> {
        let key = keys::summary_key(&summary.show_uuid, &summary.period);
        let json = serde_json::to_string(summary)
            .map_err(|e| RecomputeError::corrupt(format!("{key}: serialize failed: {e}")))?;
        self.store.put(&key, PutBody::Text(json)).await?;
        Ok(key)
    }

    /// Persist the daily audience file: one `id\ttimestamp` line per distinct
    /// audience id, in first-seen order. Returns the key written.
    pub async fn save_audience(
        &self,
        show: &Uuid,
        date: &str,
        audience_timestamps: &[(String, String)],
    ) -> Result<String, RecomputeError> {
        let key = keys::audience_daily_key(show, date);
        let mut body = String::new();
        for (audience_id, timestamp) in audience_timestamps {
            body.push_str(audience_id);
            body.push('\t');
            body.push_str(timestamp);
            body.push('\n');
        }
        self.store.put(&key, PutBody::Text(body)).await?;
        Ok(key)
    }
}

/// The 13-char `YYYY-MM-DDTHH` prefix of an ISO-8601 timestamp.
fn hour_bucket(time: &str) -> Option<&str> {
    time.get(..13)
}

/// Digits-only timestamp truncated to 15 chars (`YYYYMMDDhhmmssm`).
fn compact_timestamp(time: &str) -> String {
    time.chars().filter(char::is_ascii_digit).take(15).collect()
}

/// Apply the dimensional increments for one non-bot row.
fn record_dimensions(dims: &mut BTreeMap<String, BTreeMap<String, u64>>, record: &TsvRecord) {
    let country = record.get_non_empty("countryCode").unwrap_or("XX");
    let continent = record.get_non_empty("continentCode").unwrap_or("XX");
    let region = record.get_non_empty("regionName").unwrap_or("Unknown");
    let agent_type = record.get_non_empty("agentType").unwrap_or("unknown");
    let agent_name = record.get_non_empty("agentName").unwrap_or("Unknown");

    let mut bump = |dimension: &str, label: String| {
        accumulator::increment(dims.entry(dimension.to_string()).or_default(), label);
    };

    bump("countryCode", country.to_string());

    if let Some(metro) = record.get_non_empty("metroCode") {
        bump("metroCode", metro.to_string());
    }

    match continent {
        "EU" => bump("euRegion", format!("{region}, {country}")),
        "AS" => bump("asRegion", format!("{region}, {country}")),
        "AF" => bump("afRegion", format!("{region}, {country}")),
        _ => {}
    }
    if matches!(country, "AU" | "NZ") {
        bump("auRegion", format!("{region}, {country}"));
    }
    if country == "CA" {
        bump("caRegion", region.to_string());
    }
    if matches!(continent, "NA" | "SA") && !matches!(country, "US" | "CA") {
        bump("latamRegion", format!("{region}, {country}"));
    }

    match agent_type {
        "app" => bump("appName", agent_name.to_string()),
        "browser" => {
            bump("browserName", agent_name.to_string());
            if let Some(referrer_type) = record.get_non_empty("referrerType") {
                let referrer_name = record.get_non_empty("referrerName").unwrap_or("Unknown");
                bump("referrer", format!("{referrer_type}.{referrer_name}"));
            }
        }
        "library" => bump("libraryName", agent_name.to_string()),
        _ => {}
    }

    bump(
        "deviceType",
        record.get_non_empty("deviceType").unwrap_or("unknown").to_string(),
    );
    bump(
        "deviceName",
        record.get_non_empty("deviceName").unwrap_or("Unknown").to_string(),
    );

    if let Some(tags) = record.get_non_empty("tags") {
        for tag in tags.split(',').filter(|tag| !tag.is_empty()) {
            bump("tag", tag.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryBlobStore;

    const HEADER: &str = "time\tepisodeId\taudienceId\tbotType\tcountryCode\tcontinentCode\tregionName\tagentType\tagentName\tdeviceType\tdeviceName\treferrerType\treferrerName\tmetroCode\ttags";

    fn show() -> Uuid {
        Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap()
    }

    fn audience_id(suffix: u8) -> String {
        format!("{:064x}", suffix)
    }

    async fn seed(rows: &[&str]) -> (Arc<MemoryBlobStore>, DailyComputer) {
        let store = Arc::new(MemoryBlobStore::new());
        let mut body = String::from(HEADER);
        body.push('\n');
        for row in rows {
            body.push_str(row);
            body.push('\n');
        }
        store
            .put(
                &keys::show_daily_key(&show(), "2024-03-05"),
                PutBody::Text(body),
            )
            .await
            .unwrap();
        let computer = DailyComputer::new(store.clone() as Arc<dyn BlobStore>);
        (store, computer)
    }

    #[tokio::test]
    async fn test_single_day_roll_up() {
        let id = audience_id(1);
        let (_, computer) = seed(&[
            &format!("2024-03-05T10:01:00.000Z\tE1\t{id}\t\tUS\tNA\tWashington\tapp\tPocket Casts\tmobile\tiPhone"),
            &format!("2024-03-05T10:30:00.000Z\tE1\t{id}\t\tUS\tNA\tWashington\tapp\tPocket Casts\tmobile\tiPhone"),
        ])
        .await;

        let computed = computer.compute_for_date(&show(), "2024-03-05").await.unwrap();
        let summary = &computed.summary;

        assert_eq!(summary.period, "2024-03-05");
        assert_eq!(summary.hourly_downloads.get("2024-03-05T10"), Some(&2));
        let episode = summary.episodes.get("E1").unwrap();
        assert_eq!(episode.first_hour, "2024-03-05T10");
        assert_eq!(episode.hourly_downloads.get("2024-03-05T10"), Some(&2));

        let dims = summary.dimension_downloads.as_ref().unwrap();
        assert_eq!(dims["appName"].get("Pocket Casts"), Some(&2));
        assert_eq!(dims["countryCode"].get("US"), Some(&2));
        assert_eq!(dims["deviceType"].get("mobile"), Some(&2));
        // US is not a latam country.
        assert!(dims.get("latamRegion").is_none());

        // Same audience id twice collapses to one timestamp.
        assert_eq!(
            computed.audience_timestamps,
            vec![(id, "202403051001000".to_string())]
        );

        // Source ETag recorded for provenance.
        assert_eq!(summary.sources.len(), 1);
    }

    #[tokio::test]
    async fn test_bot_rows_are_fully_excluded() {
        let id = audience_id(2);
        let (_, computer) = seed(&[
            &format!("2024-03-05T10:01:00.000Z\tE1\t{id}\tbot\tUS\tNA\tWashington\tapp\tBotApp\tmobile\tiPhone"),
            "2024-03-05T11:00:00.000Z\tE1\t\t\tUS\tNA\tWashington\tapp\tPocket Casts\tmobile\tiPhone",
        ])
        .await;

        let computed = computer.compute_for_date(&show(), "2024-03-05").await.unwrap();
        let summary = &computed.summary;

        assert_eq!(accumulator::total(&summary.hourly_downloads), 1);
        assert_eq!(summary.hourly_downloads.get("2024-03-05T10"), None);
        let dims = summary.dimension_downloads.as_ref().unwrap();
        assert_eq!(dims["appName"].get("BotApp"), None);
        assert!(computed.audience_timestamps.is_empty());
        let episode = summary.episodes.get("E1").unwrap();
        assert_eq!(accumulator::total(&episode.hourly_downloads), 1);
    }

    #[tokio::test]
    async fn test_hourly_total_matches_non_bot_rows() {
        let (_, computer) = seed(&[
            "2024-03-05T00:05:00.000Z",
            "2024-03-05T00:59:00.000Z",
            "2024-03-05T23:00:00.000Z\t\t\tbot",
            "2024-03-05T23:30:00.000Z",
        ])
        .await;

        let computed = computer.compute_for_date(&show(), "2024-03-05").await.unwrap();
        assert_eq!(accumulator::total(&computed.summary.hourly_downloads), 3);
        assert_eq!(
            computed.summary.hourly_downloads.get("2024-03-05T00"),
            Some(&2)
        );
    }

    #[tokio::test]
    async fn test_episode_first_hour_is_lexicographic_min() {
        let (_, computer) = seed(&[
            "2024-03-05T14:00:00.000Z\tE1",
            "2024-03-05T09:00:00.000Z\tE1",
            "2024-03-05T11:00:00.000Z\tE1",
        ])
        .await;

        let computed = computer.compute_for_date(&show(), "2024-03-05").await.unwrap();
        let episode = computed.summary.episodes.get("E1").unwrap();
        assert_eq!(episode.first_hour, "2024-03-05T09");
        assert!(episode
            .hourly_downloads
            .keys()
            .all(|hour| episode.first_hour.as_str() <= hour.as_str()));
    }

    #[tokio::test]
    async fn test_dimension_defaults_and_regions() {
        let (_, computer) = seed(&[
            // No geo/agent/device at all: defaults everywhere.
            "2024-03-05T10:00:00.000Z",
            // EU region, browser with referrer, tags.
            "2024-03-05T10:01:00.000Z\t\t\t\tDE\tEU\tBavaria\tbrowser\tFirefox\tcomputer\tMac\thost\tpodstats.example\t\tnews,tech",
            // Canadian region label carries no country suffix.
            "2024-03-05T10:02:00.000Z\t\t\t\tCA\tNA\tOntario\tlibrary\thttpclient",
            // Latam: americas minus US/CA.
            "2024-03-05T10:03:00.000Z\t\t\t\tBR\tSA\tSao Paulo",
        ])
        .await;

        let computed = computer.compute_for_date(&show(), "2024-03-05").await.unwrap();
        let dims = computed.summary.dimension_downloads.as_ref().unwrap();

        assert_eq!(dims["countryCode"].get("XX"), Some(&1));
        assert_eq!(dims["deviceType"].get("unknown"), Some(&2));
        assert_eq!(dims["deviceName"].get("Unknown"), Some(&2));

        assert_eq!(dims["euRegion"].get("Bavaria, DE"), Some(&1));
        assert_eq!(dims["browserName"].get("Firefox"), Some(&1));
        assert_eq!(dims["referrer"].get("host.podstats.example"), Some(&1));
        assert_eq!(dims["tag"].get("news"), Some(&1));
        assert_eq!(dims["tag"].get("tech"), Some(&1));

        assert_eq!(dims["caRegion"].get("Ontario"), Some(&1));
        assert_eq!(dims["libraryName"].get("httpclient"), Some(&1));

        assert_eq!(dims["latamRegion"].get("Sao Paulo, BR"), Some(&1));
        // US row is not latam; CA row is not latam either.
        assert_eq!(accumulator::total(&dims["latamRegion"]), 1);
    }

    #[tokio::test]
    async fn test_missing_daily_blob_is_missing_input() {
        let store = Arc::new(MemoryBlobStore::new());
        let computer = DailyComputer::new(store as Arc<dyn BlobStore>);
        let result = computer.compute_for_date(&show(), "2024-03-05").await;
        assert!(matches!(result, Err(RecomputeError::MissingInput(_))));
    }

    #[tokio::test]
    async fn test_row_without_time_is_corrupt_input() {
        let (_, computer) = seed(&["\tE1"]).await;
        let result = computer.compute_for_date(&show(), "2024-03-05").await;
        assert!(matches!(result, Err(RecomputeError::CorruptInput(_))));
    }

    #[tokio::test]
    async fn test_save_audience_writes_insertion_order_lines() {
        let (store, computer) = seed(&[]).await;
        let first = audience_id(0xb);
        let second = audience_id(0xa);
        let key = computer
            .save_audience(
                &show(),
                "2024-03-05",
                &[
                    (first.clone(), "202403051001000".to_string()),
                    (second.clone(), "202403051002000".to_string()),
                ],
            )
            .await
            .unwrap();

        let body = store.get_text(&key).await.unwrap().unwrap();
        let expected = format!("{first}\t202403051001000\n{second}\t202403051002000\n");
        assert_eq!(body, expected);
        // 64 + 1 + 15 + 1 bytes per line.
        assert_eq!(body.len(), 81 * 2);
    }

    #[tokio::test]
    async fn test_save_summary_writes_period_key() {
        let (store, computer) = seed(&["2024-03-05T10:00:00.000Z\tE1"]).await;
        let computed = computer.compute_for_date(&show(), "2024-03-05").await.unwrap();
        let key = computer.save_summary(&computed.summary).await.unwrap();
        assert_eq!(key, keys::summary_key(&show(), "2024-03-05"));

        let body = store.get_text(&key).await.unwrap().unwrap();
        let parsed: ShowSummary = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed, computed.summary);
    }

    #[test]
    fn test_compact_timestamp() {
        assert_eq!(
            compact_timestamp("2024-03-05T10:01:02.345Z"),
            "202403051001023"
        );
        assert_eq!(compact_timestamp("2024-03-05T10"), "2024030510");
    }
}
