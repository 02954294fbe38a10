//! Persisted data model for show summaries and audience roll-ups.
//!
//! Every mapping is a `BTreeMap`, so serialized JSON carries ascending key
//! order at every level and aggregation order never leaks into the output.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Period literal for the all-time summary.
pub const OVERALL_PERIOD: &str = "overall";

/// Roll-up of downloads for one (show, period).
///
/// The period is a date (`YYYY-MM-DD`), a month (`YYYY-MM`), or `overall`.
/// `sources` records the ETag of every input blob observed at read time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowSummary {
    pub show_uuid: Uuid,
    pub period: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hourly_downloads: BTreeMap<String, u64>,
    #[serde(default)]
    pub episodes: BTreeMap<String, EpisodeSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension_downloads: Option<BTreeMap<String, BTreeMap<String, u64>>>,
    #[serde(default)]
    pub sources: BTreeMap<String, String>,
}

impl ShowSummary {
    /// An empty summary for the given period.
    pub fn new(show_uuid: Uuid, period: impl Into<String>) -> Self {
        Self {
            show_uuid,
            period: period.into(),
            hourly_downloads: BTreeMap::new(),
            episodes: BTreeMap::new(),
            dimension_downloads: None,
            sources: BTreeMap::new(),
        }
    }
}

/// Per-episode roll-up within a `ShowSummary`.
///
/// `first_hour` is the lexicographic minimum hour bucket ever observed for
/// the episode within the encompassing period; under the fixed
/// `YYYY-MM-DDTHH` format lexicographic order is chronological order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeSummary {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hourly_downloads: BTreeMap<String, u64>,
    pub first_hour: String,
}

impl EpisodeSummary {
    pub fn new(first_hour: impl Into<String>) -> Self {
        Self {
            hourly_downloads: BTreeMap::new(),
            first_hour: first_hour.into(),
        }
    }

    /// Lower `first_hour` to `hour` if `hour` sorts before it.
    pub fn observe_hour(&mut self, hour: &str) {
        if hour < self.first_hour.as_str() {
            self.first_hour = hour.to_string();
        }
    }
}

/// Month-scoped distinct-audience roll-up, optionally for one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudienceSummary {
    pub show_uuid: Uuid,
    pub period: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part: Option<String>,
    pub daily_found_audience: BTreeMap<String, u64>,
}

/// A shard of the audience-id hex-prefix space.
///
/// `num_parts` is 4 or 8; `part_num` is 1-based. The shard of a line is
/// decided by the first hex digit of its audience id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudiencePart {
    pub part_num: u32,
    pub num_parts: u32,
}

impl fmt::Display for AudiencePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}of{}", self.part_num, self.num_parts)
    }
}
