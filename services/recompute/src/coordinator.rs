//! Phase coordinator: parses a recompute job request and runs the selected
//! phases — dailies, aggregates, audience — against the blob store.
//!
//! All request validation happens before any I/O. The dailies fan-out runs
//! per-day tasks concurrently (bounded) unless the `sequential` flag forces
//! strict order; each day persists its summary and audience file in
//! parallel. Elapsed milliseconds per named step are collected for the
//! caller.

use crate::aggregate::MonthlyAggregator;
use crate::audience::{self, AudienceReducer};
use crate::blob_store::BlobStore;
use crate::config::RecomputeConfig;
use crate::daily::DailyComputer;
use crate::error::RecomputeError;
use crate::keys;
use crate::summary::AudiencePart;
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Target path this coordinator serves.
pub const RECOMPUTE_TARGET_PATH: &str = "/work/recompute-show-summaries";

/// Raw job request as dispatched by the worker shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub operation_kind: String,
    pub target_path: String,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// One recompute phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Dailies,
    Aggregates,
    Audience { part: Option<AudiencePart> },
}

/// A validated recompute request. Construction performs every input check,
/// so a held value is always runnable.
#[derive(Debug, Clone)]
pub struct RecomputeRequest {
    pub show_uuid: Uuid,
    pub month: String,
    pub phases: Vec<Phase>,
    pub start_day: Option<u32>,
    pub max_days: Option<u32>,
    pub sequential: bool,
    pub log: bool,
}

impl RecomputeRequest {
    /// A request for all phases of a (show, month).
    pub fn new(show_uuid: Uuid, month: &str) -> Result<Self, RecomputeError> {
        validate_month(month)?;
        Ok(Self {
            show_uuid,
            month: month.to_string(),
            phases: default_phases(),
            start_day: None,
            max_days: None,
            sequential: false,
            log: false,
        })
    }

    /// Validate a raw job request into a runnable one.
    pub fn from_job(job: &JobRequest) -> Result<Self, RecomputeError> {
        if job.operation_kind != "update" {
            return Err(RecomputeError::invalid(format!(
                "unsupported operation kind {:?}",
                job.operation_kind
            )));
        }
        if job.target_path != RECOMPUTE_TARGET_PATH {
            return Err(RecomputeError::invalid(format!(
                "unsupported target path {:?}",
                job.target_path
            )));
        }

        let show = job
            .parameters
            .get("show")
            .ok_or_else(|| RecomputeError::invalid("missing parameter: show"))?;
        let show_uuid = Uuid::parse_str(show)
            .map_err(|_| RecomputeError::invalid(format!("bad show uuid {show:?}")))?;

        let month = job
            .parameters
            .get("month")
            .ok_or_else(|| RecomputeError::invalid("missing parameter: month"))?;
        validate_month(month)?;

        let flags: HashSet<&str> = job
            .parameters
            .get("flags")
            .map(|flags| flags.split(',').collect())
            .unwrap_or_default();

        let phases = match job.parameters.get("phases") {
            Some(phases) => phases
                .split(',')
                .map(parse_phase)
                .collect::<Result<Vec<_>, _>>()?,
            None => default_phases(),
        };

        let start_day = parse_day_parameter(&job.parameters, "startDay")?;
        let max_days = match job.parameters.get("maxDays") {
            Some(raw) => Some(raw.parse::<u32>().map_err(|_| {
                RecomputeError::invalid(format!("bad maxDays {raw:?}"))
            })?),
            None => None,
        };

        Ok(Self {
            show_uuid,
            month: month.clone(),
            phases,
            start_day,
            max_days,
            sequential: flags.contains("sequential"),
            log: flags.contains("log"),
        })
    }
}

fn default_phases() -> Vec<Phase> {
    vec![
        Phase::Dailies,
        Phase::Aggregates,
        Phase::Audience { part: None },
    ]
}

fn validate_month(month: &str) -> Result<(), RecomputeError> {
    let valid = month.len() == 7
        && NaiveDate::parse_from_str(&format!("{month}-01"), "%Y-%m-%d").is_ok();
    if valid {
        Ok(())
    } else {
        Err(RecomputeError::invalid(format!("bad month {month:?}")))
    }
}

fn parse_phase(token: &str) -> Result<Phase, RecomputeError> {
    match token {
        "dailies" => Ok(Phase::Dailies),
        "aggregates" => Ok(Phase::Aggregates),
        "audience" => Ok(Phase::Audience { part: None }),
        _ => {
            if let Some((part_num, num_parts)) = token
                .strip_prefix("audience-")
                .and_then(|rest| rest.split_once("of"))
            {
                let part = AudiencePart {
                    part_num: part_num.parse().map_err(|_| {
                        RecomputeError::invalid(format!("bad phase token {token:?}"))
                    })?,
                    num_parts: num_parts.parse().map_err(|_| {
                        RecomputeError::invalid(format!("bad phase token {token:?}"))
                    })?,
                };
                audience::validate_part(part)?;
                return Ok(Phase::Audience { part: Some(part) });
            }
            Err(RecomputeError::invalid(format!(
                "unrecognized phase {token:?}"
            )))
        }
    }
}

fn parse_day_parameter(
    parameters: &HashMap<String, String>,
    name: &str,
) -> Result<Option<u32>, RecomputeError> {
    match parameters.get(name) {
        Some(raw) => {
            let day: u32 = raw
                .parse()
                .map_err(|_| RecomputeError::invalid(format!("bad {name} {raw:?}")))?;
            if !(1..=31).contains(&day) {
                return Err(RecomputeError::invalid(format!("bad {name} {raw:?}")));
            }
            Ok(Some(day))
        }
        None => Ok(None),
    }
}

/// Per-phase results returned to the caller alongside step timings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeOutcome {
    pub show_uuid: Uuid,
    pub month: String,
    /// Elapsed milliseconds per named step.
    pub times: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_processed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<AggregatePhaseOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience: Option<AudiencePhaseOutcome>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatePhaseOutcome {
    pub summed: usize,
    pub overall_written: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudiencePhaseOutcome {
    pub audience: u64,
    pub content_length: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part: Option<String>,
}

pub struct Coordinator {
    store: Arc<dyn BlobStore>,
    daily: DailyComputer,
    aggregator: MonthlyAggregator,
    audience: AudienceReducer,
    daily_concurrency: usize,
}

impl Coordinator {
    pub fn new(store: Arc<dyn BlobStore>, config: &RecomputeConfig) -> Self {
        Self {
            daily: DailyComputer::new(store.clone()),
            aggregator: MonthlyAggregator::new(store.clone()),
            audience: AudienceReducer::new(store.clone()),
            store,
            daily_concurrency: config.daily_concurrency.max(1),
        }
    }

    /// Run the requested phases in order: dailies, aggregates, audience.
    pub async fn run(&self, request: &RecomputeRequest) -> Result<RecomputeOutcome, RecomputeError> {
        let show = &request.show_uuid;
        let wants_dailies = request.phases.contains(&Phase::Dailies);
        let wants_aggregates = request.phases.contains(&Phase::Aggregates);
        let audience_part = request.phases.iter().find_map(|phase| match phase {
            Phase::Audience { part } => Some(*part),
            _ => None,
        });

        let mut outcome = RecomputeOutcome {
            show_uuid: *show,
            month: request.month.clone(),
            times: BTreeMap::new(),
            days_processed: None,
            aggregate: None,
            audience: None,
        };

        let mut day_keys = Vec::new();
        if wants_dailies || wants_aggregates {
            let started = Instant::now();
            day_keys = self
                .store
                .list(&keys::show_daily_month_prefix(show, &request.month))
                .await?;
            record_step(&mut outcome.times, "listDailies", started, request.log);
        }

        if wants_dailies {
            let started = Instant::now();
            let selected = select_days(&day_keys, request.start_day, request.max_days);

            if request.sequential {
                for day_key in &selected {
                    self.process_day(request, day_key).await?;
                }
            } else {
                let mut days = stream::iter(selected.iter())
                    .map(|day_key| self.process_day(request, day_key))
                    .buffer_unordered(self.daily_concurrency);
                while let Some(result) = days.next().await {
                    result?;
                }
            }

            metrics::counter!("recompute.dailies.processed")
                .increment(selected.len() as u64);
            outcome.days_processed = Some(selected.len());
            record_step(&mut outcome.times, "dailies", started, request.log);
        }

        if wants_aggregates {
            let started = Instant::now();
            let input_keys: Vec<String> = day_keys
                .iter()
                .filter_map(|day_key| keys::date_from_key(day_key))
                .map(|date| keys::summary_key(show, date))
                .collect();
            let aggregate = self
                .aggregator
                .aggregate(show, &input_keys, &request.month)
                .await?;
            outcome.aggregate = Some(AggregatePhaseOutcome {
                summed: aggregate.summed,
                overall_written: aggregate.overall_written,
            });
            record_step(&mut outcome.times, "aggregates", started, request.log);
        }

        if let Some(part) = audience_part {
            let started = Instant::now();
            let audience = self
                .audience
                .recompute_for_month(show, &request.month, part)
                .await?;
            outcome.audience = Some(AudiencePhaseOutcome {
                audience: audience.audience,
                content_length: audience.content_length,
                part: audience.part.map(|part| part.to_string()),
            });
            record_step(&mut outcome.times, "audience", started, request.log);
        }

        Ok(outcome)
    }

    /// Compute one day, then persist its summary and audience in parallel.
    async fn process_day(
        &self,
        request: &RecomputeRequest,
        day_key: &str,
    ) -> Result<(), RecomputeError> {
        let date = keys::date_from_key(day_key)
            .ok_or_else(|| RecomputeError::corrupt(format!("bad daily key {day_key}")))?
            .to_string();
        let computed = self
            .daily
            .compute_from_key(&request.show_uuid, day_key, &date)
            .await?;
        tokio::try_join!(
            self.daily.save_summary(&computed.summary),
            self.daily
                .save_audience(&request.show_uuid, &date, &computed.audience_timestamps),
        )?;
        Ok(())
    }
}

/// Apply the `startDay`/`maxDays` window to the listed daily keys.
fn select_days(day_keys: &[String], start_day: Option<u32>, max_days: Option<u32>) -> Vec<String> {
    if max_days == Some(0) {
        return Vec::new();
    }
    let start = start_day.unwrap_or(1);
    day_keys
        .iter()
        .filter(|day_key| {
            let Some(day) = keys::day_of_month_from_key(day_key) else {
                return false;
            };
            day >= start && max_days.map_or(true, |n| day <= start.saturating_add(n - 1))
        })
        .cloned()
        .collect()
}

fn record_step(times: &mut BTreeMap<String, u64>, step: &str, started: Instant, log: bool) {
    let millis = started.elapsed().as_millis() as u64;
    metrics::histogram!("recompute.step.duration_ms", "step" => step.to_string())
        .record(millis as f64);
    if log {
        info!(step = %step, millis, "Recompute step finished");
    } else {
        debug!(step = %step, millis, "Recompute step finished");
    }
    times.insert(step.to_string(), millis);
}
