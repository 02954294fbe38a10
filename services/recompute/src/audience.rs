//! Audience reducer: month-scoped distinct audience-id computation.
//!
//! Streams every daily audience file of the month, optionally keeping only
//! the ids whose first hex digit falls in the configured shard, and writes
//! two blobs in parallel: a fixed-length data blob of distinct ids in
//! first-insertion order, and a JSON summary of per-day found-line counts.
//! Only the data blob write is retried, and only for transient faults.
//!
//! `daily_found_audience` counts accepted lines (duplicates included);
//! `audience` counts distinct ids. The asymmetry is intentional: lines
//! found per day versus distinct ids found in the month.

use crate::accumulator;
use crate::blob_store::{BlobStore, PutBody, PutResult};
use crate::error::RecomputeError;
use crate::keys;
use crate::summary::{AudiencePart, AudienceSummary};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Bytes per audience line: 64-hex id, tab, 15-digit timestamp, newline.
pub const AUDIENCE_LINE_LEN: u64 = 64 + 1 + 15 + 1;

/// Retries for the monthly data blob write, on top of the first attempt.
const MAX_BLOB_PUT_RETRIES: u32 = 2;

/// Outcome of one monthly audience reduction.
#[derive(Debug, Clone)]
pub struct AudienceOutcome {
    /// Distinct audience ids within the (month, part).
    pub audience: u64,
    /// Exact byte length of the written data blob.
    pub content_length: u64,
    pub part: Option<AudiencePart>,
}

pub struct AudienceReducer {
    store: Arc<dyn BlobStore>,
}

impl AudienceReducer {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Reduce the month's daily audience files into the monthly blob and
    /// summary for the given shard (or the whole id space when unsharded).
    pub async fn recompute_for_month(
        &self,
        show: &Uuid,
        month: &str,
        part: Option<AudiencePart>,
    ) -> Result<AudienceOutcome, RecomputeError> {
        if let Some(part) = part {
            validate_part(part)?;
        }

        let prefix = keys::audience_month_prefix(show, month);
        let day_keys = self.store.list(&prefix).await?;

        let mut daily_found_audience: BTreeMap<String, u64> = BTreeMap::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut distinct: Vec<(String, String)> = Vec::new();

        for day_key in &day_keys {
            let date = keys::date_from_key(day_key)
                .ok_or_else(|| RecomputeError::corrupt(format!("bad audience key {day_key}")))?
                .to_string();
            let Some(stream) = self.store.get_stream(day_key).await? else {
                debug!(key = %day_key, "Daily audience blob absent, skipping");
                continue;
            };

            let mut reader = stream.reader;
            let mut line = String::new();
            loop {
                line.clear();
                let read = reader.read_line(&mut line).await.map_err(|e| {
                    RecomputeError::corrupt(format!("{day_key}: line read failed: {e}"))
                })?;
                if read == 0 {
                    break;
                }
                let trimmed = line.trim_end_matches('\n').trim_end_matches('\r');
                if trimmed.is_empty() {
                    continue;
                }
                if trimmed.len() < 80 || !trimmed.is_ascii() {
                    return Err(RecomputeError::corrupt(format!(
                        "{day_key}: malformed audience line"
                    )));
                }

                if let Some(part) = part {
                    let first_hex = trimmed.as_bytes()[0];
                    if line_part_num(first_hex, part.num_parts) != part.part_num {
                        continue;
                    }
                }

                // Every accepted line counts, duplicates included.
                accumulator::increment(&mut daily_found_audience, date.clone());

                let audience_id = &trimmed[..64];
                let timestamp = &trimmed[65..80];
                if seen.insert(audience_id.to_string()) {
                    distinct.push((audience_id.to_string(), timestamp.to_string()));
                }
            }
        }

        let audience = distinct.len() as u64;
        let content_length = AUDIENCE_LINE_LEN * audience;

        let mut body = String::with_capacity(content_length as usize);
        for (audience_id, timestamp) in &distinct {
            body.push_str(audience_id);
            body.push('\t');
            body.push_str(timestamp);
            body.push('\n');
        }

        let blob_key = keys::audience_month_key(show, month, part);
        let summary_key = keys::audience_summary_key(show, month, part);
        let summary = AudienceSummary {
            show_uuid: *show,
            period: month.to_string(),
            part: part.map(|part| part.to_string()),
            daily_found_audience,
        };
        let summary_json = serde_json::to_string(&summary)
            .map_err(|e| RecomputeError::corrupt(format!("{summary_key}: serialize failed: {e}")))?;

        tokio::try_join!(
            self.put_blob_with_retry(&blob_key, body.as_bytes(), content_length),
            async {
                self.store
                    .put(&summary_key, PutBody::Text(summary_json))
                    .await
                    .map_err(RecomputeError::from)
            },
        )?;

        metrics::counter!("recompute.audience.distinct_ids").increment(audience);
        debug!(
            show = %show,
            month = %month,
            part = %part.map(|p| p.to_string()).unwrap_or_else(|| "all".into()),
            audience,
            content_length,
            "Wrote monthly audience"
        );

        Ok(AudienceOutcome {
            audience,
            content_length,
            part,
        })
    }

    /// Fixed-length data blob write with a bounded retry on transient faults.
    async fn put_blob_with_retry(
        &self,
        key: &str,
        body: &[u8],
        content_length: u64,
    ) -> Result<PutResult, RecomputeError> {
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(2),
            max_elapsed_time: None,
            ..Default::default()
        };
        let mut attempts = 0u32;

        loop {
            let put_body = PutBody::Stream {
                reader: Box::new(Cursor::new(body.to_vec())),
                content_length,
            };
            match self.store.put(key, put_body).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempts < MAX_BLOB_PUT_RETRIES => {
                    attempts += 1;
                    metrics::counter!("recompute.audience.put_retries").increment(1);
                    let delay = backoff.next_backoff().unwrap_or_default();
                    warn!(
                        key = %key,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying audience blob write"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

pub(crate) fn validate_part(part: AudiencePart) -> Result<(), RecomputeError> {
    if !matches!(part.num_parts, 4 | 8) {
        return Err(RecomputeError::invalid(format!(
            "unsupported audience part count {}",
            part.num_parts
        )));
    }
    if part.part_num < 1 || part.part_num > part.num_parts {
        return Err(RecomputeError::invalid(format!(
            "audience part {} out of range 1..={}",
            part.part_num, part.num_parts
        )));
    }
    Ok(())
}

/// Shard of a line by the first hex digit of its audience id.
fn line_part_num(first_hex: u8, num_parts: u32) -> u32 {
    match num_parts {
        4 => match first_hex {
            b if b < b'4' => 1,
            b if b < b'8' => 2,
            b if b < b'c' => 3,
            _ => 4,
        },
        8 => match first_hex {
            b if b < b'2' => 1,
            b if b < b'4' => 2,
            b if b < b'6' => 3,
            b if b < b'8' => 4,
            b if b < b'a' => 5,
            b if b < b'c' => 6,
            b if b < b'e' => 7,
            _ => 8,
        },
        // Unreachable behind validate_part.
        _ => 0,
    }
}
