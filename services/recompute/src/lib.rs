//! Podstats Recompute Service
//!
//! Show-summary recomputation engine for the podstats podcast analytics
//! platform. For one show and calendar month it derives daily and monthly
//! download summaries, cross-dimensional breakdowns (country, region,
//! device, agent, referrer, tag), per-episode first-download markers, and a
//! distinct-audience roll-up. Raw per-day download records are read from the
//! object store and every derived summary is written back to it; there is no
//! other persistent state.
//!
//! ## Pipeline
//!
//! ```text
//!  Object store                 Recompute phases            Object store
//! ┌───────────────┐            ┌──────────────┐           ┌──────────────────┐
//! │ show-daily/   │──stream───▶│ Daily        │──────────▶│ summaries/       │
//! │   {show}/     │            │ computer     │           │ audiences/ (day) │
//! └───────────────┘            └──────┬───────┘           └──────────────────┘
//!                                     │ per day, parallel
//!                              ┌──────▼───────┐           ┌──────────────────┐
//!                              │ Monthly      │──────────▶│ summaries/ month │
//!                              │ aggregator   │           │ + overall merge  │
//!                              └──────┬───────┘           └──────────────────┘
//!                                     │
//!                              ┌──────▼───────┐           ┌──────────────────┐
//!                              │ Audience     │──────────▶│ audiences/ month │
//!                              │ reducer      │           │ audience-summaries│
//!                              └──────────────┘           └──────────────────┘
//! ```
//!
//! Every run is idempotent: daily and monthly summaries are rewritten in
//! full from their inputs, and the overall summary only mutates on monotone
//! change, so partial completion is always safe to re-run.

pub mod accumulator;
pub mod aggregate;
pub mod audience;
pub mod blob_store;
pub mod config;
pub mod coordinator;
pub mod daily;
pub mod error;
pub mod keys;
pub mod memory_store;
pub mod summary;
pub mod tsv;

pub use aggregate::{AggregateOutcome, MonthlyAggregator};
pub use audience::{AudienceOutcome, AudienceReducer};
pub use blob_store::{BlobStore, BlobStream, PutBody, PutResult, S3BlobStore, StorageError};
pub use config::Config;
pub use coordinator::{Coordinator, JobRequest, Phase, RecomputeOutcome, RecomputeRequest};
pub use daily::{DailyComputation, DailyComputer};
pub use error::RecomputeError;
pub use memory_store::MemoryBlobStore;
pub use summary::{AudiencePart, AudienceSummary, EpisodeSummary, ShowSummary};
pub use tsv::{TsvReader, TsvRecord};
