//! Verity Store - sinks for completed runs
//!
//! A [`RunStore`] receives a finished [`VerityRun`] and answers lookups over
//! it: runs by id, the most recent runs, and the assertions and predicate
//! results recorded anywhere in a run's execution tree.
//!
//! Two implementations are provided:
//!
//! - [`MemoryRunStore`]: in-process, for tests and short-lived hosts
//! - [`JsonlRunStore`]: one JSON document per line, append-only, reloaded on open

#![forbid(unsafe_code)]

mod index;
mod jsonl;
mod memory;

pub use jsonl::JsonlRunStore;
pub use memory::MemoryRunStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use verity_core::{
    AssertionId, AssertionResult, ExecutionId, MetricSnapshot, PredicateResult, Result, RunId,
};
use verity_engine::{StatusCounts, VerityRun};

/// Listing entry for a stored run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run id
    pub run_id: RunId,
    /// Start time
    pub start_time: DateTime<Utc>,
    /// End time
    pub end_time: DateTime<Utc>,
    /// Wall time in milliseconds
    pub total_duration_ms: f64,
    /// Whether maxfail stopped the run early
    pub stopped_early: bool,
    /// Status breakdown over top-level executions
    pub counts: StatusCounts,
}

impl From<&VerityRun> for RunSummary {
    fn from(run: &VerityRun) -> Self {
        Self {
            run_id: run.run_id,
            start_time: run.start_time,
            end_time: run.end_time,
            total_duration_ms: run.result.total_duration_ms,
            stopped_early: run.result.stopped_early,
            counts: run.result.counts,
        }
    }
}

/// Sink for completed runs
///
/// Saving a run whose id is already stored replaces the earlier copy.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Persist a completed run
    async fn save_run(&self, run: &VerityRun) -> Result<()>;

    /// Stored run with `run_id`
    async fn get_run(&self, run_id: RunId) -> Result<Option<VerityRun>>;

    /// Up to `limit` runs, most recent start time first
    async fn list_runs(&self, limit: usize) -> Result<Vec<RunSummary>>;

    /// Assertions recorded by the execution with `execution_id`
    async fn assertions_for_execution(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Vec<AssertionResult>>;

    /// Predicate results nested under the assertion with `assertion_id`
    async fn predicates_for_assertion(
        &self,
        assertion_id: AssertionId,
    ) -> Result<Vec<PredicateResult>>;

    /// Metric snapshots taken at the end of the run
    async fn metrics_for_run(&self, run_id: RunId) -> Result<Vec<MetricSnapshot>>;
}
