//! Run output model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use verity_core::{MetricSnapshot, RunId, TestExecution, TestStatus};

use super::RunEnvironment;

/// Status breakdown over top-level executions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// PASSED
    pub passed: usize,
    /// FAILED
    pub failed: usize,
    /// ERROR
    pub errors: usize,
    /// SKIPPED
    pub skipped: usize,
    /// XFAILED
    pub xfailed: usize,
    /// XPASSED
    pub xpassed: usize,
    /// All executions
    pub total: usize,
}

impl StatusCounts {
    /// Count the statuses of `executions`
    pub fn from_executions(executions: &[TestExecution]) -> Self {
        let mut counts = Self::default();
        for execution in executions {
            counts.add(execution.status());
        }
        counts
    }

    /// Count one status
    pub fn add(&mut self, status: TestStatus) {
        self.total += 1;
        match status {
            TestStatus::Passed => self.passed += 1,
            TestStatus::Failed => self.failed += 1,
            TestStatus::Error => self.errors += 1,
            TestStatus::Skipped => self.skipped += 1,
            TestStatus::Xfailed => self.xfailed += 1,
            TestStatus::Xpassed => self.xpassed += 1,
        }
    }

    /// FAILED plus ERROR
    pub fn failures(&self) -> usize {
        self.failed + self.errors
    }
}

/// Aggregated outcome of every executed definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunResult {
    /// Top-level executions in input order
    pub executions: Vec<TestExecution>,
    /// Wall time of the run in milliseconds
    pub total_duration_ms: f64,
    /// Whether maxfail stopped the run before every definition executed
    pub stopped_early: bool,
    /// Status breakdown
    pub counts: StatusCounts,
}

impl RunResult {
    /// Result over `executions`
    pub fn new(
        executions: Vec<TestExecution>,
        total_duration_ms: f64,
        stopped_early: bool,
    ) -> Self {
        let counts = StatusCounts::from_executions(&executions);
        Self {
            executions,
            total_duration_ms,
            stopped_early,
            counts,
        }
    }
}

/// One complete run, as handed to storage sinks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerityRun {
    /// Run id
    pub run_id: RunId,
    /// Start time
    pub start_time: DateTime<Utc>,
    /// End time
    pub end_time: DateTime<Utc>,
    /// Environment snapshot
    pub environment: RunEnvironment,
    /// Execution results
    pub result: RunResult,
    /// Snapshots of every metric built during the run
    pub metrics: Vec<MetricSnapshot>,
}
