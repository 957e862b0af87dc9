//! Run progress reporting

use async_trait::async_trait;
use tracing::{info, warn};

use verity_core::{TestExecution, TestStatus};

use super::VerityRun;

/// Receives run lifecycle callbacks
///
/// All methods default to no-ops. Run-level pass/fail policy, including how
/// XFAILED and XPASSED count, is the reporter's decision.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Definitions were collected and are about to run
    async fn on_collection_complete(&self, _count: usize) {}

    /// A top-level execution finished
    async fn on_test_complete(&self, _execution: &TestExecution) {}

    /// The run finished
    async fn on_run_complete(&self, _run: &VerityRun) {}

    /// maxfail was reached and remaining definitions were not started
    async fn on_run_stopped_early(&self, _failures: usize) {}
}

/// Reporter writing progress through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

#[async_trait]
impl Reporter for LogReporter {
    async fn on_collection_complete(&self, count: usize) {
        info!(count, "collected tests");
    }

    async fn on_test_complete(&self, execution: &TestExecution) {
        let status = execution.status();
        let message = execution.result.error.as_ref().map(|e| e.message.as_str());
        match status {
            TestStatus::Failed | TestStatus::Error => {
                warn!(test = %execution.full_name, %status, error = ?message, "test finished");
            }
            _ => info!(
                test = %execution.full_name,
                %status,
                duration_ms = execution.result.duration_ms,
                "test finished"
            ),
        }
    }

    async fn on_run_complete(&self, run: &VerityRun) {
        let counts = run.result.counts;
        info!(
            run_id = %run.run_id,
            passed = counts.passed,
            failed = counts.failed,
            errors = counts.errors,
            skipped = counts.skipped,
            xfailed = counts.xfailed,
            xpassed = counts.xpassed,
            total = counts.total,
            duration_ms = run.result.total_duration_ms,
            "run complete"
        );
    }

    async fn on_run_stopped_early(&self, failures: usize) {
        warn!(failures, "maxfail reached, stopping run");
    }
}
