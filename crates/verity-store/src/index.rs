//! Lookup tables shared by the store implementations

use std::collections::HashMap;

use verity_core::{AssertionId, AssertionResult, ExecutionId, PredicateResult, RunId};
use verity_engine::VerityRun;

use crate::RunSummary;

/// Runs plus the assertion and predicate lookups derived from them
#[derive(Debug, Default)]
pub(crate) struct RunIndex {
    runs: HashMap<RunId, VerityRun>,
    assertions: HashMap<ExecutionId, Vec<AssertionResult>>,
    predicates: HashMap<AssertionId, Vec<PredicateResult>>,
}

impl RunIndex {
    /// Index `run`, replacing any run stored under the same id
    pub(crate) fn insert(&mut self, run: VerityRun) {
        if let Some(previous) = self.runs.remove(&run.run_id) {
            self.forget(&previous);
        }
        for root in &run.result.executions {
            for node in root.walk() {
                if node.result.assertions.is_empty() {
                    continue;
                }
                for assertion in &node.result.assertions {
                    if !assertion.predicate_results.is_empty() {
                        self.predicates
                            .insert(assertion.assertion_id, assertion.predicate_results.clone());
                    }
                }
                self.assertions
                    .insert(node.execution_id, node.result.assertions.clone());
            }
        }
        self.runs.insert(run.run_id, run);
    }

    fn forget(&mut self, run: &VerityRun) {
        for root in &run.result.executions {
            for node in root.walk() {
                self.assertions.remove(&node.execution_id);
                for assertion in &node.result.assertions {
                    self.predicates.remove(&assertion.assertion_id);
                }
            }
        }
    }

    pub(crate) fn get(&self, run_id: RunId) -> Option<&VerityRun> {
        self.runs.get(&run_id)
    }

    pub(crate) fn recent(&self, limit: usize) -> Vec<RunSummary> {
        let mut runs: Vec<&VerityRun> = self.runs.values().collect();
        runs.sort_by(|a, b| {
            b.start_time
                .cmp(&a.start_time)
                .then_with(|| b.run_id.cmp(&a.run_id))
        });
        runs.into_iter().take(limit).map(RunSummary::from).collect()
    }

    pub(crate) fn assertions(&self, execution_id: ExecutionId) -> Vec<AssertionResult> {
        self.assertions
            .get(&execution_id)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn predicates(&self, assertion_id: AssertionId) -> Vec<PredicateResult> {
        self.predicates
            .get(&assertion_id)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn len(&self) -> usize {
        self.runs.len()
    }
}
