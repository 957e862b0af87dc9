//! Repetition of a definition

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use verity_core::{
    ErrorInfo, ExecutionId, Modifier, Result, TestDefinition, TestExecution, TestResult,
    TestStatus,
};

use super::{
    run_children, total_duration, DefaultTestFactory, Executable, ExecutionState, StateCell,
};
use crate::resolver::ResourceResolver;

/// Runs `count` copies of a definition and passes when at least `min_passes`
/// of them pass
pub struct RepeatedExecutable {
    id: ExecutionId,
    definition: Arc<TestDefinition>,
    count: usize,
    min_passes: usize,
    children: Vec<Arc<dyn Executable>>,
    state: StateCell,
}

impl RepeatedExecutable {
    /// Validate the repeat parameters and build one child per repetition from
    /// the remaining modifier chain
    pub fn new(
        definition: Arc<TestDefinition>,
        count: usize,
        min_passes: usize,
        factory: &DefaultTestFactory,
    ) -> Result<Self> {
        Modifier::Repeat { count, min_passes }.validate()?;
        let children = (0..count)
            .map(|index| {
                let suffix = format!("repeat={index}");
                let child = definition.derive_child(suffix, &BTreeMap::new());
                factory.build(Arc::new(child))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            id: ExecutionId::new(),
            definition,
            count,
            min_passes,
            children,
            state: StateCell::new(),
        })
    }

    /// Child executables in repetition order
    pub fn children(&self) -> &[Arc<dyn Executable>] {
        &self.children
    }
}

#[async_trait]
impl Executable for RepeatedExecutable {
    fn execution_id(&self) -> ExecutionId {
        self.id
    }

    fn definition(&self) -> &Arc<TestDefinition> {
        &self.definition
    }

    fn state(&self) -> ExecutionState {
        self.state.get()
    }

    async fn execute(&self, resolver: Arc<ResourceResolver>) -> Result<TestExecution> {
        self.state.begin(self.id)?;
        let children = run_children(&self.children, &resolver).await;

        let passed = children
            .iter()
            .filter(|c| c.status() == TestStatus::Passed)
            .count();
        let mut result = TestResult::new(
            if passed >= self.min_passes {
                TestStatus::Passed
            } else {
                TestStatus::Failed
            },
            total_duration(&children),
        );
        if result.status == TestStatus::Failed {
            result.error = Some(ErrorInfo::new(
                "repeat",
                format!(
                    "{passed}/{} repetitions passed, {} required",
                    self.count, self.min_passes
                ),
            ));
        }
        info!(
            test = %self.definition.full_name(),
            passed,
            count = self.count,
            min_passes = self.min_passes,
            status = %result.status,
            "repetitions aggregated"
        );

        self.state.complete(result.clone());
        let mut execution = TestExecution::new(self.id, self.definition.clone(), result);
        execution.children = children;
        Ok(execution)
    }
}
