//! Parametrized expansion of a definition

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use verity_core::{
    ErrorInfo, ExecutionId, Modifier, ParameterSet, Result, TestDefinition, TestExecution,
    TestResult, TestStatus,
};

use super::{
    run_children, total_duration, DefaultTestFactory, Executable, ExecutionState, StateCell,
};
use crate::resolver::ResourceResolver;

/// Runs one child per parameter set; fails when any child fails or errors
pub struct ParametrizedExecutable {
    id: ExecutionId,
    definition: Arc<TestDefinition>,
    children: Vec<Arc<dyn Executable>>,
    state: StateCell,
}

impl ParametrizedExecutable {
    /// Build one child per parameter set from the remaining modifier chain
    pub fn new(
        definition: Arc<TestDefinition>,
        parameter_sets: &[ParameterSet],
        factory: &DefaultTestFactory,
    ) -> Result<Self> {
        Modifier::Parametrize {
            parameter_sets: parameter_sets.to_vec(),
        }
        .validate()?;
        let children = parameter_sets
            .iter()
            .map(|set| {
                let child = definition.derive_child(set.id_suffix.clone(), &set.values);
                factory.build(Arc::new(child))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            id: ExecutionId::new(),
            definition,
            children,
            state: StateCell::new(),
        })
    }

    /// Child executables in parameter-set order
    pub fn children(&self) -> &[Arc<dyn Executable>] {
        &self.children
    }
}

#[async_trait]
impl Executable for ParametrizedExecutable {
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

        let failed = children.iter().filter(|c| c.status().is_failure()).count();
        let mut result = TestResult::new(
            if failed > 0 {
                TestStatus::Failed
            } else {
                TestStatus::Passed
            },
            total_duration(&children),
        );
        if failed > 0 {
            result.error = Some(ErrorInfo::new(
                "parametrize",
                format!("{failed} of {} parameter sets failed", children.len()),
            ));
        }
        info!(
            test = %self.definition.full_name(),
            sets = children.len(),
            failed,
            status = %result.status,
            "parameter sets aggregated"
        );

        self.state.complete(result.clone());
        let mut execution = TestExecution::new(self.id, self.definition.clone(), result);
        execution.children = children;
        Ok(execution)
    }
}
