//! Execution tree
//!
//! [`DefaultTestFactory`] turns a definition into an [`Executable`]:
//!
//! - no modifiers: [`SingleExecutable`] runs the body once
//! - leading `Repeat`: [`RepeatedExecutable`] with one child per repetition
//! - leading `Parametrize`: [`ParametrizedExecutable`] with one child per set
//!
//! Children are built from the remaining modifier chain, so modifiers nest.
//! Each child runs in its own task; results are collected in construction
//! order regardless of completion order.

mod factory;
mod invoker;
mod parametrized;
mod repeated;
mod single;
mod tracer;

pub use factory::{DefaultTestFactory, TestFactory};
pub use invoker::{DefaultInvoker, TestInvoker};
pub use parametrized::ParametrizedExecutable;
pub use repeated::RepeatedExecutable;
pub use single::SingleExecutable;
pub use tracer::TestTracer;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinSet;

use verity_core::{
    ErrorInfo, ExecutionId, Result, TestDefinition, TestExecution, TestResult, TestStatus,
    VerityError,
};

use crate::resolver::ResourceResolver;

/// Lifecycle of an executable
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionState {
    /// Built, not yet executed
    NotStarted,
    /// Executing
    Running,
    /// Finished with a result
    Complete(TestResult),
}

/// A runnable node of the execution tree
#[async_trait]
pub trait Executable: Send + Sync {
    /// Id assigned at construction
    fn execution_id(&self) -> ExecutionId;

    /// Definition this node was built from
    fn definition(&self) -> &Arc<TestDefinition>;

    /// Current lifecycle state
    fn state(&self) -> ExecutionState;

    /// Run to completion; an executable runs at most once
    async fn execute(&self, resolver: Arc<ResourceResolver>) -> Result<TestExecution>;
}

/// `NOT_STARTED -> RUNNING -> COMPLETE` transitions shared by all variants
#[derive(Debug)]
pub(crate) struct StateCell(Mutex<ExecutionState>);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(Mutex::new(ExecutionState::NotStarted))
    }

    pub(crate) fn get(&self) -> ExecutionState {
        self.0.lock().clone()
    }

    pub(crate) fn begin(&self, id: ExecutionId) -> Result<()> {
        let mut state = self.0.lock();
        match *state {
            ExecutionState::NotStarted => {
                *state = ExecutionState::Running;
                Ok(())
            }
            _ => Err(VerityError::invalid_state(format!(
                "execution {id} has already been started"
            ))),
        }
    }

    pub(crate) fn complete(&self, result: TestResult) {
        *self.0.lock() = ExecutionState::Complete(result);
    }
}

/// Execute `children` concurrently and return their executions in input order
///
/// A child that panics or refuses to run is reported as an ERROR execution so
/// the parent always sees one result per child. Dropping the returned future
/// aborts children still in flight.
pub(crate) async fn run_children(
    children: &[Arc<dyn Executable>],
    resolver: &Arc<ResourceResolver>,
) -> Vec<TestExecution> {
    let mut set = JoinSet::new();
    for (index, child) in children.iter().enumerate() {
        let child = child.clone();
        let resolver = resolver.clone();
        set.spawn(async move { (index, child.execute(resolver).await) });
    }

    let mut slots: Vec<Option<TestExecution>> = vec![None; children.len()];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, Ok(execution))) => slots[index] = Some(execution),
            Ok((index, Err(err))) => {
                slots[index] = Some(error_execution(&children[index], ErrorInfo::from(&err)));
            }
            Err(join_err) => {
                tracing::warn!(error = %join_err, "child execution task failed");
            }
        }
    }

    slots
        .into_iter()
        .zip(children)
        .map(|(slot, child)| {
            slot.unwrap_or_else(|| {
                error_execution(child, ErrorInfo::new("panic", "child task terminated abnormally"))
            })
        })
        .collect()
}

fn error_execution(child: &Arc<dyn Executable>, error: ErrorInfo) -> TestExecution {
    TestExecution::new(
        child.execution_id(),
        child.definition().clone(),
        TestResult::new(TestStatus::Error, 0.0).with_error(error),
    )
}

/// Sum of child durations
pub(crate) fn total_duration(children: &[TestExecution]) -> f64 {
    children.iter().map(|c| c.result.duration_ms).sum()
}
