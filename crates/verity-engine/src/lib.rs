//! Verity Engine - resource resolution and test execution
//!
//! - [`resolver`]: scoped, caching dependency injection for named resources
//! - [`execution`]: the execution tree built from a definition's modifiers
//! - [`runner`]: the run loop with bounded concurrency, timeouts and maxfail
//! - [`logging`]: optional default subscriber setup

#![forbid(unsafe_code)]

pub mod execution;
pub mod logging;
pub mod resolver;
pub mod runner;

pub use execution::{
    DefaultInvoker, DefaultTestFactory, Executable, ExecutionState, ParametrizedExecutable,
    RepeatedExecutable, SingleExecutable, TestFactory, TestInvoker, TestTracer,
};
pub use resolver::{ResourceDef, ResourceRegistry, ResourceResolver};
pub use runner::{
    LogReporter, Reporter, RunEnvironment, RunResult, Runner, RunnerConfig, StatusCounts,
    VerityRun,
};

/// Common imports for hosts driving runs
pub mod prelude {
    pub use crate::execution::{DefaultTestFactory, Executable};
    pub use crate::resolver::{ResourceDef, ResourceRegistry, ResourceResolver};
    pub use crate::runner::{LogReporter, Reporter, Runner, RunnerConfig, VerityRun};
    pub use verity_core::prelude::*;
}
