//! Verity Core - data model of the evaluation framework
//!
//! This crate holds everything a test body or a storage sink needs to see,
//! with no execution machinery:
//!
//! - ambient, task-local contexts (`context`) that let deeply nested code
//!   attribute evidence to the running test without threading parameters
//! - the [`Metric`] statistics accumulator
//! - assertion and predicate evidence (`evidence`), including the `check!`
//!   and `ensure!` macros
//! - outcome signals (`outcome`) returned by test bodies
//! - definitions, modifiers and results of the execution tree
//!
//! Execution, resource resolution and the run loop live in `verity-engine`.

#![forbid(unsafe_code)]

/// Ambient task-local context carriers
pub mod context;

/// Test definitions, bodies and modifiers
pub mod definition;

/// Unified error handling
pub mod errors;

/// Assertion and predicate evidence
pub mod evidence;

/// Run, execution and assertion identifiers
pub mod identifiers;

/// Statistical metric accumulator
pub mod metric;

/// Outcome signals returned by test bodies
pub mod outcome;

/// Execution results
pub mod result;

/// Resource lifetime scopes
pub mod scope;

pub use context::{
    current_assertion_context, current_consumer, current_metrics, current_test_context,
    with_assertion_context, with_metrics, with_resolver_context, with_test_context,
    AssertionContext, ResolverContext, TestContext, TestItem,
};
pub use definition::{
    Args, Instance, Modifier, ParameterSet, TestBody, TestDefinition, XfailMarker,
};
pub use errors::{Result, VerityError};
pub use evidence::{
    assert_that, check, run_predicate, AssertionResult, Evidence, MetricReading, Predicate,
    PredicateResult, PredicateValue, PredicateVerdict,
};
pub use identifiers::{AssertionId, ExecutionId, RunId};
pub use metric::{ConfidenceLevel, Counter, Metric, MetricMetadata, MetricSnapshot, MetricValue};
pub use outcome::{fail, skip, xfail, BodyResult, Interrupt};
pub use result::{ErrorInfo, TestExecution, TestResult, TestStatus};
pub use scope::Scope;

/// Common imports for test authors
pub mod prelude {
    pub use crate::context::{with_metrics, with_test_context};
    pub use crate::definition::{Args, ParameterSet, TestBody, TestDefinition};
    pub use crate::evidence::{assert_that, run_predicate, Predicate, PredicateVerdict};
    pub use crate::metric::{ConfidenceLevel, Metric};
    pub use crate::outcome::{fail, skip, xfail, BodyResult, Interrupt};
    pub use crate::scope::Scope;
    // both the `check` function and the `check!` macro
    pub use crate::{check, ensure};
}
