//! Ambient context propagation
//!
//! Four independent single-slot carriers live in task-local storage:
//!
//! - [`TestContext`]: the test item currently executing, collecting the
//!   assertion results produced while it is active.
//! - [`AssertionContext`]: the assertion currently being evaluated, collecting
//!   predicate results and metric readings as nested evidence.
//! - [`ResolverContext`]: the consumer a resource is being resolved for.
//! - [`MetricContext`]: metrics that every recorded assertion feeds its pass
//!   flag into.
//!
//! Each carrier is entered with a `with_*` function that publishes a value for
//! the duration of a future (or closure, for the `_sync` variants) and restores
//! the previous value on every exit path, including early returns, panics and
//! cancellation. Storage is per task: a spawned task sees no ambient context
//! until it enters one itself.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::evidence::{AssertionResult, Evidence, MetricReading, PredicateResult};
use crate::metric::Metric;

tokio::task_local! {
    static TEST_CONTEXT: TestContext;
    static ASSERTION_CONTEXT: AssertionContext;
    static RESOLVER_CONTEXT: ResolverContext;
    static METRIC_CONTEXT: MetricContext;
}

// ============================================================================
// Test context
// ============================================================================

/// Descriptive metadata of the test item a [`TestContext`] belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestItem {
    /// Display name of the test
    pub name: String,
    /// Grouping label (class or suite name)
    pub group: Option<String>,
    /// Module path used to locate the test
    pub module_path: String,
    /// Tags attached to the test
    pub tags: Vec<String>,
    /// `name=value` labels for the parameters bound to this run
    pub params: Vec<String>,
    /// Suffix distinguishing this run from its siblings
    pub id_suffix: Option<String>,
}

/// Execution context of one running test item
#[derive(Debug, Clone)]
pub struct TestContext {
    item: Arc<TestItem>,
    case_id: Arc<str>,
    assertions: Arc<Mutex<Vec<AssertionResult>>>,
}

impl TestContext {
    /// Create a context for `item` identified by `case_id`
    pub fn new(item: TestItem, case_id: impl Into<String>) -> Self {
        Self {
            item: Arc::new(item),
            case_id: Arc::from(case_id.into()),
            assertions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The test item metadata
    pub fn item(&self) -> &TestItem {
        &self.item
    }

    /// Name of the running test
    pub fn test_name(&self) -> &str {
        &self.item.name
    }

    /// Identity of the running case, used for CASE-scoped caching and attribution
    pub fn case_id(&self) -> &str {
        &self.case_id
    }

    /// Append an assertion result to this context
    pub fn record_assertion(&self, result: AssertionResult) {
        self.assertions.lock().push(result);
    }

    /// Snapshot of the assertion results recorded so far
    pub fn assertions(&self) -> Vec<AssertionResult> {
        self.assertions.lock().clone()
    }

    /// Drain the recorded assertion results
    pub fn take_assertions(&self) -> Vec<AssertionResult> {
        std::mem::take(&mut *self.assertions.lock())
    }

    /// Whether any recorded assertion failed
    pub fn has_failed_assertion(&self) -> bool {
        self.assertions.lock().iter().any(|a| !a.passed)
    }
}

/// Run `future` with `ctx` published as the current test context
pub async fn with_test_context<F>(ctx: TestContext, future: F) -> F::Output
where
    F: Future,
{
    TEST_CONTEXT.scope(ctx, future).await
}

/// Run `f` with `ctx` published as the current test context
pub fn with_test_context_sync<R>(ctx: TestContext, f: impl FnOnce() -> R) -> R {
    TEST_CONTEXT.sync_scope(ctx, f)
}

/// The current test context, if any
pub fn current_test_context() -> Option<TestContext> {
    TEST_CONTEXT.try_with(Clone::clone).ok()
}

// ============================================================================
// Assertion context
// ============================================================================

/// Evidence collector for the assertion currently being evaluated
#[derive(Debug, Clone, Default)]
pub struct AssertionContext {
    evidence: Arc<Mutex<Evidence>>,
}

impl AssertionContext {
    /// Create an empty assertion context
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a predicate result
    pub fn push_predicate(&self, result: PredicateResult) {
        self.evidence.lock().predicates.push(result);
    }

    /// Attach a metric reading
    pub fn push_metric_reading(&self, reading: MetricReading) {
        self.evidence.lock().metric_readings.push(reading);
    }

    /// Drain the collected evidence
    pub fn take(&self) -> Evidence {
        std::mem::take(&mut *self.evidence.lock())
    }
}

/// Run `future` with `ctx` published as the current assertion context
pub async fn with_assertion_context<F>(ctx: AssertionContext, future: F) -> F::Output
where
    F: Future,
{
    ASSERTION_CONTEXT.scope(ctx, future).await
}

/// Run `f` with `ctx` published as the current assertion context
pub fn with_assertion_context_sync<R>(ctx: AssertionContext, f: impl FnOnce() -> R) -> R {
    ASSERTION_CONTEXT.sync_scope(ctx, f)
}

/// The current assertion context, if any
pub fn current_assertion_context() -> Option<AssertionContext> {
    ASSERTION_CONTEXT.try_with(Clone::clone).ok()
}

// ============================================================================
// Resolver context
// ============================================================================

/// Context for resource resolution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverContext {
    /// Name of the component currently consuming a resource
    pub consumer_name: Option<String>,
}

impl ResolverContext {
    /// Context naming `consumer` as the current resource consumer
    pub fn consumer(consumer: impl Into<String>) -> Self {
        Self {
            consumer_name: Some(consumer.into()),
        }
    }
}

/// Run `future` with `ctx` published as the current resolver context
pub async fn with_resolver_context<F>(ctx: ResolverContext, future: F) -> F::Output
where
    F: Future,
{
    RESOLVER_CONTEXT.scope(ctx, future).await
}

/// Run `f` with `ctx` published as the current resolver context
pub fn with_resolver_context_sync<R>(ctx: ResolverContext, f: impl FnOnce() -> R) -> R {
    RESOLVER_CONTEXT.sync_scope(ctx, f)
}

/// Name of the current resource consumer, if any
pub fn current_consumer() -> Option<String> {
    RESOLVER_CONTEXT
        .try_with(|ctx| ctx.consumer_name.clone())
        .ok()
        .flatten()
}

// ============================================================================
// Metric context
// ============================================================================

/// Metrics fed by every assertion recorded while the context is active
#[derive(Debug, Clone, Default)]
pub struct MetricContext {
    metrics: Arc<[Arc<Metric>]>,
}

impl MetricContext {
    /// Create a context over `metrics`
    pub fn new(metrics: Vec<Arc<Metric>>) -> Self {
        Self {
            metrics: metrics.into(),
        }
    }

    /// The attached metrics
    pub fn metrics(&self) -> &[Arc<Metric>] {
        &self.metrics
    }
}

/// Run `future` with `metrics` attached to every assertion it records
pub async fn with_metrics<F>(metrics: Vec<Arc<Metric>>, future: F) -> F::Output
where
    F: Future,
{
    METRIC_CONTEXT.scope(MetricContext::new(metrics), future).await
}

/// Run `f` with `metrics` attached to every assertion it records
pub fn with_metrics_sync<R>(metrics: Vec<Arc<Metric>>, f: impl FnOnce() -> R) -> R {
    METRIC_CONTEXT.sync_scope(MetricContext::new(metrics), f)
}

/// The metrics currently attached to recorded assertions
pub fn current_metrics() -> Vec<Arc<Metric>> {
    METRIC_CONTEXT
        .try_with(|ctx| ctx.metrics().to_vec())
        .unwrap_or_default()
}
