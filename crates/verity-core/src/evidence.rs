//! Assertion and predicate evidence
//!
//! Assertions are recorded into the active [`TestContext`](crate::context::TestContext).
//! Predicates and metric reads performed while an assertion is being evaluated
//! are attached to that assertion as nested evidence.

use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::{
    current_assertion_context, current_metrics, current_test_context, with_assertion_context,
    AssertionContext,
};
use crate::errors::Result;
use crate::identifiers::AssertionId;
use crate::metric::{nan_as_null, non_finite};

/// A statistic read from a metric during an assertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReading {
    /// Name of the metric that was read
    pub metric_name: String,
    /// Statistic name, e.g. `mean` or `p95`
    pub statistic: String,
    /// Value returned to the caller
    #[serde(with = "nan_as_null")]
    pub value: f64,
    /// Case active when the statistic was read
    pub case_id: Option<String>,
}

/// Verdict of a predicate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateValue {
    /// Binary verdict
    Bool(bool),
    /// Graded verdict
    Score(#[serde(with = "non_finite")] f64),
}

impl PredicateValue {
    /// Whether the verdict counts as passing; scores pass at 0.5 and above
    pub fn is_pass(&self) -> bool {
        match *self {
            PredicateValue::Bool(b) => b,
            PredicateValue::Score(s) => s >= 0.5,
        }
    }
}

/// Output of [`Predicate::evaluate`] before attribution is filled in
#[derive(Debug, Clone, PartialEq)]
pub struct PredicateVerdict {
    /// Verdict
    pub value: PredicateValue,
    /// Confidence in the verdict in `[0, 1]`
    pub confidence: f64,
    /// Optional explanation
    pub message: Option<String>,
}

impl PredicateVerdict {
    /// Fully confident binary verdict
    pub fn bool(value: bool) -> Self {
        Self {
            value: PredicateValue::Bool(value),
            confidence: 1.0,
            message: None,
        }
    }

    /// Graded verdict with a confidence
    pub fn score(value: f64, confidence: f64) -> Self {
        Self {
            value: PredicateValue::Score(value),
            confidence,
            message: None,
        }
    }

    /// Attach an explanation
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// One predicate check with its attribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredicateResult {
    /// Name of the predicate that produced this result
    pub predicate_name: String,
    /// Input being checked
    pub actual: String,
    /// Reference the input was checked against
    pub reference: String,
    /// Verdict
    pub value: PredicateValue,
    /// Confidence in the verdict
    #[serde(with = "non_finite")]
    pub confidence: f64,
    /// Optional explanation
    pub message: Option<String>,
    /// Test active when the predicate ran
    pub test_name: Option<String>,
    /// Case active when the predicate ran
    pub case_id: Option<String>,
}

/// Nested evidence collected under an assertion context
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Predicate results
    pub predicates: Vec<PredicateResult>,
    /// Metric statistics read
    pub metric_readings: Vec<MetricReading>,
}

/// Structured outcome of one assertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionResult {
    /// Unique id of this assertion
    pub assertion_id: AssertionId,
    /// Source text of the checked expression
    pub expression: String,
    /// Whether the assertion held
    pub passed: bool,
    /// Failure explanation
    pub error_message: Option<String>,
    /// Predicates evaluated while the assertion was active
    pub predicate_results: Vec<PredicateResult>,
    /// Metric statistics read while the assertion was active
    pub metric_readings: Vec<MetricReading>,
}

impl AssertionResult {
    /// Result without nested evidence
    pub fn new(expression: impl Into<String>, passed: bool) -> Self {
        Self {
            assertion_id: AssertionId::new(),
            expression: expression.into(),
            passed,
            error_message: None,
            predicate_results: Vec::new(),
            metric_readings: Vec::new(),
        }
    }

    /// Attach a failure explanation
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Attach collected evidence
    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.predicate_results = evidence.predicates;
        self.metric_readings = evidence.metric_readings;
        self
    }

    /// Publish this result: append it to the active test context (no-op when
    /// none is active) and feed its pass flag to the attached metrics
    pub fn record(self) -> Self {
        for metric in current_metrics() {
            metric.add_record(self.passed);
        }
        if let Some(ctx) = current_test_context() {
            ctx.record_assertion(self.clone());
        } else {
            tracing::trace!(expression = %self.expression, "assertion outside test context");
        }
        self
    }
}

/// Record a ready-made boolean check
pub fn check(passed: bool, expression: impl Into<String>) -> AssertionResult {
    let result = AssertionResult::new(expression, passed);
    let result = if passed {
        result
    } else {
        let message = format!("assertion failed: {}", result.expression);
        result.with_error(message)
    };
    result.record()
}

/// Evaluate `verdict` inside a fresh assertion context and record the result
/// together with every predicate and metric reading produced meanwhile
pub async fn assert_that<F>(expression: impl Into<String>, verdict: F) -> AssertionResult
where
    F: Future<Output = bool>,
{
    let expression = expression.into();
    let ctx = AssertionContext::new();
    let passed = with_assertion_context(ctx.clone(), verdict).await;
    let mut result = AssertionResult::new(expression, passed).with_evidence(ctx.take());
    if !passed {
        result.error_message = Some(format!("assertion failed: {}", result.expression));
    }
    result.record()
}

/// A single check comparing an actual value against a reference
///
/// Implementations range from exact string comparison to model-backed
/// judgements; the framework only sees the verdict.
#[async_trait]
pub trait Predicate: Send + Sync {
    /// Name attached to every result this predicate produces
    fn name(&self) -> &str;

    /// Compare `actual` against `reference`
    async fn evaluate(&self, actual: &str, reference: &str) -> Result<PredicateVerdict>;
}

/// Run `predicate`, fill in attribution from the ambient context and attach
/// the result to the active assertion, if any
pub async fn run_predicate<P>(
    predicate: &P,
    actual: &str,
    reference: &str,
) -> Result<PredicateResult>
where
    P: Predicate + ?Sized,
{
    let verdict = predicate.evaluate(actual, reference).await?;
    let test_ctx = current_test_context();
    let result = PredicateResult {
        predicate_name: predicate.name().to_string(),
        actual: actual.to_string(),
        reference: reference.to_string(),
        value: verdict.value,
        confidence: verdict.confidence,
        message: verdict.message,
        test_name: test_ctx.as_ref().map(|ctx| ctx.test_name().to_string()),
        case_id: test_ctx.as_ref().map(|ctx| ctx.case_id().to_string()),
    };
    if let Some(assertion) = current_assertion_context() {
        assertion.push_predicate(result.clone());
    }
    Ok(result)
}

/// Record a boolean check, capturing the expression text
///
/// ```ignore
/// check!(answer.len() > 3);
/// ```
#[macro_export]
macro_rules! check {
    ($cond:expr $(,)?) => {
        $crate::evidence::check($cond, stringify!($cond))
    };
}

/// Record a boolean check and end the body as FAILED when it does not hold
///
/// Only usable inside functions returning [`BodyResult`](crate::outcome::BodyResult).
#[macro_export]
macro_rules! ensure {
    ($cond:expr $(,)?) => {
        if !$crate::evidence::check($cond, stringify!($cond)).passed {
            return Err($crate::outcome::Interrupt::fail(concat!(
                "assertion failed: ",
                stringify!($cond)
            )));
        }
    };
    ($cond:expr, $($msg:tt)+) => {
        if !$crate::evidence::check($cond, stringify!($cond)).passed {
            return Err($crate::outcome::Interrupt::fail(format!($($msg)+)));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{with_metrics, with_test_context, TestContext, TestItem};
    use crate::metric::{Metric, MetricValue};
    use std::sync::Arc;

    struct ExactMatch;

    #[async_trait]
    impl Predicate for ExactMatch {
        fn name(&self) -> &str {
            "exact_match"
        }

        async fn evaluate(&self, actual: &str, reference: &str) -> Result<PredicateVerdict> {
            Ok(PredicateVerdict::bool(actual == reference))
        }
    }

    fn ctx() -> TestContext {
        TestContext::new(
            TestItem {
                name: "answers".into(),
                ..Default::default()
            },
            "case-7",
        )
    }

    #[test]
    fn check_without_context_is_noop() {
        let result = check(false, "1 == 2");
        assert!(!result.passed);
        assert_eq!(result.error_message.as_deref(), Some("assertion failed: 1 == 2"));
    }

    #[tokio::test]
    async fn check_records_into_active_context() {
        let ctx = ctx();
        with_test_context(ctx.clone(), async {
            check!(1 + 1 == 2);
            check!(2 < 1);
        })
        .await;

        let recorded = ctx.assertions();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].expression, "1 + 1 == 2");
        assert!(ctx.has_failed_assertion());
    }

    #[tokio::test]
    async fn assert_that_collects_nested_evidence() {
        let ctx = ctx();
        let metric = Metric::new("latency");
        metric.add_records([1.0, 2.0, 3.0]);

        let result = with_test_context(ctx.clone(), async {
            assert_that("exact and fast", async {
                let p = run_predicate(&ExactMatch, "paris", "paris").await.unwrap();
                p.value.is_pass() && metric.mean() < 5.0
            })
            .await
        })
        .await;

        assert!(result.passed);
        assert_eq!(result.predicate_results.len(), 1);
        let predicate = &result.predicate_results[0];
        assert_eq!(predicate.predicate_name, "exact_match");
        assert_eq!(predicate.test_name.as_deref(), Some("answers"));
        assert_eq!(predicate.case_id.as_deref(), Some("case-7"));
        assert_eq!(result.metric_readings.len(), 1);
        assert_eq!(result.metric_readings[0].statistic, "mean");
        assert_eq!(result.metric_readings[0].case_id.as_deref(), Some("case-7"));
        assert_eq!(ctx.assertions().len(), 1);
    }

    #[tokio::test]
    async fn metric_read_outside_assertion_leaves_no_evidence() {
        let ctx = ctx();
        let metric = Metric::new("m");
        metric.add_record(1);
        with_test_context(ctx.clone(), async {
            let _ = metric.sum();
            check!(true);
        })
        .await;
        assert!(ctx.assertions()[0].metric_readings.is_empty());
    }

    #[tokio::test]
    async fn attached_metrics_receive_pass_flags() {
        let accuracy = Arc::new(Metric::new("accuracy"));
        with_metrics(vec![accuracy.clone()], async {
            check(true, "a");
            check(false, "b");
            check(true, "c");
        })
        .await;
        assert_eq!(accuracy.len(), 3);
        assert!((accuracy.mean() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn counter_and_distribution_reads_are_evidence() {
        let ctx = ctx();
        let metric = Metric::new("labels");
        metric.add_records([true, true, false]);

        let result = with_test_context(ctx, async {
            assert_that("mostly true", async {
                let share = metric.distribution()[&MetricValue::Bool(true)];
                metric.counter().get(true) == 2 && share > 0.5
            })
            .await
        })
        .await;

        assert!(result.passed);
        let statistics: Vec<&str> = result
            .metric_readings
            .iter()
            .map(|r| r.statistic.as_str())
            .collect();
        assert_eq!(
            statistics,
            [
                "distribution[false]",
                "distribution[true]",
                "counter[false]",
                "counter[true]"
            ]
        );
        assert_eq!(result.metric_readings[3].value, 2.0);
    }

    #[test]
    fn non_finite_predicate_values_survive_json() {
        let result = PredicateResult {
            predicate_name: "judge".into(),
            actual: "a".into(),
            reference: "b".into(),
            value: PredicateValue::Score(f64::NAN),
            confidence: f64::INFINITY,
            message: None,
            test_name: None,
            case_id: None,
        };
        let json = serde_json::to_string(&result).unwrap();
        let back: PredicateResult = serde_json::from_str(&json).unwrap();
        match back.value {
            PredicateValue::Score(score) => assert!(score.is_nan()),
            other => panic!("unexpected verdict {other:?}"),
        }
        assert_eq!(back.confidence, f64::INFINITY);
    }

    #[test]
    fn ensure_returns_fail_interrupt() {
        fn body() -> crate::outcome::BodyResult {
            ensure!(1 > 2);
            unreachable!("ensure must return early");
        }
        let err = body().unwrap_err();
        assert_eq!(err.kind(), "fail");
        assert_eq!(err.message().as_deref(), Some("assertion failed: 1 > 2"));
    }
}
