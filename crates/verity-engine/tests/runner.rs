//! Run loop: ordering, maxfail, timeouts, metrics and reporting.

#![allow(clippy::unwrap_used, missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;

use verity_core::{Metric, Scope, TestBody, TestExecution, TestStatus, VerityError};
use verity_engine::{Reporter, ResourceDef, ResourceRegistry, Runner, RunnerConfig, VerityRun};
use verity_testkit::{
    counting_body, definition, init_tracing, pass_first, sleeping_body, with_body, CallCounter,
    EventLog,
};

fn failing(name: &str) -> verity_core::TestDefinition {
    with_body(definition(name), pass_first(0, &CallCounter::new()))
}

fn config(concurrency: usize) -> RunnerConfig {
    RunnerConfig {
        concurrency,
        ..RunnerConfig::default()
    }
}

/// Reporter recording every callback it receives
#[derive(Default)]
struct RecordingReporter {
    events: EventLog,
}

#[async_trait]
impl Reporter for RecordingReporter {
    async fn on_collection_complete(&self, count: usize) {
        self.events.push(format!("collected {count}"));
    }

    async fn on_test_complete(&self, execution: &TestExecution) {
        self.events
            .push(format!("{} {}", execution.item.name, execution.status()));
    }

    async fn on_run_complete(&self, run: &VerityRun) {
        self.events
            .push(format!("complete {}", run.result.counts.total));
    }

    async fn on_run_stopped_early(&self, failures: usize) {
        self.events.push(format!("stopped {failures}"));
    }
}

// ============================================================================
// Scheduling
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn results_keep_input_order_under_concurrency() {
    let runner = Runner::new(config(4), ResourceRegistry::new()).unwrap();
    let definitions = (0..6)
        .map(|i| {
            let delay = Duration::from_millis(60 - 10 * i);
            with_body(definition(&format!("t{i}")), sleeping_body(delay))
        })
        .collect();

    let run = runner.run(definitions).await.unwrap();
    let names: Vec<_> = run
        .result
        .executions
        .iter()
        .map(|e| e.item.name.clone())
        .collect();
    assert_eq!(names, ["t0", "t1", "t2", "t3", "t4", "t5"]);
    assert_eq!(run.result.counts.passed, 6);
    assert!(!run.result.stopped_early);
}

#[tokio::test]
async fn maxfail_stops_scheduling() {
    init_tracing();
    let reporter = Arc::new(RecordingReporter::default());
    let config = RunnerConfig {
        maxfail: Some(2),
        ..config(1)
    };
    let runner = Runner::new(config, ResourceRegistry::new())
        .unwrap()
        .with_reporter(reporter.clone());
    let calls = CallCounter::new();
    let definitions = vec![
        failing("a"),
        failing("b"),
        with_body(definition("c"), counting_body(&calls)),
        with_body(definition("d"), counting_body(&calls)),
    ];

    let run = runner.run(definitions).await.unwrap();
    assert_eq!(run.result.executions.len(), 2);
    assert!(run.result.stopped_early);
    assert_eq!(run.result.counts.failures(), 2);
    assert_eq!(calls.get(), 0);
    assert!(reporter.events.events().contains(&"stopped 2".to_string()));
}

#[tokio::test]
async fn fail_fast_stops_after_first_failure() {
    let config = RunnerConfig {
        fail_fast: true,
        ..config(1)
    };
    let runner = Runner::new(config, ResourceRegistry::new()).unwrap();
    let run = runner
        .run(vec![definition("ok"), failing("bad"), definition("never")])
        .await
        .unwrap();
    assert_eq!(run.result.executions.len(), 2);
    assert!(run.result.stopped_early);
}

#[tokio::test]
async fn timeout_reports_error() {
    init_tracing();
    let config = RunnerConfig {
        timeout_ms: Some(20),
        ..config(1)
    };
    let runner = Runner::new(config, ResourceRegistry::new()).unwrap();
    let slow = with_body(definition("slow"), sleeping_body(Duration::from_secs(5)));

    let run = runner.run(vec![slow, definition("fast")]).await.unwrap();
    let slow = &run.result.executions[0];
    assert_eq!(slow.status(), TestStatus::Error);
    assert_eq!(slow.result.error.as_ref().unwrap().kind, "timeout");
    assert_eq!(run.result.executions[1].status(), TestStatus::Passed);
}

#[tokio::test]
async fn invalid_definition_fails_before_running() {
    let calls = CallCounter::new();
    let runner = Runner::new(config(1), ResourceRegistry::new()).unwrap();
    let result = runner
        .run(vec![
            with_body(definition("ok"), counting_body(&calls)),
            definition("bad").repeat(2, 5),
        ])
        .await;
    assert_matches!(result, Err(VerityError::InvalidModifier { .. }));
    assert_eq!(calls.get(), 0);
}

#[test]
fn cyclic_registry_rejected() {
    let mut registry = ResourceRegistry::new();
    registry
        .register(ResourceDef::sync("a", Scope::Session, |_| Ok(())).depends_on(["b"]))
        .register(ResourceDef::sync("b", Scope::Session, |_| Ok(())).depends_on(["a"]));
    assert_matches!(
        Runner::new(config(1), registry).err(),
        Some(VerityError::DependencyCycle { .. })
    );
}

// ============================================================================
// Resources and metrics
// ============================================================================

#[tokio::test]
async fn metrics_snapshotted_and_resources_torn_down() {
    let torn_down = EventLog::new();
    let log = torn_down.clone();
    let mut registry = ResourceRegistry::new();
    registry.register_metric("accuracy", Scope::Session).register(
        ResourceDef::sync("client", Scope::Session, |_| Ok(String::from("client")))
            .on_teardown(move |_| {
                let log = log.clone();
                async move {
                    log.push("client");
                    Ok(())
                }
            }),
    );
    let runner = Runner::new(config(1), registry).unwrap();

    let scored = |name: &str, correct: bool| {
        with_body(
            definition(name),
            TestBody::sync(move |args| {
                args.resource::<String>("client")?;
                args.resource::<Metric>("accuracy")?.add_record(correct);
                Ok(())
            }),
        )
        .with_params(["client", "accuracy"])
    };
    let run = runner
        .run(vec![scored("q1", true), scored("q2", true), scored("q3", false)])
        .await
        .unwrap();

    assert_eq!(run.metrics.len(), 1);
    let snapshot = &run.metrics[0];
    assert_eq!(snapshot.name, "accuracy");
    assert_eq!(snapshot.len, 3);
    assert!((snapshot.mean - 2.0 / 3.0).abs() < 1e-9);
    assert!(snapshot.metadata.collected_from_tests.contains("q1"));

    assert_eq!(torn_down.events(), vec!["client"]);
    assert_eq!(runner.resolver().cached_len(), 0);
}

#[tokio::test]
async fn reporter_sees_lifecycle() {
    let reporter = Arc::new(RecordingReporter::default());
    let runner = Runner::new(config(1), ResourceRegistry::new())
        .unwrap()
        .with_reporter(reporter.clone());
    runner
        .run(vec![definition("one"), failing("two")])
        .await
        .unwrap();

    assert_eq!(
        reporter.events.events(),
        vec!["collected 2", "one passed", "two failed", "complete 2"]
    );
}
