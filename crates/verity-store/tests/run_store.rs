//! Run store behaviour shared by the memory and JSON Lines sinks.

#![allow(clippy::unwrap_used, missing_docs)]

use std::io::Write;

use async_trait::async_trait;
use chrono::Duration;
use serde_json::json;

use verity_core::{
    assert_that, run_predicate, Args, Interrupt, Metric, Predicate, PredicateVerdict, Result,
    RunId, Scope, TestBody, TestExecution, TestStatus,
};
use verity_engine::{ResourceRegistry, Runner, RunnerConfig, VerityRun};
use verity_store::{JsonlRunStore, MemoryRunStore, RunStore};
use verity_testkit::{definition, param_sets, with_body};

struct CaseInsensitive;

#[async_trait]
impl Predicate for CaseInsensitive {
    fn name(&self) -> &str {
        "case_insensitive"
    }

    async fn evaluate(&self, actual: &str, reference: &str) -> Result<PredicateVerdict> {
        Ok(PredicateVerdict::bool(actual.eq_ignore_ascii_case(reference)))
    }
}

/// Run of one parametrized test: "Paris" matches, "London" does not
async fn sample_run() -> VerityRun {
    let mut registry = ResourceRegistry::new();
    registry.register_metric("accuracy", Scope::Session);
    let runner = Runner::new(RunnerConfig::default(), registry).unwrap();

    let body = TestBody::asynchronous(|args: Args| async move {
        let accuracy = args.resource::<Metric>("accuracy")?;
        let answer: String = args.param_as("answer")?;
        let result = assert_that("answer names the capital", async {
            run_predicate(&CaseInsensitive, &answer, "paris")
                .await
                .map(|r| r.value.is_pass())
                .unwrap_or(false)
        })
        .await;
        accuracy.add_record(result.passed);
        Ok::<(), Interrupt>(())
    });
    let def = with_body(definition("capital"), body)
        .with_params(["accuracy", "answer"])
        .parametrize(param_sets("answer", [json!("Paris"), json!("London")]));

    runner.run(vec![def]).await.unwrap()
}

fn leaf<'a>(run: &'a VerityRun, suffix: &str) -> &'a TestExecution {
    run.result.executions[0]
        .leaves()
        .into_iter()
        .find(|e| e.item.id_suffix.as_deref() == Some(suffix))
        .unwrap()
}

fn later_copy(run: &VerityRun, hours: i64) -> VerityRun {
    let mut copy = run.clone();
    copy.run_id = RunId::new();
    copy.start_time = run.start_time + Duration::hours(hours);
    copy.end_time = run.end_time + Duration::hours(hours);
    copy
}

/// Lookups every store must answer the same way
async fn exercise(store: &dyn RunStore, run: &VerityRun) {
    let root = &run.result.executions[0];
    assert_eq!(root.status(), TestStatus::Failed);

    let stored = store.get_run(run.run_id).await.unwrap().unwrap();
    assert_eq!(stored.result.executions[0].children.len(), 2);
    assert!(store.get_run(RunId::new()).await.unwrap().is_none());

    let passing = leaf(run, "answer=Paris");
    let assertions = store
        .assertions_for_execution(passing.execution_id)
        .await
        .unwrap();
    assert_eq!(assertions.len(), 1);
    assert!(assertions[0].passed);

    let predicates = store
        .predicates_for_assertion(assertions[0].assertion_id)
        .await
        .unwrap();
    assert_eq!(predicates.len(), 1);
    assert_eq!(predicates[0].predicate_name, "case_insensitive");
    assert_eq!(predicates[0].test_name.as_deref(), Some("capital"));
    assert_eq!(
        predicates[0].case_id.as_deref(),
        Some(passing.execution_id.to_string().as_str())
    );

    let failing = leaf(run, "answer=London");
    let assertions = store
        .assertions_for_execution(failing.execution_id)
        .await
        .unwrap();
    assert!(!assertions[0].passed);
    assert!(store
        .assertions_for_execution(root.execution_id)
        .await
        .unwrap()
        .is_empty());

    let metrics = store.metrics_for_run(run.run_id).await.unwrap();
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0].name, "accuracy");
    assert_eq!(metrics[0].len, 2);
    assert!((metrics[0].mean - 0.5).abs() < 1e-9);
}

// ============================================================================
// Memory
// ============================================================================

#[tokio::test]
async fn memory_store_indexes_nested_evidence() {
    let run = sample_run().await;
    let store = MemoryRunStore::new();
    store.save_run(&run).await.unwrap();
    exercise(&store, &run).await;
}

#[tokio::test]
async fn memory_store_lists_most_recent_first() {
    let run = sample_run().await;
    let newer = later_copy(&run, 1);
    let newest = later_copy(&run, 2);
    let store = MemoryRunStore::new();
    for r in [&newer, &run, &newest] {
        store.save_run(r).await.unwrap();
    }

    let ids: Vec<RunId> = store
        .list_runs(10)
        .await
        .unwrap()
        .iter()
        .map(|s| s.run_id)
        .collect();
    assert_eq!(ids, vec![newest.run_id, newer.run_id, run.run_id]);
    assert_eq!(store.list_runs(1).await.unwrap().len(), 1);
    assert_eq!(store.list_runs(1).await.unwrap()[0].counts.failed, 1);
}

#[tokio::test]
async fn saving_same_run_twice_replaces_it() {
    let run = sample_run().await;
    let store = MemoryRunStore::new();
    store.save_run(&run).await.unwrap();
    store.save_run(&run).await.unwrap();
    assert_eq!(store.len().await, 1);
    assert_eq!(store.list_runs(10).await.unwrap().len(), 1);
}

// ============================================================================
// JSON Lines
// ============================================================================

#[tokio::test]
async fn jsonl_store_answers_lookups() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonlRunStore::open(dir.path().join("runs.jsonl"))
        .await
        .unwrap();
    let run = sample_run().await;
    store.save_run(&run).await.unwrap();
    exercise(&store, &run).await;
}

#[tokio::test]
async fn jsonl_store_reloads_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("runs.jsonl");
    let run = sample_run().await;
    let newer = later_copy(&run, 1);
    {
        let store = JsonlRunStore::open(&path).await.unwrap();
        store.save_run(&run).await.unwrap();
        store.save_run(&newer).await.unwrap();
    }
    assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);

    let reopened = JsonlRunStore::open(&path).await.unwrap();
    let summaries = reopened.list_runs(10).await.unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].run_id, newer.run_id);
    exercise(&reopened, &run).await;
}

#[tokio::test]
async fn jsonl_store_skips_truncated_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs.jsonl");
    let run = sample_run().await;
    {
        let store = JsonlRunStore::open(&path).await.unwrap();
        store.save_run(&run).await.unwrap();
    }
    let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    write!(file, "{{\"run_id\": \"trunc").unwrap();
    drop(file);

    let reopened = JsonlRunStore::open(&path).await.unwrap();
    assert_eq!(reopened.list_runs(10).await.unwrap().len(), 1);
    assert!(reopened.get_run(run.run_id).await.unwrap().is_some());

    // a run saved after the partial record must survive the next reload
    let newer = later_copy(&run, 1);
    reopened.save_run(&newer).await.unwrap();
    drop(reopened);

    let reloaded = JsonlRunStore::open(&path).await.unwrap();
    assert_eq!(reloaded.list_runs(10).await.unwrap().len(), 2);
    assert!(reloaded.get_run(newer.run_id).await.unwrap().is_some());
    assert!(std::fs::read_to_string(&path).unwrap().ends_with('\n'));
}

#[tokio::test]
async fn jsonl_store_keeps_runs_with_non_finite_values() {
    let mut registry = ResourceRegistry::new();
    registry.register_metric("latency", Scope::Session);
    let runner = Runner::new(RunnerConfig::default(), registry).unwrap();
    let body = TestBody::sync(|args| {
        let latency = args.resource::<Metric>("latency")?;
        latency.add_record(1.0);
        latency.add_record(f64::NAN);
        Ok(())
    });
    let def = with_body(definition("timed"), body).with_params(["latency"]);
    let run = runner.run(vec![def]).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs.jsonl");
    JsonlRunStore::open(&path)
        .await
        .unwrap()
        .save_run(&run)
        .await
        .unwrap();

    let reopened = JsonlRunStore::open(&path).await.unwrap();
    let metrics = reopened.metrics_for_run(run.run_id).await.unwrap();
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0].len, 2);
    assert!(metrics[0].values[1].as_f64().is_nan());
    assert!(metrics[0].mean.is_nan());
}
