//! Resource resolver scoping, attribution and teardown.

#![allow(clippy::unwrap_used, missing_docs)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use verity_core::context::{with_resolver_context, with_test_context, ResolverContext};
use verity_core::{Metric, Scope};
use verity_engine::{ResourceDef, ResourceRegistry, ResourceResolver};
use verity_testkit::{test_context, EventLog};

fn counting_def(name: &str, scope: Scope, built: &Arc<AtomicUsize>) -> ResourceDef {
    let built = built.clone();
    ResourceDef::new(name, scope, move |_| {
        let built = built.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(built.fetch_add(1, Ordering::SeqCst))
        }
    })
}

// ============================================================================
// Scope identity
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn session_resource_built_once_under_concurrency() {
    let built = Arc::new(AtomicUsize::new(0));
    let mut registry = ResourceRegistry::new();
    registry.register(counting_def("client", Scope::Session, &built));
    let resolver = Arc::new(ResourceResolver::new(registry));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let resolver = resolver.clone();
            tokio::spawn(async move { resolver.resolve("client").await.unwrap() })
        })
        .collect();
    let mut instances = Vec::new();
    for handle in handles {
        instances.push(handle.await.unwrap());
    }

    assert_eq!(built.load(Ordering::SeqCst), 1);
    assert!(instances.iter().all(|i| Arc::ptr_eq(i, &instances[0])));
}

#[tokio::test]
async fn case_resource_distinct_per_case_shared_within_case() {
    let built = Arc::new(AtomicUsize::new(0));
    let mut registry = ResourceRegistry::new();
    registry.register(counting_def("session_state", Scope::Case, &built));
    let resolver = ResourceResolver::new(registry);

    let (a1, a2) = with_test_context(test_context("t", "case-a"), async {
        (
            resolver.resolve("session_state").await.unwrap(),
            resolver.resolve("session_state").await.unwrap(),
        )
    })
    .await;
    let b = with_test_context(test_context("t", "case-b"), async {
        resolver.resolve("session_state").await.unwrap()
    })
    .await;

    assert!(Arc::ptr_eq(&a1, &a2));
    assert!(!Arc::ptr_eq(&a1, &b));
    assert_eq!(built.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn session_mutations_visible_to_all_consumers() {
    let mut registry = ResourceRegistry::new();
    registry.register(ResourceDef::sync("log", Scope::Session, |_| Ok(EventLog::new())));
    let resolver = ResourceResolver::new(registry);

    resolver.resolve_as::<EventLog>("log").await.unwrap().push("first");
    let log = resolver.resolve_as::<EventLog>("log").await.unwrap();
    assert_eq!(log.events(), vec!["first".to_string()]);
}

#[tokio::test]
async fn dependencies_resolve_recursively() {
    let mut registry = ResourceRegistry::new();
    registry
        .register(ResourceDef::sync("base_url", Scope::Session, |_| {
            Ok(String::from("http://model"))
        }))
        .register(
            ResourceDef::sync("client", Scope::Case, |deps| {
                let url = deps.resource::<String>("base_url")?;
                Ok(format!("client({url})"))
            })
            .depends_on(["base_url"]),
        );
    let resolver = ResourceResolver::new(registry);

    let client = with_test_context(test_context("t", "c1"), async {
        resolver.resolve_as::<String>("client").await.unwrap()
    })
    .await;
    assert_eq!(*client, "client(http://model)");
}

// ============================================================================
// Attribution
// ============================================================================

#[tokio::test]
async fn metric_resource_records_consumers() {
    let mut registry = ResourceRegistry::new();
    registry.register_metric("accuracy", Scope::Session);
    let resolver = ResourceResolver::new(registry);

    for consumer in ["scorer_a", "scorer_b"] {
        with_resolver_context(ResolverContext::consumer(consumer), async {
            resolver.resolve("accuracy").await.unwrap();
        })
        .await;
    }

    let metric = resolver.resolve_as::<Metric>("accuracy").await.unwrap();
    let consumers = metric.metadata().collected_from_resources;
    assert!(consumers.contains("scorer_a"));
    assert!(consumers.contains("scorer_b"));
    assert_eq!(metric.metadata().scope, Scope::Session);
    assert_eq!(resolver.metric_snapshots().len(), 1);
}

#[tokio::test]
async fn factory_sees_consumer_context() {
    let seen = EventLog::new();
    let seen_in_factory = seen.clone();
    let mut registry = ResourceRegistry::new();
    registry.register(ResourceDef::sync("inspector", Scope::Session, move |_| {
        let consumer = verity_core::current_consumer().unwrap_or_default();
        seen_in_factory.push(consumer);
        Ok(())
    }));
    let resolver = ResourceResolver::new(registry);

    with_resolver_context(ResolverContext::consumer("answers_test"), async {
        resolver.resolve("inspector").await.unwrap();
    })
    .await;
    assert_eq!(seen.events(), vec!["answers_test".to_string()]);
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test]
async fn teardown_runs_in_reverse_order() {
    let log = EventLog::new();
    let mut registry = ResourceRegistry::new();
    for name in ["first", "second", "third"] {
        let log = log.clone();
        registry.register(
            ResourceDef::sync(name, Scope::Session, |_| Ok(()))
                .on_teardown(move |_| {
                    let log = log.clone();
                    async move {
                        log.push(name);
                        Ok(())
                    }
                }),
        );
    }
    let resolver = ResourceResolver::new(registry);
    for name in ["first", "second", "third"] {
        resolver.resolve(name).await.unwrap();
    }

    resolver.teardown().await;
    assert_eq!(log.events(), vec!["third", "second", "first"]);
    assert_eq!(resolver.cached_len(), 0);
}

#[tokio::test]
async fn teardown_case_evicts_only_that_case() {
    let log = EventLog::new();
    let teardown_log = log.clone();
    let mut registry = ResourceRegistry::new();
    registry
        .register(ResourceDef::sync("shared", Scope::Session, |_| Ok(())))
        .register(
            ResourceDef::sync("scratch", Scope::Case, |_| Ok(())).on_teardown(move |_| {
                let log = teardown_log.clone();
                async move {
                    log.push("scratch");
                    Ok(())
                }
            }),
        );
    let resolver = ResourceResolver::new(registry);

    for case in ["c1", "c2"] {
        with_test_context(test_context("t", case), async {
            resolver.resolve("shared").await.unwrap();
            resolver.resolve("scratch").await.unwrap();
        })
        .await;
    }
    assert_eq!(resolver.cached_len(), 3);

    resolver.teardown_case("c1").await;
    assert_eq!(log.events(), vec!["scratch"]);
    assert_eq!(resolver.cached_len(), 2);

    resolver.clear();
    assert_eq!(resolver.cached_len(), 0);
    assert_eq!(log.events().len(), 1);
}
