//! Scoped resource resolution
//!
//! Resources are registered by name with an explicit list of dependency names
//! and a factory. The [`ResourceResolver`] builds them on demand and caches the
//! instances:
//!
//! - SESSION resources: one instance per resolver.
//! - CASE resources: one instance per `(name, case id)`, where the case id is
//!   taken from the active test context.
//!
//! Each cache key owns a [`tokio::sync::OnceCell`], so concurrent requests for
//! an uncached key wait for the single construction in flight instead of
//! building twice. Cycles are detected from the chain of names currently being
//! resolved before any cell is awaited.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, trace, warn};

use verity_core::context::{
    current_consumer, current_test_context, with_resolver_context, with_resolver_context_sync,
    ResolverContext,
};
use verity_core::{Args, Instance, Metric, MetricSnapshot, Result, Scope, VerityError};

type FactoryFn = dyn Fn(Args) -> BoxFuture<'static, Result<Instance>> + Send + Sync;
type HookFn = dyn Fn(&Instance) + Send + Sync;
type TeardownFn = dyn Fn(Instance) -> BoxFuture<'static, Result<()>> + Send + Sync;

// ============================================================================
// Definitions
// ============================================================================

/// A named, scoped resource factory
#[derive(Clone)]
pub struct ResourceDef {
    name: String,
    scope: Scope,
    dependencies: Vec<String>,
    factory: Arc<FactoryFn>,
    on_resolve: Option<Arc<HookFn>>,
    on_injection: Option<Arc<HookFn>>,
    on_teardown: Option<Arc<TeardownFn>>,
}

impl ResourceDef {
    /// Resource built by an async factory receiving its resolved dependencies
    pub fn new<F, Fut, T>(name: impl Into<String>, scope: Scope, factory: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + Sync + 'static,
    {
        let factory: Arc<FactoryFn> = Arc::new(move |deps| {
            factory(deps)
                .map(|built| built.map(|value| Arc::new(value) as Instance))
                .boxed()
        });
        Self {
            name: name.into(),
            scope,
            dependencies: Vec::new(),
            factory,
            on_resolve: None,
            on_injection: None,
            on_teardown: None,
        }
    }

    /// Resource built by a synchronous factory
    pub fn sync<F, T>(name: impl Into<String>, scope: Scope, factory: F) -> Self
    where
        F: Fn(Args) -> Result<T> + Send + Sync + 'static,
        T: Send + Sync + 'static,
    {
        let factory = Arc::new(factory);
        Self::new(name, scope, move |deps| {
            let factory = factory.clone();
            async move { factory(deps) }
        })
    }

    /// Declare the names this resource's factory depends on
    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    /// Hook run once on each freshly built instance
    pub fn on_resolve(mut self, hook: impl Fn(&Instance) + Send + Sync + 'static) -> Self {
        self.on_resolve = Some(Arc::new(hook));
        self
    }

    /// Hook run every time the instance is handed to a consumer
    pub fn on_injection(mut self, hook: impl Fn(&Instance) + Send + Sync + 'static) -> Self {
        self.on_injection = Some(Arc::new(hook));
        self
    }

    /// Async hook run when the instance is torn down
    pub fn on_teardown<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Instance) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_teardown = Some(Arc::new(move |instance| hook(instance).boxed()));
        self
    }

    /// Resource name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resource scope
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Declared dependency names
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

impl fmt::Debug for ResourceDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDef")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("dependencies", &self.dependencies)
            .field("on_teardown", &self.on_teardown.is_some())
            .finish_non_exhaustive()
    }
}

/// Registry of resource definitions by name
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    defs: BTreeMap<String, ResourceDef>,
}

impl ResourceRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `def`, replacing any definition with the same name
    pub fn register(&mut self, def: ResourceDef) -> &mut Self {
        if self.defs.contains_key(def.name()) {
            debug!(resource = %def.name(), "replacing resource definition");
        }
        self.defs.insert(def.name().to_string(), def);
        self
    }

    /// Register a [`Metric`] under `name`
    ///
    /// Every consumer the metric is injected into is added to its resource
    /// attribution.
    pub fn register_metric(&mut self, name: impl Into<String>, scope: Scope) -> &mut Self {
        let name = name.into();
        let metric_name = name.clone();
        let def = ResourceDef::sync(name, scope, move |_| {
            Ok(Metric::with_scope(metric_name.clone(), scope))
        })
        .on_injection(|instance| {
            if let (Some(metric), Some(consumer)) =
                (instance.downcast_ref::<Metric>(), current_consumer())
            {
                metric.add_resource_consumer(consumer);
            }
        });
        self.register(def)
    }

    /// Definition registered under `name`
    pub fn get(&self, name: &str) -> Option<&ResourceDef> {
        self.defs.get(name)
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.defs.contains_key(name)
    }

    /// Registered names in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.defs.keys().map(String::as_str)
    }

    /// Check that every dependency is registered and no dependency cycle exists
    pub fn validate(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit(
            registry: &ResourceRegistry,
            name: &str,
            marks: &mut HashMap<String, Mark>,
            path: &mut Vec<String>,
        ) -> Result<()> {
            match marks.get(name) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|n| n == name).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(name.to_string());
                    return Err(VerityError::DependencyCycle { path: cycle });
                }
                None => {}
            }
            let def = registry
                .get(name)
                .ok_or_else(|| VerityError::unknown_resource(name))?;
            marks.insert(name.to_string(), Mark::Visiting);
            path.push(name.to_string());
            for dep in def.dependencies() {
                visit(registry, dep, marks, path)?;
            }
            path.pop();
            marks.insert(name.to_string(), Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        for name in self.defs.keys() {
            visit(self, name, &mut marks, &mut Vec::new())?;
        }
        Ok(())
    }
}

// ============================================================================
// Resolver
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    name: String,
    case_id: Option<String>,
}

struct TeardownEntry {
    key: CacheKey,
    instance: Instance,
    hook: Arc<TeardownFn>,
}

/// Scoped, caching resource resolver
pub struct ResourceResolver {
    registry: Arc<ResourceRegistry>,
    cache: Mutex<HashMap<CacheKey, Arc<OnceCell<Instance>>>>,
    teardowns: Mutex<Vec<TeardownEntry>>,
    metrics: Mutex<Vec<Arc<Metric>>>,
}

impl ResourceResolver {
    /// Resolver over `registry` with an empty cache
    pub fn new(registry: ResourceRegistry) -> Self {
        Self::with_registry(Arc::new(registry))
    }

    /// Resolver sharing an existing registry
    pub fn with_registry(registry: Arc<ResourceRegistry>) -> Self {
        Self {
            registry,
            cache: Mutex::new(HashMap::new()),
            teardowns: Mutex::new(Vec::new()),
            metrics: Mutex::new(Vec::new()),
        }
    }

    /// The registry this resolver reads from
    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Whether `name` can be resolved
    pub fn has(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// Resolve `name` for the current consumer and case
    pub async fn resolve(&self, name: &str) -> Result<Instance> {
        let case_id = current_test_context().map(|ctx| ctx.case_id().to_string());
        self.resolve_inner(name.to_string(), case_id, current_consumer(), Vec::new())
            .await
    }

    /// Resolve `name` and downcast the instance to `T`
    pub async fn resolve_as<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        self.resolve(name)
            .await?
            .downcast::<T>()
            .map_err(|_| VerityError::TypeMismatch {
                name: name.to_string(),
                expected: std::any::type_name::<T>().to_string(),
            })
    }

    fn resolve_inner(
        &self,
        name: String,
        case_id: Option<String>,
        consumer: Option<String>,
        mut stack: Vec<String>,
    ) -> BoxFuture<'_, Result<Instance>> {
        async move {
            if stack.contains(&name) {
                stack.push(name);
                return Err(VerityError::DependencyCycle { path: stack });
            }
            let def = self
                .registry
                .get(&name)
                .ok_or_else(|| VerityError::unknown_resource(&name))?
                .clone();

            let key = CacheKey {
                name: name.clone(),
                case_id: match def.scope() {
                    Scope::Case => case_id.clone(),
                    Scope::Session => None,
                },
            };
            let cell = self.cache.lock().entry(key.clone()).or_default().clone();

            stack.push(name.clone());
            let mut built = false;
            let instance = cell
                .get_or_try_init(|| {
                    built = true;
                    self.build(&def, key.clone(), case_id, consumer.clone(), stack)
                })
                .await?
                .clone();

            if !built {
                trace!(resource = %name, scope = %def.scope(), "resource cache hit");
            }
            if let Some(hook) = &def.on_injection {
                with_resolver_context_sync(consumer_context(consumer), || hook(&instance));
            }
            Ok(instance)
        }
        .boxed()
    }

    async fn build(
        &self,
        def: &ResourceDef,
        key: CacheKey,
        case_id: Option<String>,
        consumer: Option<String>,
        stack: Vec<String>,
    ) -> Result<Instance> {
        let mut deps = Args::new();
        for dep in def.dependencies() {
            let instance = self
                .resolve_inner(
                    dep.clone(),
                    case_id.clone(),
                    Some(def.name().to_string()),
                    stack.clone(),
                )
                .await?;
            deps.insert_resource(dep.clone(), instance);
        }

        debug!(
            resource = %def.name(),
            scope = %def.scope(),
            case_id = ?key.case_id,
            "building resource"
        );
        let instance = with_resolver_context(consumer_context(consumer), (def.factory)(deps))
            .await
            .map_err(|err| match err {
                VerityError::ResourceFactory { .. } => err,
                other => VerityError::resource_factory(def.name(), other.to_string()),
            })?;

        if let Some(hook) = &def.on_resolve {
            hook(&instance);
        }
        if let Ok(metric) = instance.clone().downcast::<Metric>() {
            self.metrics.lock().push(metric);
        }
        if let Some(hook) = &def.on_teardown {
            self.teardowns.lock().push(TeardownEntry {
                key,
                instance: instance.clone(),
                hook: hook.clone(),
            });
        }
        Ok(instance)
    }

    /// Tear down and evict the CASE instances built for `case_id`
    pub async fn teardown_case(&self, case_id: &str) {
        let entries: Vec<TeardownEntry> = {
            let mut teardowns = self.teardowns.lock();
            let (matching, rest) = std::mem::take(&mut *teardowns)
                .into_iter()
                .partition(|entry| entry.key.case_id.as_deref() == Some(case_id));
            *teardowns = rest;
            matching
        };
        self.cache
            .lock()
            .retain(|key, _| key.case_id.as_deref() != Some(case_id));
        run_teardowns(entries).await;
    }

    /// Tear down every instance in reverse construction order and empty the cache
    pub async fn teardown(&self) {
        let entries = std::mem::take(&mut *self.teardowns.lock());
        self.cache.lock().clear();
        run_teardowns(entries).await;
    }

    /// Drop every cached instance without running teardown hooks
    pub fn clear(&self) {
        self.cache.lock().clear();
        self.teardowns.lock().clear();
        self.metrics.lock().clear();
        debug!("resource cache cleared");
    }

    /// Number of cached instances
    pub fn cached_len(&self) -> usize {
        self.cache
            .lock()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    /// Every metric built by this resolver since the last clear
    pub fn metrics(&self) -> Vec<Arc<Metric>> {
        self.metrics.lock().clone()
    }

    /// Snapshots of every metric built by this resolver since the last clear
    pub fn metric_snapshots(&self) -> Vec<MetricSnapshot> {
        self.metrics().iter().map(|m| m.snapshot()).collect()
    }
}

impl fmt::Debug for ResourceResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceResolver")
            .field("registry", &self.registry)
            .field("cached", &self.cached_len())
            .finish_non_exhaustive()
    }
}

fn consumer_context(consumer: Option<String>) -> ResolverContext {
    ResolverContext {
        consumer_name: consumer,
    }
}

async fn run_teardowns(entries: Vec<TeardownEntry>) {
    if !entries.is_empty() {
        debug!(count = entries.len(), "tearing down resources");
    }
    for entry in entries.into_iter().rev() {
        if let Err(err) = (entry.hook)(entry.instance).await {
            warn!(resource = %entry.key.name, error = %err, "resource teardown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn counter_def(name: &str, scope: Scope) -> ResourceDef {
        ResourceDef::sync(name, scope, |_| Ok(parking_lot::Mutex::new(0u32)))
    }

    #[tokio::test]
    async fn unknown_resource_is_reported() {
        let resolver = ResourceResolver::new(ResourceRegistry::new());
        assert_matches!(
            resolver.resolve("missing").await,
            Err(VerityError::UnknownResource { name }) if name == "missing"
        );
    }

    #[tokio::test]
    async fn session_instance_is_shared() {
        let mut registry = ResourceRegistry::new();
        registry.register(counter_def("counter", Scope::Session));
        let resolver = ResourceResolver::new(registry);

        let a = resolver.resolve("counter").await.unwrap();
        let b = resolver.resolve("counter").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn cycle_detected_at_resolution() {
        let mut registry = ResourceRegistry::new();
        registry
            .register(counter_def("a", Scope::Session).depends_on(["b"]))
            .register(counter_def("b", Scope::Session).depends_on(["a"]));
        let resolver = ResourceResolver::new(registry);

        assert_matches!(
            resolver.resolve("a").await,
            Err(VerityError::DependencyCycle { path }) if path == ["a", "b", "a"]
        );
    }

    #[test]
    fn validate_finds_cycles_and_unknown_dependencies() {
        let mut registry = ResourceRegistry::new();
        registry
            .register(counter_def("a", Scope::Session).depends_on(["b"]))
            .register(counter_def("b", Scope::Case).depends_on(["c"]))
            .register(counter_def("c", Scope::Case).depends_on(["a"]));
        assert_matches!(registry.validate(), Err(VerityError::DependencyCycle { .. }));

        let mut registry = ResourceRegistry::new();
        registry.register(counter_def("a", Scope::Session).depends_on(["ghost"]));
        assert_matches!(registry.validate(), Err(VerityError::UnknownResource { .. }));

        let mut registry = ResourceRegistry::new();
        registry
            .register(counter_def("a", Scope::Session).depends_on(["b"]))
            .register(counter_def("b", Scope::Session));
        assert!(registry.validate().is_ok());
    }

    #[tokio::test]
    async fn factory_error_is_wrapped_with_name() {
        let mut registry = ResourceRegistry::new();
        registry.register(ResourceDef::sync("broken", Scope::Session, |_| {
            Err::<u32, _>(VerityError::internal("no credentials"))
        }));
        let resolver = ResourceResolver::new(registry);

        assert_matches!(
            resolver.resolve("broken").await,
            Err(VerityError::ResourceFactory { name, .. }) if name == "broken"
        );
        // a failed build leaves the key unset
        assert_eq!(resolver.cached_len(), 0);
    }

    #[tokio::test]
    async fn resolve_as_checks_type() {
        let mut registry = ResourceRegistry::new();
        registry.register(ResourceDef::sync("greeting", Scope::Session, |_| {
            Ok(String::from("hi"))
        }));
        let resolver = ResourceResolver::new(registry);

        assert_eq!(*resolver.resolve_as::<String>("greeting").await.unwrap(), "hi");
        assert_matches!(
            resolver.resolve_as::<u64>("greeting").await,
            Err(VerityError::TypeMismatch { .. })
        );
    }
}
