//! Test definitions and modifiers
//!
//! A [`TestDefinition`] is created once at discovery and shared read-only
//! (behind an `Arc`) by every execution derived from it. Modifiers are applied
//! outer to inner: the leading modifier decides how the definition expands and
//! the remaining chain is handed to each child via [`TestDefinition::derive_child`].

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::TestItem;
use crate::errors::{Result, VerityError};
use crate::outcome::BodyResult;

/// Type-erased resource instance handed to test bodies
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Future returned by asynchronous test bodies
pub type BodyFuture = BoxFuture<'static, BodyResult>;

type SyncFn = dyn Fn(Args) -> BodyResult + Send + Sync;
type AsyncFn = dyn Fn(Args) -> BodyFuture + Send + Sync;

// ============================================================================
// Body and arguments
// ============================================================================

/// Callable body of a test
#[derive(Clone)]
pub enum TestBody {
    /// Runs to completion without suspending
    Sync(Arc<SyncFn>),
    /// Returns a future the executor awaits
    Async(Arc<AsyncFn>),
}

impl TestBody {
    /// Wrap a synchronous closure
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Args) -> BodyResult + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Wrap an asynchronous closure
    pub fn asynchronous<F, Fut>(f: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BodyResult> + Send + 'static,
    {
        Self::Async(Arc::new(move |args| f(args).boxed()))
    }

    /// Whether the body is asynchronous
    pub fn is_async(&self) -> bool {
        matches!(self, Self::Async(_))
    }
}

impl fmt::Debug for TestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("TestBody::Sync"),
            Self::Async(_) => f.write_str("TestBody::Async"),
        }
    }
}

/// Keyword arguments bound for one body invocation
#[derive(Clone, Default)]
pub struct Args {
    params: BTreeMap<String, Value>,
    resources: BTreeMap<String, Instance>,
}

impl Args {
    /// Empty argument set
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a parameter value
    pub fn insert_param(&mut self, name: impl Into<String>, value: Value) {
        self.params.insert(name.into(), value);
    }

    /// Bind a resolved resource
    pub fn insert_resource(&mut self, name: impl Into<String>, instance: Instance) {
        self.resources.insert(name.into(), instance);
    }

    /// Raw parameter value
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// Parameter deserialized into `T`
    pub fn param_as<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self
            .params
            .get(name)
            .ok_or_else(|| VerityError::invalid(format!("parameter '{name}' is not bound")))?;
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Resolved resource downcast to `T`
    pub fn resource<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let instance = self
            .resources
            .get(name)
            .cloned()
            .ok_or_else(|| VerityError::unknown_resource(name))?;
        instance
            .downcast::<T>()
            .map_err(|_| VerityError::TypeMismatch {
                name: name.to_string(),
                expected: std::any::type_name::<T>().to_string(),
            })
    }

    /// Names of all bound parameters
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    /// Names of all bound resources
    pub fn resource_names(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Args")
            .field("params", &self.params)
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ============================================================================
// Modifiers
// ============================================================================

/// One bundle of parameter values for a parametrized test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    /// Parameter values by name
    pub values: BTreeMap<String, Value>,
    /// Suffix identifying the child built from this set
    pub id_suffix: String,
}

impl ParameterSet {
    /// Parameter set with a suffix derived from its values
    pub fn new<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let values: BTreeMap<String, Value> =
            values.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let id_suffix = values
            .iter()
            .map(|(k, v)| format!("{k}={}", value_label(v)))
            .collect::<Vec<_>>()
            .join("-");
        Self { values, id_suffix }
    }

    /// Replace the derived suffix
    pub fn with_id(mut self, id_suffix: impl Into<String>) -> Self {
        self.id_suffix = id_suffix.into();
        self
    }
}

fn value_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Declarative expansion applied to a definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Modifier {
    /// Run `count` times, passing when at least `min_passes` runs pass
    Repeat {
        /// Number of runs
        count: usize,
        /// Passing runs required
        min_passes: usize,
    },
    /// Run once per parameter set
    Parametrize {
        /// Parameter bundles
        parameter_sets: Vec<ParameterSet>,
    },
}

impl Modifier {
    /// Repeat with every run required to pass
    pub fn repeat(count: usize) -> Self {
        Self::Repeat {
            count,
            min_passes: count,
        }
    }

    /// Check the modifier's construction constraints
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Repeat { count, min_passes } => {
                if *count < 1 {
                    return Err(VerityError::invalid_modifier("repeat count must be at least 1"));
                }
                if *min_passes < 1 {
                    return Err(VerityError::invalid_modifier(
                        "repeat min_passes must be at least 1",
                    ));
                }
                if min_passes > count {
                    return Err(VerityError::invalid_modifier(format!(
                        "repeat min_passes ({min_passes}) exceeds count ({count})"
                    )));
                }
                Ok(())
            }
            Self::Parametrize { parameter_sets } => {
                if parameter_sets.is_empty() {
                    return Err(VerityError::invalid_modifier(
                        "parametrize requires at least one parameter set",
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Expected-failure marker
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct XfailMarker {
    /// Why the test is expected to fail
    pub reason: Option<String>,
    /// Whether an unexpected pass is reported as FAILED
    pub strict: bool,
}

// ============================================================================
// Definition
// ============================================================================

/// Immutable description of a discovered test
#[derive(Debug, Clone)]
pub struct TestDefinition {
    /// Function name of the test
    pub name: String,
    /// Callable body
    pub body: TestBody,
    /// Declared keyword argument names, bound from parameters or resources
    pub params: Vec<String>,
    /// Module path the test was discovered in
    pub module_path: String,
    /// Tags
    pub tags: Vec<String>,
    /// Enclosing class or group name
    pub class_name: Option<String>,
    /// Remaining modifiers, outer first
    pub modifiers: Vec<Modifier>,
    /// Suffix accumulated from enclosing modifiers
    pub id_suffix: Option<String>,
    /// Parameter values inherited from enclosing parametrizations
    pub bound_params: BTreeMap<String, Value>,
    /// Skip marker
    pub skip_reason: Option<String>,
    /// Expected-failure marker
    pub xfail: Option<XfailMarker>,
}

impl TestDefinition {
    /// Definition with no parameters, tags or modifiers
    pub fn new(name: impl Into<String>, body: TestBody) -> Self {
        Self {
            name: name.into(),
            body,
            params: Vec::new(),
            module_path: String::new(),
            tags: Vec::new(),
            class_name: None,
            modifiers: Vec::new(),
            id_suffix: None,
            bound_params: BTreeMap::new(),
            skip_reason: None,
            xfail: None,
        }
    }

    /// Set the module path
    pub fn with_module(mut self, module_path: impl Into<String>) -> Self {
        self.module_path = module_path.into();
        self
    }

    /// Declare keyword argument names
    pub fn with_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }

    /// Add a tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Set the enclosing class name
    pub fn with_class(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    /// Append a modifier as the innermost one
    pub fn with_modifier(mut self, modifier: Modifier) -> Self {
        self.modifiers.push(modifier);
        self
    }

    /// Append a repeat modifier
    pub fn repeat(self, count: usize, min_passes: usize) -> Self {
        self.with_modifier(Modifier::Repeat { count, min_passes })
    }

    /// Append a parametrize modifier
    pub fn parametrize(self, parameter_sets: Vec<ParameterSet>) -> Self {
        self.with_modifier(Modifier::Parametrize { parameter_sets })
    }

    /// Mark as skipped
    pub fn skip(mut self, reason: impl Into<String>) -> Self {
        self.skip_reason = Some(reason.into());
        self
    }

    /// Mark as expected to fail
    pub fn xfail(mut self, reason: Option<String>, strict: bool) -> Self {
        self.xfail = Some(XfailMarker { reason, strict });
        self
    }

    /// Whether the body is asynchronous
    pub fn is_async(&self) -> bool {
        self.body.is_async()
    }

    /// Validate the complete modifier chain
    pub fn validate(&self) -> Result<()> {
        self.modifiers.iter().try_for_each(Modifier::validate)
    }

    /// `module::[Class::]name[suffix]`
    pub fn full_name(&self) -> String {
        let mut out = String::new();
        if !self.module_path.is_empty() {
            out.push_str(&self.module_path);
            out.push_str("::");
        }
        if let Some(class) = &self.class_name {
            out.push_str(class);
            out.push_str("::");
        }
        out.push_str(&self.name);
        if let Some(suffix) = &self.id_suffix {
            out.push('[');
            out.push_str(suffix);
            out.push(']');
        }
        out
    }

    /// Copy of this definition with the leading modifier removed, `suffix`
    /// appended to the id suffix and `params` merged into the bound values
    pub fn derive_child(
        &self,
        suffix: impl Into<String>,
        params: &BTreeMap<String, Value>,
    ) -> TestDefinition {
        let suffix = suffix.into();
        let mut child = self.clone();
        if !child.modifiers.is_empty() {
            child.modifiers.remove(0);
        }
        child.id_suffix = Some(match &self.id_suffix {
            Some(parent) => format!("{parent}-{suffix}"),
            None => suffix,
        });
        child
            .bound_params
            .extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
        child
    }

    /// Context metadata describing this definition
    pub fn to_item(&self) -> TestItem {
        TestItem {
            name: self.name.clone(),
            group: self.class_name.clone(),
            module_path: self.module_path.clone(),
            tags: self.tags.clone(),
            params: self
                .bound_params
                .iter()
                .map(|(k, v)| format!("{k}={}", value_label(v)))
                .collect(),
            id_suffix: self.id_suffix.clone(),
        }
    }
}
