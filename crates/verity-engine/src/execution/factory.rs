//! Executable selection

use std::fmt;
use std::sync::Arc;

use verity_core::{Modifier, Result, TestDefinition};

use super::{
    DefaultInvoker, Executable, ParametrizedExecutable, RepeatedExecutable, SingleExecutable,
    TestInvoker, TestTracer,
};

/// Builds the executable for a definition
pub trait TestFactory: Send + Sync {
    /// Validate `definition` and build its executable tree
    fn build(&self, definition: Arc<TestDefinition>) -> Result<Arc<dyn Executable>>;
}

/// Selects the variant from the leading modifier
#[derive(Clone)]
pub struct DefaultTestFactory {
    tracer: TestTracer,
    invoker: Arc<dyn TestInvoker>,
}

impl DefaultTestFactory {
    /// Factory with tracing disabled and the default invoker
    pub fn new() -> Self {
        Self {
            tracer: TestTracer::disabled(),
            invoker: Arc::new(DefaultInvoker),
        }
    }

    /// Use `tracer` for every single execution
    pub fn with_tracer(mut self, tracer: TestTracer) -> Self {
        self.tracer = tracer;
        self
    }

    /// Use `invoker` to call bodies
    pub fn with_invoker(mut self, invoker: Arc<dyn TestInvoker>) -> Self {
        self.invoker = invoker;
        self
    }

    /// Validate `definition` and build its executable tree
    pub fn build(&self, definition: Arc<TestDefinition>) -> Result<Arc<dyn Executable>> {
        definition.validate()?;
        if definition.skip_reason.is_some() {
            return Ok(self.single(definition));
        }
        let executable: Arc<dyn Executable> = match definition.modifiers.first() {
            None => self.single(definition),
            Some(Modifier::Repeat { count, min_passes }) => {
                let (count, min_passes) = (*count, *min_passes);
                Arc::new(RepeatedExecutable::new(definition, count, min_passes, self)?)
            }
            Some(Modifier::Parametrize { parameter_sets }) => {
                let parameter_sets = parameter_sets.clone();
                Arc::new(ParametrizedExecutable::new(definition, &parameter_sets, self)?)
            }
        };
        Ok(executable)
    }

    fn single(&self, definition: Arc<TestDefinition>) -> Arc<dyn Executable> {
        Arc::new(SingleExecutable::new(
            definition,
            self.invoker.clone(),
            self.tracer,
        ))
    }
}

impl Default for DefaultTestFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TestFactory for DefaultTestFactory {
    fn build(&self, definition: Arc<TestDefinition>) -> Result<Arc<dyn Executable>> {
        DefaultTestFactory::build(self, definition)
    }
}

impl fmt::Debug for DefaultTestFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultTestFactory")
            .field("tracer", &self.tracer)
            .finish_non_exhaustive()
    }
}
