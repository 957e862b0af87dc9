//! Single body invocation

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, Instrument, Span};

use verity_core::context::{with_resolver_context, with_test_context, ResolverContext};
use verity_core::{
    Args, ErrorInfo, ExecutionId, Interrupt, Result, TestContext, TestDefinition, TestExecution,
    TestResult, TestStatus, VerityError,
};

use super::{Executable, ExecutionState, StateCell, TestInvoker, TestTracer};
use crate::resolver::ResourceResolver;

/// How the body ended, before markers are applied
enum BodyOutcome {
    Returned,
    Interrupted(Interrupt),
    Panicked(String),
    Unresolved(ErrorInfo),
}

/// Runs a definition's body exactly once
pub struct SingleExecutable {
    id: ExecutionId,
    definition: Arc<TestDefinition>,
    invoker: Arc<dyn TestInvoker>,
    tracer: TestTracer,
    state: StateCell,
}

impl SingleExecutable {
    /// Executable for `definition`
    pub fn new(
        definition: Arc<TestDefinition>,
        invoker: Arc<dyn TestInvoker>,
        tracer: TestTracer,
    ) -> Self {
        Self {
            id: ExecutionId::new(),
            definition,
            invoker,
            tracer,
            state: StateCell::new(),
        }
    }

    /// Bind bound parameters and resolve every other declared argument
    async fn bind_args(&self, resolver: &ResourceResolver) -> Result<Args> {
        let def = &self.definition;
        let mut args = Args::new();
        for (name, value) in &def.bound_params {
            args.insert_param(name.clone(), value.clone());
        }
        with_resolver_context(ResolverContext::consumer(def.name.clone()), async {
            for name in &def.params {
                if def.bound_params.contains_key(name) {
                    continue;
                }
                let instance = resolver.resolve(name).await?;
                args.insert_resource(name.clone(), instance);
            }
            Ok::<(), VerityError>(())
        })
        .await?;
        Ok(args)
    }

    async fn run_body(&self, resolver: &ResourceResolver) -> BodyOutcome {
        let args = match self.bind_args(resolver).await {
            Ok(args) => args,
            Err(err) => return BodyOutcome::Unresolved(ErrorInfo::from(&err)),
        };
        match AssertUnwindSafe(self.invoker.invoke(&self.definition, args))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => BodyOutcome::Returned,
            Ok(Err(interrupt)) => BodyOutcome::Interrupted(interrupt),
            Err(payload) => BodyOutcome::Panicked(panic_message(payload.as_ref())),
        }
    }

    fn classify(
        &self,
        outcome: BodyOutcome,
        ctx: &TestContext,
    ) -> (TestStatus, Option<ErrorInfo>) {
        let (status, error) = match outcome {
            BodyOutcome::Returned => match ctx.assertions().into_iter().find(|a| !a.passed) {
                Some(failed) => (
                    TestStatus::Failed,
                    Some(ErrorInfo::new(
                        "assertion",
                        failed
                            .error_message
                            .unwrap_or_else(|| format!("assertion failed: {}", failed.expression)),
                    )),
                ),
                None => (TestStatus::Passed, None),
            },
            BodyOutcome::Interrupted(interrupt) => {
                let status = match &interrupt {
                    Interrupt::Skip(_) => TestStatus::Skipped,
                    Interrupt::Fail(_) => TestStatus::Failed,
                    Interrupt::XFail(_) => TestStatus::Xfailed,
                    Interrupt::Error(_) => TestStatus::Error,
                };
                (status, Some(ErrorInfo::from(&interrupt)))
            }
            BodyOutcome::Panicked(message) => {
                (TestStatus::Error, Some(ErrorInfo::new("panic", message)))
            }
            BodyOutcome::Unresolved(error) => (TestStatus::Error, Some(error)),
        };

        let Some(marker) = &self.definition.xfail else {
            return (status, error);
        };
        match status {
            TestStatus::Failed | TestStatus::Error => {
                let message = marker
                    .reason
                    .clone()
                    .or_else(|| error.map(|e| e.message))
                    .unwrap_or_default();
                (TestStatus::Xfailed, Some(ErrorInfo::new("xfail", message)))
            }
            TestStatus::Passed if marker.strict => {
                let reason = marker.reason.as_deref().unwrap_or("expected failure");
                (
                    TestStatus::Failed,
                    Some(ErrorInfo::new("xfail_strict", format!("[XPASS(strict)] {reason}"))),
                )
            }
            TestStatus::Passed => (
                TestStatus::Xpassed,
                marker.reason.clone().map(|r| ErrorInfo::new("xpass", r)),
            ),
            other => (other, error),
        }
    }
}

#[async_trait]
impl Executable for SingleExecutable {
    fn execution_id(&self) -> ExecutionId {
        self.id
    }

    fn definition(&self) -> &Arc<TestDefinition> {
        &self.definition
    }

    fn state(&self) -> ExecutionState {
        self.state.get()
    }

    async fn execute(&self, resolver: Arc<ResourceResolver>) -> Result<TestExecution> {
        self.state.begin(self.id)?;
        let def = &self.definition;

        let span = self.tracer.span(def);
        let trace_id = span.as_ref().and_then(TestTracer::assign_trace_id);

        let result = if let Some(reason) = &def.skip_reason {
            TestResult::new(TestStatus::Skipped, 0.0)
                .with_error(ErrorInfo::new("skip", reason.clone()))
        } else {
            let case_id = self.id.to_string();
            let ctx = TestContext::new(def.to_item(), case_id.clone());
            let started = Instant::now();
            let outcome = with_test_context(ctx.clone(), self.run_body(&resolver))
                .instrument(span.clone().unwrap_or_else(Span::none))
                .await;
            let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

            let (status, error) = self.classify(outcome, &ctx);
            let mut result = TestResult::new(status, duration_ms);
            result.error = error;
            result.assertions = ctx.take_assertions();
            resolver.teardown_case(&case_id).await;
            result
        };

        self.tracer.record(span.as_ref(), &result);
        debug!(
            test = %def.full_name(),
            status = %result.status,
            duration_ms = result.duration_ms,
            "test finished"
        );

        self.state.complete(result.clone());
        let mut execution = TestExecution::new(self.id, def.clone(), result);
        execution.trace_id = trace_id;
        Ok(execution)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "test body panicked".to_string()
    }
}
