//! Run loop
//!
//! [`Runner::run`] builds every definition up front (so invalid modifiers fail
//! before anything executes), then executes top-level executables with bounded
//! concurrency. Results come back in input order. Once the failure count
//! reaches `maxfail`, no further definitions are started.

mod config;
mod environment;
mod model;
mod reporter;

pub use config::{RunnerConfig, DEFAULT_CONCURRENCY_CAP, ENV_PREFIX, MAX_CONCURRENCY};
pub use environment::{filter_env, mask, RunEnvironment};
pub use model::{RunResult, StatusCounts, VerityRun};
pub use reporter::{LogReporter, Reporter};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use verity_core::{
    ErrorInfo, Result, RunId, TestDefinition, TestExecution, TestResult, TestStatus, VerityError,
};

use crate::execution::{DefaultTestFactory, Executable, TestInvoker, TestTracer};
use crate::resolver::{ResourceRegistry, ResourceResolver};

/// Executes collections of test definitions
pub struct Runner {
    config: RunnerConfig,
    resolver: Arc<ResourceResolver>,
    factory: DefaultTestFactory,
    reporters: Vec<Arc<dyn Reporter>>,
}

impl Runner {
    /// Runner over `registry`; fails when the configuration or the resource
    /// graph is invalid
    pub fn new(config: RunnerConfig, registry: ResourceRegistry) -> Result<Self> {
        config.validate()?;
        registry.validate()?;
        let factory = DefaultTestFactory::new().with_tracer(TestTracer::new(config.enable_tracing));
        Ok(Self {
            config,
            resolver: Arc::new(ResourceResolver::new(registry)),
            factory,
            reporters: Vec::new(),
        })
    }

    /// Add a reporter
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    /// Replace the body invoker
    pub fn with_invoker(mut self, invoker: Arc<dyn TestInvoker>) -> Self {
        self.factory = self.factory.with_invoker(invoker);
        self
    }

    /// Configuration in use
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Resolver shared by every execution of this runner
    pub fn resolver(&self) -> &Arc<ResourceResolver> {
        &self.resolver
    }

    /// Execute `definitions` and collect the run
    pub async fn run(&self, definitions: Vec<TestDefinition>) -> Result<VerityRun> {
        let run_id = RunId::new();
        let start_time = Utc::now();
        let started = Instant::now();
        let environment = RunEnvironment::capture(&self.config);

        let executables = definitions
            .into_iter()
            .map(|def| self.factory.build(Arc::new(def)))
            .collect::<Result<Vec<_>>>()?;

        info!(%run_id, count = executables.len(), "starting run");
        for reporter in &self.reporters {
            reporter.on_collection_complete(executables.len()).await;
        }

        self.resolver.clear();
        let (executions, stopped_early) = self.execute_all(&executables).await?;
        let metrics = self.resolver.metric_snapshots();
        self.resolver.teardown().await;

        let run = VerityRun {
            run_id,
            start_time,
            end_time: Utc::now(),
            environment,
            result: RunResult::new(
                executions,
                started.elapsed().as_secs_f64() * 1000.0,
                stopped_early,
            ),
            metrics,
        };
        for reporter in &self.reporters {
            reporter.on_run_complete(&run).await;
        }
        Ok(run)
    }

    async fn execute_all(
        &self,
        executables: &[Arc<dyn Executable>],
    ) -> Result<(Vec<TestExecution>, bool)> {
        let semaphore = Arc::new(Semaphore::new(self.config.effective_concurrency()));
        let maxfail = self.config.effective_maxfail();
        let failures = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let reporters: Arc<[Arc<dyn Reporter>]> = self.reporters.clone().into();
        let timeout = self.config.timeout();

        let mut set = JoinSet::new();
        let mut started = 0;
        for (index, executable) in executables.iter().enumerate() {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| VerityError::internal(format!("scheduler closed: {e}")))?;
            if stop.load(Ordering::SeqCst) {
                break;
            }
            started += 1;

            let executable = executable.clone();
            let resolver = self.resolver.clone();
            let failures = failures.clone();
            let stop = stop.clone();
            let reporters = reporters.clone();
            set.spawn(async move {
                let execution = execute_one(&executable, resolver, timeout).await;
                if execution.status().is_failure() {
                    let count = failures.fetch_add(1, Ordering::SeqCst) + 1;
                    if maxfail.is_some_and(|max| count >= max) {
                        stop.store(true, Ordering::SeqCst);
                    }
                }
                for reporter in reporters.iter() {
                    reporter.on_test_complete(&execution).await;
                }
                drop(permit);
                (index, execution)
            });
        }

        let mut slots: Vec<Option<TestExecution>> = vec![None; started];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, execution)) => slots[index] = Some(execution),
                Err(err) => warn!(error = %err, "test task failed"),
            }
        }
        let executions: Vec<TestExecution> = slots
            .into_iter()
            .zip(executables)
            .map(|(slot, executable)| {
                slot.unwrap_or_else(|| {
                    failed_execution(
                        executable,
                        ErrorInfo::new("panic", "test task terminated abnormally"),
                    )
                })
            })
            .collect();

        let stopped_early = started < executables.len();
        if stopped_early {
            let count = failures.load(Ordering::SeqCst);
            for reporter in &self.reporters {
                reporter.on_run_stopped_early(count).await;
            }
        }
        Ok((executions, stopped_early))
    }
}

async fn execute_one(
    executable: &Arc<dyn Executable>,
    resolver: Arc<ResourceResolver>,
    timeout: Option<Duration>,
) -> TestExecution {
    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, executable.execute(resolver)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    test = %executable.definition().full_name(),
                    timeout_ms = limit.as_millis() as u64,
                    "test timed out"
                );
                return failed_execution(
                    executable,
                    ErrorInfo::new("timeout", format!("timed out after {}ms", limit.as_millis())),
                );
            }
        },
        None => executable.execute(resolver).await,
    };
    outcome.unwrap_or_else(|err| failed_execution(executable, ErrorInfo::from(&err)))
}

fn failed_execution(executable: &Arc<dyn Executable>, error: ErrorInfo) -> TestExecution {
    TestExecution::new(
        executable.execution_id(),
        executable.definition().clone(),
        TestResult::new(TestStatus::Error, 0.0).with_error(error),
    )
}
