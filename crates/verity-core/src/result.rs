//! Execution results

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::TestItem;
use crate::definition::TestDefinition;
use crate::errors::VerityError;
use crate::evidence::AssertionResult;
use crate::identifiers::ExecutionId;
use crate::outcome::Interrupt;

/// Terminal status of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// Body completed and every assertion held
    Passed,
    /// Assertion failure or explicit fail signal
    Failed,
    /// Unexpected defect
    Error,
    /// Skip signal or skip marker
    Skipped,
    /// Expected failure occurred
    Xfailed,
    /// Expected failure did not occur
    Xpassed,
}

impl TestStatus {
    /// FAILED or ERROR
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Error)
    }

    /// Lowercase label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::Skipped => "skipped",
            Self::Xfailed => "xfailed",
            Self::Xpassed => "xpassed",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable form of an error captured on a result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error category, e.g. `fail`, `panic`, `unknown_resource`
    pub kind: String,
    /// Human-readable message
    pub message: String,
}

impl ErrorInfo {
    /// Build from parts
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<&Interrupt> for ErrorInfo {
    fn from(interrupt: &Interrupt) -> Self {
        Self::new(interrupt.kind(), interrupt.message().unwrap_or_default())
    }
}

impl From<&VerityError> for ErrorInfo {
    fn from(err: &VerityError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

/// Outcome of one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Terminal status
    pub status: TestStatus,
    /// Wall time in milliseconds; for aggregates, the sum of child durations
    pub duration_ms: f64,
    /// Captured signal or error
    pub error: Option<ErrorInfo>,
    /// Assertions recorded while the body ran
    pub assertions: Vec<AssertionResult>,
}

impl TestResult {
    /// Result with no error and no assertions
    pub fn new(status: TestStatus, duration_ms: f64) -> Self {
        Self {
            status,
            duration_ms,
            error: None,
            assertions: Vec::new(),
        }
    }

    /// Attach an error
    pub fn with_error(mut self, error: ErrorInfo) -> Self {
        self.error = Some(error);
        self
    }
}

/// One node of an execution tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestExecution {
    /// Generated id of this node
    pub execution_id: ExecutionId,
    /// Descriptive snapshot of the definition
    pub item: TestItem,
    /// Fully qualified test name
    pub full_name: String,
    /// Outcome
    pub result: TestResult,
    /// Trace id minted for the span opened for this node
    pub trace_id: Option<String>,
    /// Child executions in construction order
    pub children: Vec<TestExecution>,
    /// Definition this node was built from; not persisted
    #[serde(skip)]
    pub definition: Option<Arc<TestDefinition>>,
}

impl TestExecution {
    /// Leaf node for `definition`
    pub fn new(
        execution_id: ExecutionId,
        definition: Arc<TestDefinition>,
        result: TestResult,
    ) -> Self {
        Self {
            execution_id,
            item: definition.to_item(),
            full_name: definition.full_name(),
            result,
            trace_id: None,
            children: Vec::new(),
            definition: Some(definition),
        }
    }

    /// Status of this node
    pub fn status(&self) -> TestStatus {
        self.result.status
    }

    /// This node followed by all descendants, depth first
    pub fn walk(&self) -> Vec<&TestExecution> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        out
    }

    /// Leaf executions, the ones that actually ran a body
    pub fn leaves(&self) -> Vec<&TestExecution> {
        self.walk()
            .into_iter()
            .filter(|node| node.children.is_empty())
            .collect()
    }
}
