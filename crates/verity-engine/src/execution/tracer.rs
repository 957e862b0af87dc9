//! Per-test tracing spans

use tracing::field::Empty;
use tracing::Span;
use uuid::Uuid;

use verity_core::{TestDefinition, TestResult};

/// Opens one `verity.test` span per executed test when enabled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestTracer {
    enabled: bool,
}

impl TestTracer {
    /// Tracer that opens spans when `enabled`
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Tracer that never opens spans
    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    /// Whether spans are opened
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Span for one execution of `definition`, `None` when disabled
    pub fn span(&self, definition: &TestDefinition) -> Option<Span> {
        if !self.enabled {
            return None;
        }
        Some(tracing::info_span!(
            "verity.test",
            test.name = %definition.name,
            test.full_name = %definition.full_name(),
            test.module = %definition.module_path,
            test.tags = ?definition.tags,
            test.id_suffix = definition.id_suffix.as_deref().unwrap_or(""),
            test.status = Empty,
            test.duration_ms = Empty,
            test.error = Empty,
            test.trace_id = Empty,
        ))
    }

    /// Mint a trace id for `span` and record it as `test.trace_id`
    ///
    /// Returns `None` when no subscriber is listening. Span ids are
    /// subscriber-local and reused after close, so they are not trace ids.
    pub fn assign_trace_id(span: &Span) -> Option<String> {
        span.id()?;
        let trace_id = Uuid::new_v4().simple().to_string();
        span.record("test.trace_id", trace_id.as_str());
        Some(trace_id)
    }

    /// Record the terminal result on `span`
    pub fn record(&self, span: Option<&Span>, result: &TestResult) {
        let Some(span) = span else {
            return;
        };
        span.record("test.status", result.status.as_str());
        span.record("test.duration_ms", result.duration_ms);
        if let Some(error) = &result.error {
            span.record("test.error", error.message.as_str());
        }
    }
}
