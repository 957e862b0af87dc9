//! In-memory run store

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use verity_core::{
    AssertionId, AssertionResult, ExecutionId, MetricSnapshot, PredicateResult, Result, RunId,
};
use verity_engine::VerityRun;

use crate::index::RunIndex;
use crate::{RunStore, RunSummary};

/// Run store kept entirely in process memory
///
/// Clones share the same underlying storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryRunStore {
    index: Arc<RwLock<RunIndex>>,
}

impl MemoryRunStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored runs
    pub async fn len(&self) -> usize {
        self.index.read().await.len()
    }

    /// Whether no run is stored
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn save_run(&self, run: &VerityRun) -> Result<()> {
        let mut index = self.index.write().await;
        index.insert(run.clone());
        debug!(run_id = %run.run_id, "stored run in memory");
        Ok(())
    }

    async fn get_run(&self, run_id: RunId) -> Result<Option<VerityRun>> {
        Ok(self.index.read().await.get(run_id).cloned())
    }

    async fn list_runs(&self, limit: usize) -> Result<Vec<RunSummary>> {
        Ok(self.index.read().await.recent(limit))
    }

    async fn assertions_for_execution(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Vec<AssertionResult>> {
        Ok(self.index.read().await.assertions(execution_id))
    }

    async fn predicates_for_assertion(
        &self,
        assertion_id: AssertionId,
    ) -> Result<Vec<PredicateResult>> {
        Ok(self.index.read().await.predicates(assertion_id))
    }

    async fn metrics_for_run(&self, run_id: RunId) -> Result<Vec<MetricSnapshot>> {
        let index = self.index.read().await;
        Ok(index
            .get(run_id)
            .map(|run| run.metrics.clone())
            .unwrap_or_default())
    }
}
