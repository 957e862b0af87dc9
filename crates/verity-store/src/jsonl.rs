//! Append-only JSON Lines run store
//!
//! Each saved run is appended as one JSON document on its own line. Opening a
//! store replays the file into memory; a later line for the same run id
//! replaces an earlier one. Lines that fail to parse (for example a write cut
//! short by a crash) are skipped with a warning, and a partial last line is
//! terminated before anything new is appended.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use verity_core::{
    AssertionId, AssertionResult, ExecutionId, MetricSnapshot, PredicateResult, Result, RunId,
    VerityError,
};
use verity_engine::VerityRun;

use crate::index::RunIndex;
use crate::{RunStore, RunSummary};

/// Run store backed by a JSON Lines file
#[derive(Debug)]
pub struct JsonlRunStore {
    path: PathBuf,
    file: Mutex<File>,
    index: RwLock<RunIndex>,
}

impl JsonlRunStore {
    /// Open the store at `path`, creating the file and its parent directory
    /// when missing
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                VerityError::storage(format!("failed to create {}: {e}", parent.display()))
            })?;
        }

        let (index, torn_tail) = load(&path).await?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| VerityError::storage(format!("failed to open {}: {e}", path.display())))?;
        // terminate a partial last record so the next append starts a fresh line
        if torn_tail {
            warn!(path = %path.display(), "terminating partial last record");
            file.write_all(b"\n").await?;
            file.flush().await?;
        }

        info!(path = %path.display(), runs = index.len(), "opened run store");
        Ok(Self {
            path,
            file: Mutex::new(file),
            index: RwLock::new(index),
        })
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Replay the file into an index; the flag is set when the file does not end
/// with a newline
async fn load(path: &Path) -> Result<(RunIndex, bool)> {
    let text = match fs::read_to_string(path).await {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Ok((RunIndex::default(), false))
        }
        Err(err) => {
            return Err(VerityError::storage(format!(
                "failed to read {}: {err}",
                path.display()
            )))
        }
    };

    let mut index = RunIndex::default();
    for (number, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<VerityRun>(line) {
            Ok(run) => index.insert(run),
            Err(err) => warn!(
                path = %path.display(),
                line = number + 1,
                error = %err,
                "skipping unreadable run record"
            ),
        }
    }
    let torn_tail = !text.is_empty() && !text.ends_with('\n');
    Ok((index, torn_tail))
}

#[async_trait]
impl RunStore for JsonlRunStore {
    async fn save_run(&self, run: &VerityRun) -> Result<()> {
        let mut line = serde_json::to_string(run)?;
        line.push('\n');
        {
            let mut file = self.file.lock().await;
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
        }
        self.index.write().await.insert(run.clone());
        debug!(run_id = %run.run_id, bytes = line.len(), "appended run");
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
