//! Persistence layer for run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

pub use crate::core::ExecutionStatus;
use crate::core::{Pipeline, StepError};
use crate::execution::RunReport;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,

    /// Step document name
    pub pipeline_name: String,

    pub job_name: String,

    pub status: ExecutionStatus,

    pub started_at: DateTime<Utc>,

    /// When the run completed or failed
    pub completed_at: Option<DateTime<Utc>>,

    /// Rendered video, if any
    pub artifact: Option<PathBuf>,

    /// Error that halted the run
    pub error: Option<String>,

    pub completed_steps: usize,

    pub total_steps: usize,
}

impl RunSummary {
    /// Summarize a finished run
    pub fn from_run(pipeline: &Pipeline, job_name: &str, result: &Result<RunReport, StepError>) -> Self {
        let (artifact, error) = match result {
            Ok(report) => (report.artifact.clone(), None),
            Err(e) => (None, Some(e.to_string())),
        };

        RunSummary {
            run_id: pipeline.state.run_id,
            pipeline_name: pipeline.name.clone(),
            job_name: job_name.to_string(),
            status: pipeline.state.status,
            started_at: pipeline.state.started_at.unwrap_or_else(Utc::now),
            completed_at: pipeline.state.completed_at,
            artifact,
            error,
            completed_steps: pipeline.state.completed_steps,
            total_steps: pipeline.state.total_steps,
        }
    }

    /// Run time, once finished
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|end| end - self.started_at)
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save (or replace) a run summary
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// Runs of a job, newest first
    async fn list_runs(&self, job_name: &str) -> Result<Vec<RunSummary>>;

    /// Names of every job with recorded runs, sorted
    async fn list_jobs(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
pub struct InMemoryPersistence {
    runs: RwLock<HashMap<Uuid, RunSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        self.runs.write().await.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, job_name: &str) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let mut result: Vec<RunSummary> = runs
            .values()
            .filter(|run| run.job_name == job_name)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn list_jobs(&self) -> Result<Vec<String>> {
        let runs = self.runs.read().await;
        let mut jobs: Vec<String> = runs.values().map(|run| run.job_name.clone()).collect();
        jobs.sort();
        jobs.dedup();
        Ok(jobs)
    }
}
