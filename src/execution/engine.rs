//! Main execution engine - compiles step documents and runs them in order

use crate::{
    core::{
        config::{JobConfig, StepConfig, StepDocument},
        context::EvaluationContext,
        error::{StepError, StepResult},
        scope::Scope,
        ExecutionStatus, Pipeline, Step, StepAction, StepState,
    },
    execution::registry::DispatchTable,
    fetch::{Fetcher, MemoryCache},
    media::{self, Assembler, MediaEncoder},
    transform,
};
use chrono::{Local, Utc};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events that can occur during a run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        pipeline_name: String,
        total_steps: usize,
    },
    StepStarted {
        index: usize,
        label: String,
    },
    StepCompleted {
        index: usize,
        label: String,
    },
    StepFailed {
        index: usize,
        label: String,
        error: String,
    },
    RunCompleted {
        run_id: Uuid,
        status: ExecutionStatus,
        artifact: Option<PathBuf>,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Outcome of a successful run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub job_name: String,
    /// Path of the rendered video, when the document assembles one
    pub artifact: Option<PathBuf>,
    /// Memory cache entries written after the run
    pub stored: Vec<PathBuf>,
    /// Final context data
    pub data: Value,
}

/// Step execution engine
///
/// Holds the dispatch table, built once here and never modified afterwards, the
/// HTTP client shared by fetch steps and the media encoder. Runs share nothing
/// else, so one engine can drive several runs concurrently.
pub struct Engine {
    table: DispatchTable,
    fetcher: Fetcher,
    encoder: Arc<dyn MediaEncoder>,
    event_handlers: Arc<Mutex<Vec<EventHandler>>>,
}

impl Engine {
    pub fn new(encoder: Arc<dyn MediaEncoder>) -> Self {
        Self::with_fetcher(encoder, Fetcher::default())
    }

    pub fn with_fetcher(encoder: Arc<dyn MediaEncoder>, fetcher: Fetcher) -> Self {
        Self {
            table: DispatchTable::with_builtin_types(),
            fetcher,
            encoder,
            event_handlers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn table(&self) -> &DispatchTable {
        &self.table
    }

    pub fn encoder(&self) -> &dyn MediaEncoder {
        self.encoder.as_ref()
    }

    /// Add an event handler
    pub async fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.lock().await.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    async fn emit_event(&self, event: ExecutionEvent) {
        let handlers = self.event_handlers.lock().await;
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    /// Type-check a document against the dispatch table
    pub fn compile(&self, document: &StepDocument) -> StepResult<Pipeline> {
        Pipeline::compile(document, &self.table)
    }

    /// Run every step in order
    ///
    /// The first failing step halts the run; later steps are marked skipped and the
    /// error is returned unchanged. After a successful run the `storing` entries are
    /// written to the memory cache. The run's temp directory is removed either way.
    pub async fn execute(&self, pipeline: &mut Pipeline, config: JobConfig) -> StepResult<RunReport> {
        if pipeline.state.status != ExecutionStatus::Pending {
            pipeline.reset();
        }

        let run_id = pipeline.state.run_id;
        let mut ctx = EvaluationContext::with_run_id(config, run_id);

        info!(%run_id, job = %ctx.config().job_name, "Starting run: {}", pipeline.name);
        pipeline.state.start(pipeline.steps.len());
        self.emit_event(ExecutionEvent::RunStarted {
            run_id,
            pipeline_name: pipeline.name.clone(),
            total_steps: pipeline.steps.len(),
        })
        .await;

        let result = self.run_steps(pipeline, &mut ctx).await;
        let result = match result {
            Ok(artifact) => self.store(pipeline, &ctx).await.map(|stored| (artifact, stored)),
            Err(e) => Err(e),
        };

        if let Err(e) = media::cleanup_temp_dir(&media::run_temp_dir(&ctx)).await {
            warn!(%run_id, "Could not remove temp directory: {}", e);
        }

        pipeline.tally();
        match result {
            Ok((artifact, stored)) => {
                pipeline.state.finish(ExecutionStatus::Completed);
                info!(%run_id, "Run finished: {}", pipeline.name);
                self.emit_event(ExecutionEvent::RunCompleted {
                    run_id,
                    status: ExecutionStatus::Completed,
                    artifact: artifact.clone(),
                })
                .await;

                Ok(RunReport {
                    run_id,
                    pipeline_name: pipeline.name.clone(),
                    job_name: ctx.config().job_name.clone(),
                    artifact,
                    stored,
                    data: ctx.into_data(),
                })
            }
            Err(e) => {
                pipeline.state.finish(ExecutionStatus::Failed);
                error!(%run_id, "Run failed: {}", e);
                self.emit_event(ExecutionEvent::RunCompleted {
                    run_id,
                    status: ExecutionStatus::Failed,
                    artifact: None,
                })
                .await;
                Err(e)
            }
        }
    }

    async fn run_steps(
        &self,
        pipeline: &mut Pipeline,
        ctx: &mut EvaluationContext,
    ) -> StepResult<Option<PathBuf>> {
        let scope = Scope::root();
        let mut artifact = None;

        for index in 0..pipeline.steps.len() {
            let started_at = Utc::now();
            let step = &mut pipeline.steps[index];
            step.state = StepState::Running { started_at };
            let label = step.label();

            debug!("Running step {}", label);
            self.emit_event(ExecutionEvent::StepStarted {
                index,
                label: label.clone(),
            })
            .await;

            match self.execute_step(&pipeline.steps[index], ctx, &scope).await {
                Ok(path) => {
                    if path.is_some() {
                        artifact = path;
                    }
                    pipeline.steps[index].state = StepState::Completed {
                        started_at,
                        completed_at: Utc::now(),
                    };
                    self.emit_event(ExecutionEvent::StepCompleted { index, label }).await;
                }
                Err(e) => {
                    warn!("Step {} failed: {}", label, e);
                    pipeline.steps[index].state = StepState::Failed {
                        error: e.to_string(),
                        started_at,
                        failed_at: Utc::now(),
                    };
                    for later in &mut pipeline.steps[index + 1..] {
                        later.state = StepState::Skipped {
                            reason: format!("step {} failed", label),
                        };
                    }
                    self.emit_event(ExecutionEvent::StepFailed {
                        index,
                        label,
                        error: e.to_string(),
                    })
                    .await;
                    return Err(e);
                }
            }
        }

        Ok(artifact)
    }

    /// Execute one compiled step; returns the artifact path of sequence steps
    pub async fn execute_step(
        &self,
        step: &Step,
        ctx: &mut EvaluationContext,
        scope: &Scope<'_>,
    ) -> StepResult<Option<PathBuf>> {
        match &step.action {
            StepAction::Fetch { key, spec } => {
                let value = self.fetcher.fetch(spec, ctx, scope).await?;
                ctx.insert_data(key, value, scope)
                    .map_err(|source| StepError::Fetch {
                        step_type: spec.kind.name().to_string(),
                        name: spec.name.clone(),
                        source: Box::new(source),
                    })?;
                Ok(None)
            }
            StepAction::Transform(spec) => {
                transform::apply(spec, ctx, scope)?;
                Ok(None)
            }
            StepAction::Transforms(specs) => {
                transform::apply_all(specs, ctx, scope)?;
                Ok(None)
            }
            StepAction::Sequence(spec) => {
                let output = Assembler::new(self.encoder.as_ref())
                    .assemble(spec, ctx, scope)
                    .await?;
                ctx.insert_data(&spec.key, Value::String(output.display().to_string()), scope)
                    .map_err(|source| StepError::Sequence {
                        step_type: spec.kind.name().to_string(),
                        source: Box::new(source),
                    })?;
                Ok(Some(output))
            }
        }
    }

    /// Compile and run a single step against an existing context
    pub async fn run_step(
        &self,
        config: &StepConfig,
        ctx: &mut EvaluationContext,
        scope: &Scope<'_>,
    ) -> StepResult<Option<PathBuf>> {
        let step = Step::compile(0, config, &self.table)?;
        self.execute_step(&step, ctx, scope).await
    }

    /// Write the `storing` values of a finished run to the memory cache
    async fn store(&self, pipeline: &Pipeline, ctx: &EvaluationContext) -> StepResult<Vec<PathBuf>> {
        let config = ctx.config();
        let cache = MemoryCache::new(&config.memory_path);
        let scope = Scope::root();
        let now = Local::now();

        let mut stored = Vec::with_capacity(pipeline.storing.len());
        for entry in &pipeline.storing {
            let value = ctx.get_data(&entry.key, &scope)?;
            stored.push(cache.store(&config.job_name, &entry.name, &value, now).await?);
        }
        if !stored.is_empty() {
            info!("Stored {} memory snapshot(s)", stored.len());
        }
        Ok(stored)
    }
}

/// Whether an error came from a step type no registry knows
pub fn is_unknown_type(error: &StepError) -> bool {
    matches!(error.root_cause(), StepError::StepType { .. })
}
