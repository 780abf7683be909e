use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;
use visuflow::cli::commands::{HistoryCommand, RunCommand, ValidateCommand};
use visuflow::cli::output::*;
use visuflow::cli::{Cli, Command};
use visuflow::core::{JobConfig, StepDocument};
use visuflow::execution::{Engine, ExecutionEvent};
use visuflow::media::{FfmpegEncoder, MediaEncoder};
use visuflow::persistence::{InMemoryPersistence, PersistenceBackend, RunSummary, SqliteRunStore};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_document(cmd).await?,
        Command::Validate(cmd) => validate_document(cmd)?,
        Command::History(cmd) => show_history(cmd).await?,
        Command::Check => check_encoder().await?,
    }

    Ok(())
}

fn load_job_config(cmd: &RunCommand, document: &StepDocument) -> Result<JobConfig> {
    let mut config = match &cmd.config {
        Some(path) => JobConfig::from_file(path)
            .with_context(|| format!("Failed to load job config from {}", path))?,
        None => JobConfig::new(document.name.clone()),
    };

    for (key, value) in &cmd.set {
        config
            .set(key, value)
            .with_context(|| format!("Invalid override {}={}", key, value))?;
        println!(
            "{} Override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }
    if cmd.testing {
        config.testing = true;
    }

    Ok(config)
}

async fn run_document(cmd: &RunCommand) -> Result<()> {
    let document = StepDocument::from_file(&cmd.file)
        .with_context(|| format!("Failed to load step document {}", cmd.file))?;
    println!("{} Loaded document: {}", INFO, style(&document.name).bold());

    let config = load_job_config(cmd, &document)?;
    let job_name = config.job_name.clone();

    let store: Arc<dyn PersistenceBackend> = if cmd.no_history {
        Arc::new(InMemoryPersistence::new())
    } else {
        Arc::new(SqliteRunStore::with_default_path().await?)
    };

    let engine = Engine::new(Arc::new(FfmpegEncoder::default()));
    let mut pipeline = match engine.compile(&document) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            println!("{} {}", CROSS, style(e).red());
            std::process::exit(1);
        }
    };

    let progress = create_progress_bar(pipeline.steps.len());
    let bar = progress.clone();
    engine
        .add_event_handler(move |event| {
            match &event {
                ExecutionEvent::StepCompleted { .. } | ExecutionEvent::StepFailed { .. } => bar.inc(1),
                ExecutionEvent::StepStarted { label, .. } => bar.set_message(label.clone()),
                _ => {}
            }
            bar.println(format_execution_event(&event));
        })
        .await;

    let result = engine.execute(&mut pipeline, config).await;
    progress.finish_and_clear();

    if !cmd.no_history {
        let summary = RunSummary::from_run(&pipeline, &job_name, &result);
        store.save_run(&summary).await?;
        println!(
            "\n{} Run saved to history (ID: {})",
            INFO,
            style(&summary.run_id.to_string()[..8]).dim()
        );
    }

    match result {
        Ok(report) => {
            println!(
                "\n{} {} completed {}",
                CHECK,
                style(&pipeline.name).bold(),
                style("successfully").green()
            );
            if let Some(artifact) = &report.artifact {
                println!("  Video: {}", style(artifact.display()).cyan());
            }
            Ok(())
        }
        Err(e) => {
            println!("\n{} {} {}", CROSS, style(&pipeline.name).bold(), style("failed").red());
            for step in &pipeline.steps {
                println!("  {} {}", format_step_state(&step.state), step.label());
            }
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

fn validate_document(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating step document...", INFO);

    let document = match StepDocument::from_file(&cmd.file) {
        Ok(document) => document,
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(e).red());
            std::process::exit(1);
        }
    };

    let engine = Engine::new(Arc::new(FfmpegEncoder::default()));
    match engine.compile(&document) {
        Ok(pipeline) => {
            println!("{} Step document is valid!", CHECK);
            println!("  Name: {}", style(&pipeline.name).bold());
            println!("  Steps: {}", style(pipeline.steps.len()).cyan());
            for step in &pipeline.steps {
                println!("    {}", step.label());
            }
            println!("  Storing: {}", style(pipeline.storing.len()).cyan());

            if cmd.json {
                println!("\n{}", serde_json::to_string_pretty(&document)?);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(e).red());
            std::process::exit(1);
        }
    }
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = SqliteRunStore::with_default_path().await?;

    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) => print_run_details(&summary, cmd.json)?,
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let mut runs = match &cmd.job {
        Some(job) => store.list_runs(job).await?,
        None => {
            let mut all_runs = Vec::new();
            for job in store.list_jobs().await? {
                all_runs.extend(store.list_runs(&job).await?);
            }
            all_runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all_runs
        }
    };
    runs.truncate(cmd.limit);

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Run history (showing latest {}):", INFO, cmd.limit);
        for summary in &runs {
            println!("  {}", format_run_summary(summary));
        }
    }

    Ok(())
}

fn print_run_details(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Document: {}", style(&summary.pipeline_name).bold());
    println!("  Job: {}", style(&summary.job_name).bold());
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
    }
    if let Some(duration) = summary.duration().and_then(|d| d.to_std().ok()) {
        println!("  Duration: {}", style(format_duration(duration)).dim());
    }
    println!("  Steps: {}/{}", summary.completed_steps, summary.total_steps);
    if let Some(artifact) = &summary.artifact {
        println!("  Video: {}", style(artifact.display()).cyan());
    }
    if let Some(error) = &summary.error {
        println!("  Error: {}", style(error).red());
    }

    Ok(())
}

async fn check_encoder() -> Result<()> {
    let encoder = FfmpegEncoder::default();
    if encoder.is_available().await {
        println!("{} {} and ffprobe are available", CHECK, encoder.name());
        Ok(())
    } else {
        println!(
            "{} {} or ffprobe could not be started; install them and make sure they are on PATH",
            CROSS,
            encoder.name()
        );
        std::process::exit(1);
    }
}
