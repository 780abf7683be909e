//! CLI output formatting

use crate::{
    core::{ExecutionStatus, StepState},
    execution::ExecutionEvent,
    persistence::RunSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static FILM: Emoji<'_, '_> = Emoji("🎬 ", "> ");

const PROGRESS_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// Create a progress bar
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::default_bar().template(PROGRESS_TEMPLATE) {
        progress.set_style(style.progress_chars("#>-"));
    }
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Step state with its wall time once finished
pub fn format_step_state(state: &StepState) -> String {
    let label = match state {
        StepState::Pending => style("PENDING").dim(),
        StepState::Running { .. } => style("RUNNING").yellow(),
        StepState::Completed { .. } => style("COMPLETED").green(),
        StepState::Failed { .. } => style("FAILED").red(),
        StepState::Skipped { .. } => style("SKIPPED").dim(),
    };
    match state.elapsed().and_then(|d| d.to_std().ok()) {
        Some(elapsed) => format!("{} {}", label, style(format_duration(elapsed)).dim()),
        None => label.to_string(),
    }
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Format a run summary for display
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.status {
        ExecutionStatus::Completed => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Running => SPINNER,
        ExecutionStatus::Pending => INFO,
    };

    let outcome = match (&summary.artifact, &summary.error) {
        (Some(artifact), _) => style(artifact.display().to_string()).cyan().to_string(),
        (None, Some(error)) => style(error).dim().to_string(),
        (None, None) => String::new(),
    };

    format!(
        "{} {} - {} - {} - {} ({}/{}) {}",
        status_icon,
        style(short_id(&summary.run_id)).dim(),
        style(summary.started_at.format("%Y-%m-%d %H:%M:%S")).dim(),
        style(&summary.job_name).bold(),
        format_status(summary.status),
        summary.completed_steps,
        summary.total_steps,
        outcome
    )
}

/// Format a run event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted {
            run_id,
            pipeline_name,
            total_steps,
        } => format!(
            "{} Starting {} ({}, {} steps)",
            FILM,
            style(pipeline_name).bold(),
            style(short_id(run_id)).dim(),
            total_steps
        ),
        ExecutionEvent::StepStarted { label, .. } => format!("{} {}", SPINNER, style(label).cyan()),
        ExecutionEvent::StepCompleted { label, .. } => format!("{} {}", CHECK, style(label).green()),
        ExecutionEvent::StepFailed { label, error, .. } => {
            format!("{} {}: {}", CROSS, style(label).red(), style(error).dim())
        }
        ExecutionEvent::RunCompleted {
            run_id,
            status,
            artifact,
        } => {
            let status_str = match status {
                ExecutionStatus::Completed => format!("{} completed", style("successfully").green()),
                ExecutionStatus::Failed => style("failed").red().to_string(),
                other => format_status(*other),
            };
            match artifact {
                Some(path) => format!(
                    "{} Run ({}) {} -> {}",
                    INFO,
                    style(short_id(run_id)).dim(),
                    status_str,
                    style(path.display()).cyan()
                ),
                None => format!("{} Run ({}) {}", INFO, style(short_id(run_id)).dim(), status_str),
            }
        }
    }
}

/// Format a duration as `1h 2m 3s`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
