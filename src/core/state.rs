//! Run and step state

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Pending,
    Running,
    /// Every step and every `storing` entry succeeded
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
        ]
        .into_iter()
        .find(|status| status.as_str() == s)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

/// Where a step stands within one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StepState {
    Pending,
    Running { started_at: DateTime<Utc> },
    Completed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    /// The run halts at the first failed step
    Failed {
        error: String,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    /// Not reached because an earlier step failed
    Skipped { reason: String },
}

impl StepState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepState::Pending | StepState::Running { .. })
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match self {
            StepState::Running { started_at }
            | StepState::Completed { started_at, .. }
            | StepState::Failed { started_at, .. } => Some(*started_at),
            StepState::Pending | StepState::Skipped { .. } => None,
        }
    }

    /// Wall time of a finished step
    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            StepState::Completed {
                started_at,
                completed_at: ended,
            }
            | StepState::Failed {
                started_at,
                failed_at: ended,
                ..
            } => Some(*ended - *started_at),
            _ => None,
        }
    }
}

/// Bookkeeping of one run of a compiled document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Exposed to templates as `_run_id`; names the run's temp directory
    pub run_id: Uuid,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub skipped_steps: usize,
}

impl RunState {
    pub fn new() -> Self {
        Self::with_run_id(Uuid::new_v4())
    }

    pub fn with_run_id(run_id: Uuid) -> Self {
        Self {
            run_id,
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_steps: 0,
            completed_steps: 0,
            failed_steps: 0,
            skipped_steps: 0,
        }
    }

    pub fn start(&mut self, total_steps: usize) {
        *self = Self {
            status: ExecutionStatus::Running,
            started_at: Some(Utc::now()),
            total_steps,
            ..Self::with_run_id(self.run_id)
        };
    }

    /// Close the run as completed or failed
    pub fn finish(&mut self, status: ExecutionStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    /// Recount step outcomes from their states
    pub fn tally<'a>(&mut self, states: impl IntoIterator<Item = &'a StepState>) {
        let (mut completed, mut failed, mut skipped) = (0, 0, 0);
        for state in states {
            match state {
                StepState::Completed { .. } => completed += 1,
                StepState::Failed { .. } => failed += 1,
                StepState::Skipped { .. } => skipped += 1,
                StepState::Pending | StepState::Running { .. } => {}
            }
        }
        self.completed_steps = completed;
        self.failed_steps = failed;
        self.skipped_steps = skipped;
    }

    /// Share of steps that ran to an outcome, between 0 and 1
    pub fn progress(&self) -> f64 {
        match self.total_steps {
            0 => 0.0,
            total => (self.completed_steps + self.failed_steps) as f64 / total as f64,
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
