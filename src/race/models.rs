//! Task states and race reports

use super::error::RaceError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Lifecycle of a single operation inside a race
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for a concurrency slot
    Queued,
    /// Holds a slot, has not started the operation yet
    Admitted,
    /// The operation is executing
    Running,
    /// The operation succeeded and its result won the race
    Succeeded,
    /// The operation succeeded after another one had already won
    Discarded,
    /// The operation returned an error
    Failed,
    /// Never invoked because the scope was cancelled first
    Skipped,
    /// The task panicked
    Panicked,
}

impl TaskState {
    /// Whether the task can make no further progress
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Queued | Self::Admitted | Self::Running)
    }

    /// Whether the operation was actually invoked
    pub fn was_invoked(&self) -> bool {
        matches!(
            self,
            Self::Running | Self::Succeeded | Self::Discarded | Self::Failed
        )
    }
}

/// Final state of one operation
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    /// Operation name
    pub operation: String,
    /// State at the time the report was taken
    pub state: TaskState,
}

/// What happened during a race
#[derive(Debug, Clone, Serialize)]
pub struct RaceReport {
    /// Identifier used in log spans
    pub race_id: Uuid,
    /// When the race started
    pub started_at: DateTime<Utc>,
    /// Wall time until the race returned, in milliseconds
    pub elapsed_ms: u64,
    /// Concurrency cap in effect
    pub concurrency_cap: usize,
    /// Name of the winning operation
    pub winner: Option<String>,
    /// Per-operation states, in submission order
    pub tasks: Vec<TaskRecord>,
    /// Highest number of operations observed running at once
    pub peak_running: usize,
    /// Number of operations that were invoked
    pub invoked: usize,
}

impl RaceReport {
    /// Number of tasks in the given state
    pub fn count(&self, state: TaskState) -> usize {
        self.tasks.iter().filter(|t| t.state == state).count()
    }

    /// Whether every task had reached a terminal state
    pub fn all_terminal(&self) -> bool {
        self.tasks.iter().all(|t| t.state.is_terminal())
    }
}

/// Result of a race together with its report
#[derive(Debug)]
pub struct RaceOutcome<R, E> {
    pub result: Result<R, RaceError<E>>,
    pub report: RaceReport,
}

impl<R, E> RaceOutcome<R, E> {
    pub fn into_result(self) -> Result<R, RaceError<E>> {
        self.result
    }
}
