//! Classification of task status updates.

use std::fmt;

use fleet_events::{TaskState, TaskStatus, TaskStatusSource};
use fleet_id::TaskId;
use serde::Serialize;

/// Which call the update loop is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Waiting on an `ACCEPT`; a running task counts as done.
    Launch,
    /// Waiting on a `KILL`; the task must actually stop.
    Kill,
}

impl Completion {
    /// Whether `state` ends the update loop.
    pub fn is_done(self, state: TaskState) -> bool {
        match self {
            Self::Launch => state == TaskState::Running || state.is_terminal(),
            Self::Kill => state.is_terminal(),
        }
    }
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Launch => "launch",
            Self::Kill => "kill",
        })
    }
}

/// Structured diagnostic for a task that ended in an error state.
///
/// Displays as a single-line JSON object so it can be logged or returned
/// to API clients verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskFailure {
    #[serde(skip)]
    pub task_id: TaskId,
    pub state: TaskState,
    pub message: String,
    pub source: Option<TaskStatusSource>,
    pub reason: Option<String>,
    pub healthy: Option<bool>,
}

impl TaskFailure {
    fn from_status(status: &TaskStatus) -> Self {
        Self {
            task_id: status.task_id.clone(),
            state: status.state,
            message: status.message.clone().unwrap_or_default(),
            source: status.source,
            reason: status.reason.clone(),
            healthy: status.healthy,
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{{\"state\":\"{}\"}}", self.state),
        }
    }
}

impl std::error::Error for TaskFailure {}

/// Returns a diagnostic if `status` is one of the error states.
pub fn detect_failure(status: &TaskStatus) -> Option<TaskFailure> {
    status
        .state
        .is_failure()
        .then(|| TaskFailure::from_status(status))
}
