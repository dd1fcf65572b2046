//! Job state machine
//!
//! ```text
//! Queued ──► Running ──► Completed | Failed | TimedOut
//!    │
//!    └──► Cancelled   (last waiter left before a worker picked it up)
//! ```

use enrich_foundation::Error;
use serde::{Deserialize, Serialize};

/// Possible states of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Waiting for a free worker
    Queued,

    /// Executor is running
    Running,

    /// Executor returned a result
    Completed,

    /// Executor returned an error or panicked
    Failed,

    /// Executor exceeded the job timeout
    TimedOut,

    /// Dropped before execution
    Cancelled,
}

impl JobState {
    /// Check if this is a terminal state (cannot transition further)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::TimedOut | JobState::Cancelled
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, JobState::Running)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, JobState::Queued)
    }

    /// Terminal state for a finished execution
    pub fn from_outcome<T>(outcome: &Result<T, Error>) -> Self {
        match outcome {
            Ok(_) => JobState::Completed,
            Err(Error::TimeoutExceeded { .. }) => JobState::TimedOut,
            Err(_) => JobState::Failed,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            JobState::Queued => "Queued",
            JobState::Running => "Running",
            JobState::Completed => "Completed",
            JobState::Failed => "Failed",
            JobState::TimedOut => "TimedOut",
            JobState::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
