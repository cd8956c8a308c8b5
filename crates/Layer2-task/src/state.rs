//! Task state machine
//!
//! ```text
//! Idle -> Starting -> Running -> Stopping -> Stopped
//!                        \-> Erred
//! ```
//! `Stopped` and `Erred` hold until the next `start()`.

use serde::{Deserialize, Serialize};

/// Possible states of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Loaded, never started
    Idle,

    /// `start()` is preparing a new run
    Starting,

    /// Worker is executing the entry
    Running,

    /// `kill()` is tearing the run down
    Stopping,

    /// Run finished normally or was stopped
    Stopped,

    /// Entry failed
    Erred,
}

impl Default for TaskState {
    fn default() -> Self {
        Self::Idle
    }
}

impl TaskState {
    /// Check if this is a terminal state (nothing runs until the next start)
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Stopped | TaskState::Erred)
    }

    /// Check if a run is live (a second `start()` would be a no-op)
    pub fn is_running(&self) -> bool {
        matches!(self, TaskState::Starting | TaskState::Running)
    }

    /// Get display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            TaskState::Idle => "Idle",
            TaskState::Starting => "Starting",
            TaskState::Running => "Running",
            TaskState::Stopping => "Stopping",
            TaskState::Stopped => "Stopped",
            TaskState::Erred => "Erred",
        }
    }

    /// Get a symbol for the state
    pub fn symbol(&self) -> &'static str {
        match self {
            TaskState::Idle => "◯",
            TaskState::Starting => "◎",
            TaskState::Running => "⟳",
            TaskState::Stopping => "…",
            TaskState::Stopped => "■",
            TaskState::Erred => "✗",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(TaskState::Running.is_running());
        assert!(TaskState::Starting.is_running());
        assert!(!TaskState::Stopping.is_running());
        assert!(TaskState::Stopped.is_terminal());
        assert!(TaskState::Erred.is_terminal());
        assert!(!TaskState::Idle.is_terminal());
        assert_eq!(TaskState::default(), TaskState::Idle);
        assert_eq!(TaskState::Erred.to_string(), "Erred");
    }
}
