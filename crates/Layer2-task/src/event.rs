//! Task events
//!
//! Each [`Task`](crate::Task) owns a broadcast channel; the registry
//! connects every managed task to one shared fan-out channel.

use crate::input::InputRequest;
use crate::log::LogLevel;
use crate::state::TaskState;
use crate::task::TaskId;

/// Broadcast channel capacity
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Notifications emitted by a task, tagged with its identity
#[derive(Debug, Clone)]
pub enum TaskEvent {
    StatusChanged {
        task_id: TaskId,
        state: TaskState,
    },

    /// Entry failed; `message` is the failure's own text
    ErrorOccurred {
        task_id: TaskId,
        message: String,
    },

    OutputProduced {
        task_id: TaskId,
        line: String,
        level: LogLevel,
    },

    /// A worker is blocked until text is delivered through `request.reply`
    InputRequested {
        task_id: TaskId,
        request: InputRequest,
    },
}

impl TaskEvent {
    pub fn task_id(&self) -> &TaskId {
        match self {
            TaskEvent::StatusChanged { task_id, .. }
            | TaskEvent::ErrorOccurred { task_id, .. }
            | TaskEvent::OutputProduced { task_id, .. }
            | TaskEvent::InputRequested { task_id, .. } => task_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TaskEvent::StatusChanged { .. } => "status_changed",
            TaskEvent::ErrorOccurred { .. } => "error_occurred",
            TaskEvent::OutputProduced { .. } => "output_produced",
            TaskEvent::InputRequested { .. } => "input_requested",
        }
    }
}
