//! # taskhost-task
//!
//! Task runtime for taskhost.
//! Runs user-supplied task entries on dedicated worker threads inside one
//! host process and attributes everything they do to the owning task.
//!
//! ## Features
//!
//! - **Output routing**: stdout/stderr/log writes from task threads land in
//!   the task's log history ([`output`], [`log_sink`])
//! - **Input proxy**: blocking reads become [`TaskEvent::InputRequested`]
//!   events answered with [`Task::submit_input`] ([`input`])
//! - **Spawn interception**: threads and timers created by a task inherit
//!   its binding ([`spawn`])
//! - **Lifecycle control**: `start` / `stop` / `kill` with subprocess
//!   termination and bounded joins ([`lifecycle`])
//! - **Registry**: load, update and uninstall tasks from a directory of
//!   descriptors, with one event fan-out ([`registry`])

pub mod context;
pub mod entry;
pub mod event;
pub mod input;
pub mod lifecycle;
pub mod log;
pub mod log_sink;
pub mod output;
pub mod process;
pub mod registry;
pub mod routing;
pub mod spawn;
pub mod state;
pub mod task;

// Task model
pub use context::{TaskContext, ENV_HINTS};
pub use state::TaskState;
pub use task::{
    ParamValues, ParameterDef, ParameterDefs, ParameterKind, Task, TaskEntry, TaskId, TaskSummary,
};

// Entries
pub use entry::{CommandEntry, FnEntry};

// Events
pub use event::{TaskEvent, EVENT_CHANNEL_CAPACITY};

// Lifecycle
pub use lifecycle::{RunToken, FORCED_STOP_LINE};
pub use process::{terminate_all, Subprocess};
pub use spawn::{Timer, WorkerRecord};

// Routing and proxies
pub use input::{InputReply, InputRequest, PromptOptions};
pub use log::{LogEntry, LogLevel, TaskLogBuffer, DEFAULT_LOG_CAPACITY};
pub use log_sink::{LogFormat, TaskLogLayer};
pub use output::{OutputProxy, ProxyWriter, Stream};
pub use routing::{Binding, RouteGuard, RoutingTable};

// Registry
pub use registry::{
    EntrySpec, LoadFailure, LoadReport, TaskCatalog, TaskManifest, TaskRegistry, MANIFEST_FILE,
};
