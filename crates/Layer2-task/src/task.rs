//! Task definition and types

use crate::context::TaskContext;
use crate::event::{TaskEvent, EVENT_CHANNEL_CAPACITY};
use crate::input::InputState;
use crate::lifecycle::{RunToken, WorkerSet};
use crate::log::{LogEntry, LogLevel, TaskLogBuffer, DEFAULT_LOG_CAPACITY};
use crate::process::Subprocess;
use crate::spawn::Timer;
use crate::state::TaskState;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskhost_foundation::{LifecycleConfig, RuntimeConfig, SettingsStore};
use tokio::sync::broadcast;

/// Unique identifier for a task, as declared by its descriptor
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for TaskId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Parameters
// ============================================================================

/// Kind of value a parameter holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    String,
    Integer,
    Float,
    Boolean,
    Select,
    Datetime,
    File,
}

/// A user-editable parameter declared by a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    #[serde(rename = "type")]
    pub kind: ParameterKind,

    #[serde(default)]
    pub label: String,

    #[serde(default)]
    pub description: String,

    /// Default value
    #[serde(default)]
    pub value: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    /// Choices for `select`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<Value>,
}

impl ParameterDef {
    pub fn new(kind: ParameterKind, value: impl Into<Value>) -> Self {
        Self {
            kind,
            label: String::new(),
            description: String::new(),
            value: value.into(),
            min: None,
            max: None,
            options: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn with_options(mut self, options: Vec<Value>) -> Self {
        self.options = options;
        self
    }
}

/// Parameter definitions keyed by parameter name
pub type ParameterDefs = BTreeMap<String, ParameterDef>;

/// Effective parameter values of a run
pub type ParamValues = Map<String, Value>;

// ============================================================================
// TaskEntry
// ============================================================================

/// A loadable unit of work
///
/// `run` executes on a dedicated worker thread. Long-running entries should
/// poll [`TaskContext::is_stopped`] (or use [`TaskContext::sleep`] /
/// [`TaskContext::checkpoint`]) so `kill()` can end them promptly.
pub trait TaskEntry: Send + Sync {
    /// Display name
    fn name(&self) -> &str;

    /// Whether the task runs without an interactive surface of its own
    fn headless(&self) -> bool {
        true
    }

    fn parameters(&self) -> ParameterDefs {
        ParameterDefs::new()
    }

    fn run(&self, ctx: &TaskContext) -> anyhow::Result<()>;
}

/// Listing row for a managed task
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub name: String,
    pub headless: bool,
    pub state: TaskState,
}

// ============================================================================
// Task
// ============================================================================

/// A loaded task and its runtime state
///
/// Lifecycle operations (`start`, `stop`, `kill`, the registration helpers)
/// live in [`crate::lifecycle`]; input handling in [`crate::input`].
pub struct Task {
    id: TaskId,
    entry: Arc<dyn TaskEntry>,
    lifecycle: LifecycleConfig,
    working_dir: Option<PathBuf>,
    settings: Option<Arc<dyn SettingsStore>>,

    pub(crate) state: RwLock<TaskState>,
    pub(crate) generation: AtomicU64,
    pub(crate) run: RwLock<Arc<RunToken>>,
    pub(crate) log: Mutex<TaskLogBuffer>,
    pub(crate) workers: Mutex<WorkerSet>,
    pub(crate) subprocesses: Mutex<Vec<Subprocess>>,
    pub(crate) timers: Mutex<Vec<Timer>>,
    pub(crate) input: Mutex<InputState>,
    pub(crate) params: RwLock<ParamValues>,

    events: broadcast::Sender<TaskEvent>,
    upstream: RwLock<Option<broadcast::Sender<TaskEvent>>>,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, entry: Arc<dyn TaskEntry>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            id: id.into(),
            entry,
            lifecycle: LifecycleConfig::default(),
            working_dir: None,
            settings: None,
            state: RwLock::new(TaskState::Idle),
            generation: AtomicU64::new(0),
            run: RwLock::new(RunToken::idle()),
            log: Mutex::new(TaskLogBuffer::new(DEFAULT_LOG_CAPACITY)),
            workers: Mutex::new(WorkerSet::default()),
            subprocesses: Mutex::new(Vec::new()),
            timers: Mutex::new(Vec::new()),
            input: Mutex::new(InputState::default()),
            params: RwLock::new(ParamValues::new()),
            events,
            upstream: RwLock::new(None),
        }
    }

    /// Apply lifecycle timings and log capacity from a runtime config
    pub fn with_config(self, config: &RuntimeConfig) -> Self {
        self.with_lifecycle(config.lifecycle.clone())
            .with_log_capacity(config.logging.log_capacity)
    }

    pub fn with_lifecycle(mut self, lifecycle: LifecycleConfig) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn with_log_capacity(self, capacity: usize) -> Self {
        *self.log.lock() = TaskLogBuffer::new(capacity);
        self
    }

    pub fn with_settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Directory commands of this task run in
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn name(&self) -> &str {
        self.entry.name()
    }

    pub fn headless(&self) -> bool {
        self.entry.headless()
    }

    pub fn parameters(&self) -> ParameterDefs {
        self.entry.parameters()
    }

    pub(crate) fn entry(&self) -> &Arc<dyn TaskEntry> {
        &self.entry
    }

    pub fn lifecycle(&self) -> &LifecycleConfig {
        &self.lifecycle
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    pub(crate) fn settings(&self) -> Option<&Arc<dyn SettingsStore>> {
        self.settings.as_ref()
    }

    pub fn state(&self) -> TaskState {
        *self.state.read()
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Parameter values of the current (or last) run
    pub fn params(&self) -> ParamValues {
        self.params.read().clone()
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id.clone(),
            name: self.name().to_string(),
            headless: self.headless(),
            state: self.state(),
        }
    }

    /// Block until the task reaches a terminal state
    pub fn wait(&self, timeout: Duration) -> Option<TaskState> {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.state();
            if state.is_terminal() {
                return Some(state);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    // ========================================================================
    // Log
    // ========================================================================

    pub fn log_lines(&self) -> Vec<String> {
        self.log.lock().lines()
    }

    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.log.lock().entries().cloned().collect()
    }

    pub fn log_tail(&self, n: usize) -> Vec<LogEntry> {
        self.log.lock().tail(n)
    }

    /// Append a line on behalf of the current run
    pub fn log_output(&self, line: impl Into<String>) -> bool {
        let run = self.current_run();
        self.append_output(&run, LogLevel::Log, line.into())
    }

    /// Append a completed line produced by `run`
    ///
    /// Dropped once the run is stopped or superseded. The check and the push
    /// happen under the log lock so nothing lands after the terminal line
    /// written by `kill()`.
    pub(crate) fn append_output(&self, run: &RunToken, level: LogLevel, line: String) -> bool {
        let mut log = self.log.lock();
        if run.is_stopped() || run.generation() != self.generation.load(Ordering::Acquire) {
            return false;
        }
        let entry = log.push(level, line);
        self.emit(TaskEvent::OutputProduced {
            task_id: self.id.clone(),
            line: entry.content,
            level,
        });
        true
    }

    /// Append a runtime notice regardless of the stop flag
    pub(crate) fn append_system(&self, line: impl Into<String>) {
        let mut log = self.log.lock();
        let entry = log.push(LogLevel::System, line);
        self.emit(TaskEvent::OutputProduced {
            task_id: self.id.clone(),
            line: entry.content,
            level: LogLevel::System,
        });
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Subscribe to this task's events
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Re-emit every event into a shared channel as well
    pub fn connect_events(&self, upstream: broadcast::Sender<TaskEvent>) {
        *self.upstream.write() = Some(upstream);
    }

    pub fn disconnect_events(&self) {
        self.upstream.write().take();
    }

    pub(crate) fn emit(&self, event: TaskEvent) {
        if let Some(upstream) = self.upstream.read().as_ref() {
            let _ = upstream.send(event.clone());
        }
        let _ = self.events.send(event);
    }

    pub(crate) fn current_run(&self) -> Arc<RunToken> {
        Arc::clone(&self.run.read())
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Idle;

    impl TaskEntry for Idle {
        fn name(&self) -> &str {
            "Idle Task"
        }

        fn parameters(&self) -> ParameterDefs {
            let mut defs = ParameterDefs::new();
            defs.insert(
                "count".into(),
                ParameterDef::new(ParameterKind::Integer, 3).with_range(1.0, 10.0),
            );
            defs
        }

        fn run(&self, _ctx: &TaskContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_new_task_is_idle() {
        let task = Task::new("idle", Arc::new(Idle));
        assert_eq!(task.id().as_str(), "idle");
        assert_eq!(task.name(), "Idle Task");
        assert_eq!(task.state(), TaskState::Idle);
        assert!(task.headless());
        assert!(task.log_lines().is_empty());
        assert_eq!(task.parameters()["count"].value, Value::from(3));
    }

    #[test]
    fn test_parameter_def_from_toml() {
        let def: ParameterDef = toml::from_str(
            r#"
            type = "select"
            label = "Mode"
            value = "fast"
            options = ["fast", "slow"]
            "#,
        )
        .unwrap();

        assert_eq!(def.kind, ParameterKind::Select);
        assert_eq!(def.value, Value::from("fast"));
        assert_eq!(def.options.len(), 2);
        assert!(def.min.is_none());
    }

    #[test]
    fn test_task_id_borrows_as_str() {
        let mut map = std::collections::HashMap::new();
        map.insert(TaskId::from("a"), 1);
        assert_eq!(map.get("a"), Some(&1));
    }

    #[test]
    fn test_upstream_receives_events() {
        let task = Task::new("idle", Arc::new(Idle));
        let (tx, mut rx) = broadcast::channel(8);
        task.connect_events(tx);

        task.append_system("hello");

        match rx.try_recv().unwrap() {
            TaskEvent::OutputProduced { task_id, line, level } => {
                assert_eq!(task_id.as_str(), "idle");
                assert_eq!(line, "hello");
                assert_eq!(level, LogLevel::System);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
