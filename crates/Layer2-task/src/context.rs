//! Task context handed to [`TaskEntry::run`](crate::TaskEntry::run)
//!
//! Carries the task and run explicitly, so everything done through it works
//! without a routing-table lookup, including from threads the entry creates
//! by other means.

use crate::input::PromptOptions;
use crate::lifecycle::RunToken;
use crate::log::LogLevel;
use crate::process::Subprocess;
use crate::routing::Binding;
use crate::spawn::{self, Timer};
use crate::task::{ParamValues, Task, TaskId};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use taskhost_foundation::{Error, Result};

/// Environment applied to commands built with [`TaskContext::command`]
pub const ENV_HINTS: &[(&str, &str)] = &[
    ("FORCE_COLOR", "1"),
    ("CLICOLOR_FORCE", "1"),
    ("PYTHONUNBUFFERED", "1"),
];

/// Execution context of one run
#[derive(Clone)]
pub struct TaskContext {
    task: Arc<Task>,
    run: Arc<RunToken>,
    params: Arc<ParamValues>,
}

impl TaskContext {
    pub(crate) fn new(task: Arc<Task>, run: Arc<RunToken>) -> Self {
        let params = Arc::new(task.params());
        Self { task, run, params }
    }

    pub fn task_id(&self) -> &TaskId {
        self.task.id()
    }

    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    pub fn generation(&self) -> u64 {
        self.run.generation()
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.task.working_dir()
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    pub fn is_stopped(&self) -> bool {
        self.run.is_stopped()
    }

    /// `Err(Cancelled)` once the run has been stopped
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_stopped() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Sleep that `kill()` cuts short
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        let poll = self.task.lifecycle().input_poll_interval();
        loop {
            self.checkpoint()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::park_timeout((deadline - now).min(poll));
        }
    }

    // ========================================================================
    // Parameters
    // ========================================================================

    pub fn params(&self) -> &ParamValues {
        &self.params
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Typed parameter value; `None` when missing or of the wrong shape
    pub fn param_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.param(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    // ========================================================================
    // Output and input
    // ========================================================================

    /// Append a line to the task log
    pub fn log(&self, line: impl Into<String>) -> bool {
        self.task.append_output(&self.run, LogLevel::Log, line.into())
    }

    pub fn read_line(&self) -> Result<String> {
        let text = self
            .task
            .request_input(&self.run, "", &PromptOptions::default())?;
        Ok(format!("{}\n", text.trim_end_matches(|c: char| c == '\n' || c == '\r')))
    }

    pub fn prompt(&self, prompt: &str) -> Result<String> {
        self.prompt_with(prompt, PromptOptions::default())
    }

    pub fn prompt_with(&self, prompt: &str, options: PromptOptions) -> Result<String> {
        self.task.prompt_input(&self.run, prompt, &options)
    }

    // ========================================================================
    // Workers
    // ========================================================================

    fn binding(&self) -> Binding {
        Binding::new(&self.task, Arc::clone(&self.run))
    }

    /// Spawn a worker bound to this run
    pub fn spawn<F, T>(&self, f: F) -> io::Result<JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        spawn::spawn_bound(thread::Builder::new(), self.binding(), f)
    }

    pub fn spawn_named<F, T>(&self, name: impl Into<String>, f: F) -> io::Result<JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        spawn::spawn_bound(thread::Builder::new().name(name.into()), self.binding(), f)
    }

    /// Delayed callback bound to this run, cancelled by `kill()`
    pub fn timer<F>(&self, delay: Duration, f: F) -> io::Result<Timer>
    where
        F: FnOnce() + Send + 'static,
    {
        Timer::schedule(delay, Some(self.binding()), f)
    }

    // ========================================================================
    // Subprocesses
    // ========================================================================

    pub fn env_hints(&self) -> &'static [(&'static str, &'static str)] {
        ENV_HINTS
    }

    /// Command preset with the colour hints and the task's working directory
    ///
    /// On unix the child leads a new process group, so `kill()` also reaches
    /// whatever it starts in the background.
    pub fn command(&self, program: impl AsRef<OsStr>) -> Command {
        let mut command = Command::new(program);
        command.envs(ENV_HINTS.iter().copied());
        if let Some(dir) = self.working_dir() {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        command
    }

    /// Spawn `command` and register it for termination on `kill()`
    pub fn spawn_process(&self, command: &mut Command) -> Result<Subprocess> {
        self.checkpoint()?;
        let process = Subprocess::new(command.spawn()?);
        self.task.register_subprocess(process.clone());

        if self.is_stopped() {
            let _ = process.kill();
            self.task.unregister_subprocess(&process);
            return Err(Error::Cancelled);
        }
        Ok(process)
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("task", self.task.id())
            .field("generation", &self.run.generation())
            .finish()
    }
}
