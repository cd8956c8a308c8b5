//! Command entry - a task backed by an external program
//!
//! stdout/stderr of the child are pumped through the output proxies by
//! worker threads bound to the run, so `\r` progress lines and partial
//! writes are handled the same way as in-process output.

use crate::context::TaskContext;
use crate::output::{self, ProxyWriter};
use crate::task::{ParameterDefs, TaskEntry};
use anyhow::bail;
use serde_json::Value;
use std::io::{Read, Write};
use std::process::{ChildStdin, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskhost_foundation::Error;
use tracing::debug;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const FORWARDER_SHUTDOWN: Duration = Duration::from_secs(1);
/// How long output may keep draining after the program exits
const OUTPUT_DRAIN: Duration = Duration::from_millis(500);

/// Runs `program args..` for the lifetime of the task
#[derive(Debug, Clone)]
pub struct CommandEntry {
    name: String,
    program: String,
    args: Vec<String>,
    headless: bool,
    interactive: bool,
    parameters: ParameterDefs,
}

impl CommandEntry {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            headless: true,
            interactive: false,
            parameters: ParameterDefs::new(),
        }
    }

    /// Split a shell-style command line into program and arguments
    pub fn from_command_line(name: impl Into<String>, line: &str) -> Option<Self> {
        let mut words = shlex::split(line)?.into_iter();
        let program = words.next()?;
        Some(Self::new(name, program).with_args(words))
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Forward input-proxy lines to the child's stdin
    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_parameters(mut self, parameters: ParameterDefs) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl TaskEntry for CommandEntry {
    fn name(&self) -> &str {
        &self.name
    }

    fn headless(&self) -> bool {
        self.headless
    }

    fn parameters(&self) -> ParameterDefs {
        self.parameters.clone()
    }

    fn run(&self, ctx: &TaskContext) -> anyhow::Result<()> {
        let mut command = ctx.command(&self.program);
        command
            .args(&self.args)
            .stdin(if self.interactive {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in ctx.params() {
            command.env(param_env_name(key), param_env_value(value));
        }

        let process = match ctx.spawn_process(&mut command) {
            Ok(process) => process,
            Err(Error::Cancelled) => return Err(Error::Cancelled.into()),
            Err(e) => bail!("failed to start {}: {}", self.program, e),
        };

        let detached = Arc::new(AtomicBool::new(false));
        let mut pumps = Vec::new();
        if let Some(stdout) = process.take_stdout() {
            let detached = Arc::clone(&detached);
            pumps.push(ctx.spawn_named(format!("{}-stdout", ctx.task_id()), move || {
                pump(stdout, output::stdout(), &detached)
            })?);
        }
        if let Some(stderr) = process.take_stderr() {
            let detached = Arc::clone(&detached);
            pumps.push(ctx.spawn_named(format!("{}-stderr", ctx.task_id()), move || {
                pump(stderr, output::stderr(), &detached)
            })?);
        }

        let done = Arc::new(AtomicBool::new(false));
        let forwarder = match process.take_stdin() {
            Some(stdin) => {
                let forward_ctx = ctx.clone();
                let forward_done = Arc::clone(&done);
                Some(ctx.spawn_named(format!("{}-stdin", ctx.task_id()), move || {
                    forward_input(&forward_ctx, stdin, &forward_done)
                })?)
            }
            None => None,
        };

        let status = loop {
            if let Some(status) = process.try_wait()? {
                break status;
            }
            ctx.sleep(EXIT_POLL_INTERVAL)?;
        };

        // Background children may hold the pipes open long after the
        // program itself is gone
        let deadline = Instant::now() + OUTPUT_DRAIN;
        while pumps.iter().any(|p| !p.is_finished()) && Instant::now() < deadline {
            ctx.sleep(Duration::from_millis(10))?;
        }
        let (finished, draining): (Vec<_>, Vec<_>) =
            pumps.into_iter().partition(|p| p.is_finished());
        for pump in finished {
            let _ = pump.join();
        }
        if !draining.is_empty() {
            detached.store(true, Ordering::SeqCst);
            debug!(
                "{}: output still open after exit, detaching {} reader(s)",
                self.program,
                draining.len()
            );
        }

        done.store(true, Ordering::SeqCst);
        if let Some(forwarder) = forwarder {
            let deadline = Instant::now() + FORWARDER_SHUTDOWN;
            while !forwarder.is_finished() && Instant::now() < deadline {
                ctx.task().cancel_pending_input();
                std::thread::sleep(Duration::from_millis(20));
            }
        }
        ctx.task().unregister_subprocess(&process);

        if !status.success() {
            bail!("{} exited with {}", self.program, status);
        }
        Ok(())
    }
}

fn pump(mut source: impl Read, mut sink: ProxyWriter, detached: &AtomicBool) {
    let mut buf = [0u8; 4096];
    loop {
        match source.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) if detached.load(Ordering::SeqCst) => return,
            Ok(n) => {
                let _ = sink.write_all(&buf[..n]);
            }
        }
    }
    let _ = sink.flush();
}

fn forward_input(ctx: &TaskContext, mut stdin: ChildStdin, done: &AtomicBool) {
    while !done.load(Ordering::SeqCst) {
        let Ok(line) = ctx.read_line() else {
            break;
        };
        if done.load(Ordering::SeqCst) {
            break;
        }
        if stdin
            .write_all(line.as_bytes())
            .and_then(|_| stdin.flush())
            .is_err()
        {
            break;
        }
    }
}

/// `interval` -> `TASKHOST_PARAM_INTERVAL`
pub fn param_env_name(key: &str) -> String {
    let key: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("TASKHOST_PARAM_{}", key)
}

fn param_env_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
