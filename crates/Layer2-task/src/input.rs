//! Input proxy
//!
//! [`read_line`] and [`prompt`] replace blocking reads from stdin. From a
//! thread bound to a task they block only that thread: the task emits
//! `InputRequested`, waits on a single-slot reply channel and wakes every
//! poll interval to honour `kill()`. From an unbound thread they read the
//! real stdin.

use crate::event::TaskEvent;
use crate::lifecycle::RunToken;
use crate::log::LogLevel;
use crate::routing;
use crate::task::Task;
use parking_lot::{Condvar, Mutex};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;
use taskhost_foundation::{Error, Result};
use tracing::{debug, warn};

const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(20);

// ============================================================================
// Reply channel
// ============================================================================

/// Capacity-one mailbox shared by a waiting worker and whoever answers it
#[derive(Debug, Default)]
pub(crate) struct InputSlot {
    value: Mutex<Option<String>>,
    ready: Condvar,
}

impl InputSlot {
    /// Non-blocking put; false when the slot is occupied
    fn offer(&self, text: String) -> bool {
        let mut value = self.value.lock();
        if value.is_some() {
            return false;
        }
        *value = Some(text);
        self.ready.notify_all();
        true
    }

    fn take_timeout(&self, timeout: Duration) -> Option<String> {
        let mut value = self.value.lock();
        if value.is_none() {
            let _ = self.ready.wait_for(&mut value, timeout);
        }
        value.take()
    }

    fn drain(&self) -> Option<String> {
        self.value.lock().take()
    }
}

/// Sender half handed out with an [`InputRequest`]
#[derive(Clone)]
pub struct InputReply {
    slot: Arc<InputSlot>,
}

impl InputReply {
    /// Deliver text to the waiting worker; false if a reply is already queued
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.slot.offer(text.into())
    }
}

impl std::fmt::Debug for InputReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("InputReply")
    }
}

/// A worker waiting for one line of text
#[derive(Debug, Clone)]
pub struct InputRequest {
    pub prompt: String,
    /// Entry should be hidden while typed
    pub masked: bool,
    /// Text a front end may prefill
    pub default_text: String,
    pub reply: InputReply,
}

impl InputRequest {
    pub fn respond(&self, text: impl Into<String>) -> bool {
        self.reply.send(text)
    }
}

/// Options for [`prompt_with`]
#[derive(Debug, Clone, Default)]
pub struct PromptOptions {
    pub masked: bool,
    pub default_text: String,
}

impl PromptOptions {
    pub fn masked() -> Self {
        Self {
            masked: true,
            ..Self::default()
        }
    }

    pub fn with_default(mut self, text: impl Into<String>) -> Self {
        self.default_text = text.into();
        self
    }
}

// ============================================================================
// Per-task state
// ============================================================================

#[derive(Debug, Default)]
pub(crate) struct InputState {
    pending: Option<Arc<InputSlot>>,
    waiting: bool,
}

impl InputState {
    pub(crate) fn reset(&mut self) {
        self.pending = None;
        self.waiting = false;
    }
}

/// Clears the task's pending slot on every exit path of a request
struct PendingGuard<'a> {
    task: &'a Task,
    slot: &'a Arc<InputSlot>,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut input = self.task.input.lock();
        if input
            .pending
            .as_ref()
            .map_or(false, |p| Arc::ptr_eq(p, self.slot))
        {
            input.reset();
        }
    }
}

impl Task {
    /// Whether a worker is blocked on input
    pub fn is_waiting_for_input(&self) -> bool {
        self.input.lock().waiting
    }

    /// Deliver text to the pending input request
    ///
    /// No-op returning false when nothing is waiting. An occupied slot is
    /// retried a few times before the text is dropped.
    pub fn submit_input(&self, text: impl Into<String>) -> bool {
        let text = text.into();
        let Some(slot) = self.input.lock().pending.clone() else {
            debug!("No pending input for task {}, ignoring", self.id());
            return false;
        };

        let retries = self.lifecycle().submit_retries.max(1);
        for attempt in 0..retries {
            if slot.offer(text.clone()) {
                return true;
            }
            if attempt + 1 < retries {
                std::thread::sleep(self.lifecycle().submit_retry_interval());
            }
        }
        warn!(
            "Input for task {} dropped: previous reply not consumed",
            self.id()
        );
        false
    }

    /// Block the calling worker until text arrives or the run is cancelled
    pub(crate) fn request_input(
        &self,
        run: &RunToken,
        prompt: &str,
        options: &PromptOptions,
    ) -> Result<String> {
        let slot = Arc::new(InputSlot::default());

        // One pending request per task; concurrent readers queue up here
        loop {
            if run.is_input_canceled() {
                return Err(Error::Cancelled);
            }
            let mut input = self.input.lock();
            if input.pending.is_none() {
                input.pending = Some(Arc::clone(&slot));
                input.waiting = true;
                break;
            }
            drop(input);
            std::thread::sleep(QUEUE_POLL_INTERVAL);
        }
        let _pending = PendingGuard {
            task: self,
            slot: &slot,
        };

        self.emit(TaskEvent::InputRequested {
            task_id: self.id().clone(),
            request: InputRequest {
                prompt: prompt.to_string(),
                masked: options.masked,
                default_text: options.default_text.clone(),
                reply: InputReply {
                    slot: Arc::clone(&slot),
                },
            },
        });

        let poll = self.lifecycle().input_poll_interval();
        loop {
            if run.is_input_canceled() {
                return Err(Error::Cancelled);
            }
            if let Some(text) = slot.take_timeout(poll) {
                if run.is_input_canceled() {
                    return Err(Error::Cancelled);
                }
                return Ok(text);
            }
        }
    }

    /// Unblock a waiting worker; it observes its cancelled run and bails out
    pub(crate) fn cancel_pending_input(&self) {
        let mut input = self.input.lock();
        if let Some(slot) = input.pending.as_ref() {
            slot.drain();
            slot.offer(String::new());
        }
        input.waiting = false;
    }

    /// `prompt` is written to the task log before waiting
    pub(crate) fn prompt_input(
        &self,
        run: &RunToken,
        prompt: &str,
        options: &PromptOptions,
    ) -> Result<String> {
        if !prompt.is_empty() {
            self.append_output(run, LogLevel::Stdout, prompt.to_string());
        }
        let text = self.request_input(run, prompt, options)?;
        Ok(strip_terminator(&text).to_string())
    }
}

fn strip_terminator(text: &str) -> &str {
    text.trim_end_matches(|c: char| c == '\n' || c == '\r')
}

// ============================================================================
// Proxy functions
// ============================================================================

/// Read one line, terminator included
pub fn read_line() -> Result<String> {
    if let Some(binding) = routing::current() {
        if let Some(task) = binding.task() {
            let text = task.request_input(binding.run(), "", &PromptOptions::default())?;
            return Ok(format!("{}\n", strip_terminator(&text)));
        }
    }

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line)
}

/// Show `prompt` and read one line, terminator removed
pub fn prompt(prompt: &str) -> Result<String> {
    prompt_with(prompt, PromptOptions::default())
}

pub fn prompt_with(prompt: &str, options: PromptOptions) -> Result<String> {
    if let Some(binding) = routing::current() {
        if let Some(task) = binding.task() {
            return task.prompt_input(binding.run(), prompt, &options);
        }
    }

    let mut stdout = io::stdout().lock();
    stdout.write_all(prompt.as_bytes())?;
    stdout.flush()?;
    drop(stdout);

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(strip_terminator(&line).to_string())
}
