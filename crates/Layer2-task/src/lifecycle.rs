//! Worker lifecycle controller
//!
//! Every `start()` opens a new run identified by a [`RunToken`]. The worker
//! thread, its inherited descendants and its timers all hold the token of
//! the run they belong to, so a cancelled run stays cancelled even after the
//! task is restarted.

use crate::context::TaskContext;
use crate::event::TaskEvent;
use crate::log::LogLevel;
use crate::process::{self, Subprocess};
use crate::routing::Binding;
use crate::spawn::{AliveGuard, BoundScope, Timer, WorkerRecord};
use crate::state::TaskState;
use crate::task::{ParamValues, Task};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use taskhost_foundation::{Error, Result};
use tracing::{debug, error, info, warn};

/// Terminal line written by `kill()`
pub const FORCED_STOP_LINE: &str = "Task forcefully stopped";

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

// ============================================================================
// RunToken
// ============================================================================

/// Cancellation state of one run
#[derive(Debug)]
pub struct RunToken {
    generation: u64,
    stopped: AtomicBool,
    input_canceled: AtomicBool,
}

impl RunToken {
    pub(crate) fn new(generation: u64) -> Arc<Self> {
        Arc::new(Self {
            generation,
            stopped: AtomicBool::new(false),
            input_canceled: AtomicBool::new(false),
        })
    }

    /// Token of a task that has never started
    pub(crate) fn idle() -> Arc<Self> {
        Self::new(0)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_input_canceled(&self) -> bool {
        self.input_canceled.load(Ordering::SeqCst)
    }

    pub(crate) fn cancel(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.input_canceled.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// Workers
// ============================================================================

struct MainWorker {
    record: WorkerRecord,
    handle: JoinHandle<()>,
}

/// Worker threads tracked for the current run
#[derive(Default)]
pub(crate) struct WorkerSet {
    main: Option<MainWorker>,
    children: Vec<WorkerRecord>,
}

impl WorkerSet {
    fn clear(&mut self) {
        self.main = None;
        self.children.clear();
    }

    fn records(&self) -> impl Iterator<Item = &WorkerRecord> {
        self.main
            .iter()
            .map(|m| &m.record)
            .chain(self.children.iter())
    }
}

// ============================================================================
// Task lifecycle
// ============================================================================

impl Task {
    /// Start a new run on a dedicated worker thread
    ///
    /// No-op (with a warning) while a run is live.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let run = {
            let mut state = self.state.write();
            if state.is_running() {
                warn!("Task {} is already running", self.id());
                return Ok(());
            }
            *state = TaskState::Starting;

            let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
            let run = RunToken::new(generation);
            *self.run.write() = Arc::clone(&run);

            self.log.lock().clear();
            self.input.lock().reset();
            self.workers.lock().clear();
            self.subprocesses.lock().clear();
            self.timers.lock().clear();
            run
        };

        let params = self.resolve_params();

        // A kill() that landed while the run was being prepared has already
        // moved the task to Stopped; the run must not come back to life.
        let mut state = self.state.write();
        if run.is_stopped() || !self.is_current_run(&run) {
            debug!(
                "Task {} run {} was stopped before its worker started",
                self.id(),
                run.generation()
            );
            return Ok(());
        }
        *self.params.write() = params;

        self.emit(TaskEvent::StatusChanged {
            task_id: self.id().clone(),
            state: TaskState::Running,
        });
        *state = TaskState::Running;
        info!("Starting task {} (run {})", self.id(), run.generation());

        // Spawned under the state lock so kill() finds the worker registered
        let alive = Arc::new(AtomicBool::new(true));
        let worker_alive = Arc::clone(&alive);
        let worker_task = Arc::clone(self);
        let worker_run = Arc::clone(&run);
        let spawned = thread::Builder::new()
            .name(format!("task-{}", self.id()))
            .spawn(move || {
                let _alive = AliveGuard::new(worker_alive);
                worker_task.run_worker(worker_run);
            });

        match spawned {
            Ok(handle) => {
                let record = WorkerRecord::new(handle.thread().clone(), alive);
                self.workers.lock().main = Some(MainWorker { record, handle });
                Ok(())
            }
            Err(e) => {
                let message = format!("Failed to spawn worker: {}", e);
                error!("Task {}: {}", self.id(), message);
                self.emit(TaskEvent::ErrorOccurred {
                    task_id: self.id().clone(),
                    message: message.clone(),
                });
                self.emit(TaskEvent::StatusChanged {
                    task_id: self.id().clone(),
                    state: TaskState::Erred,
                });
                *state = TaskState::Erred;
                Err(Error::Task(message))
            }
        }
    }

    /// Stop the task; always as forceful as [`Task::kill`]
    pub fn stop(&self) {
        self.kill();
    }

    /// Forcefully end the current run
    ///
    /// Returns after the join budget at the latest. Workers that never poll
    /// their cancellation state are detached; anything they print afterwards
    /// is dropped.
    pub fn kill(&self) {
        let run = self.current_run();
        run.cancel();
        {
            let mut state = self.state.write();
            if state.is_running() {
                *state = TaskState::Stopping;
            }
        }
        debug!("Killing task {} (run {})", self.id(), run.generation());

        self.cancel_pending_input();
        self.interrupt_workers();

        let subprocesses = std::mem::take(&mut *self.subprocesses.lock());
        process::terminate_all(&subprocesses, self.lifecycle().subprocess_grace());

        let timers = std::mem::take(&mut *self.timers.lock());
        for timer in &timers {
            timer.cancel();
        }

        self.join_workers(self.lifecycle().join_budget());

        let current = {
            let mut state = self.state.write();
            let current = self.is_current_run(&run);
            if current {
                self.emit(TaskEvent::StatusChanged {
                    task_id: self.id().clone(),
                    state: TaskState::Stopped,
                });
                *state = TaskState::Stopped;
            }
            current
        };
        if current {
            self.append_system(FORCED_STOP_LINE);
            info!("Task {} stopped", self.id());
        }
    }

    pub(crate) fn is_current_run(&self, run: &RunToken) -> bool {
        run.generation() == self.generation.load(Ordering::Acquire)
    }

    // ========================================================================
    // Registration
    // ========================================================================

    pub fn register_subprocess(&self, process: Subprocess) {
        let mut list = self.subprocesses.lock();
        list.retain(|p| p.is_running());
        list.push(process);
    }

    pub fn unregister_subprocess(&self, process: &Subprocess) {
        self.subprocesses.lock().retain(|p| p.id() != process.id());
    }

    pub fn register_child_worker(&self, record: WorkerRecord) {
        let mut workers = self.workers.lock();
        workers.children.retain(|w| w.is_alive());
        workers.children.push(record);
    }

    pub fn unregister_child_worker(&self, id: u64) {
        self.workers.lock().children.retain(|w| w.id() != id);
    }

    pub fn register_timer(&self, timer: Timer) {
        let mut timers = self.timers.lock();
        timers.retain(|t| t.is_pending());
        timers.push(timer);
    }

    pub fn unregister_timer(&self, timer: &Timer) {
        self.timers.lock().retain(|t| t.id() != timer.id());
    }

    /// Live worker threads of the current run, main worker included
    pub fn worker_count(&self) -> usize {
        self.workers.lock().records().filter(|w| w.is_alive()).count()
    }

    pub fn subprocess_count(&self) -> usize {
        self.subprocesses
            .lock()
            .iter()
            .filter(|p| p.is_running())
            .count()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn resolve_params(&self) -> ParamValues {
        let mut values: ParamValues = self
            .parameters()
            .into_iter()
            .map(|(key, def)| (key, def.value))
            .collect();

        if let Some(store) = self.settings() {
            match store.load(self.id().as_str()) {
                Ok(saved) => values.extend(saved.values),
                Err(e) => warn!("Failed to load saved parameters for {}: {}", self.id(), e),
            }
        }
        values
    }

    fn run_worker(self: Arc<Self>, run: Arc<RunToken>) {
        let outcome = {
            let _scope = BoundScope::enter(Binding::new(&self, Arc::clone(&run)));
            let ctx = TaskContext::new(Arc::clone(&self), Arc::clone(&run));
            panic::catch_unwind(AssertUnwindSafe(|| self.entry().run(&ctx)))
        };
        self.finish_run(&run, outcome);
    }

    fn finish_run(&self, run: &RunToken, outcome: thread::Result<anyhow::Result<()>>) {
        // Failures after a kill are fallout of the stop itself
        let failure = run_failure(outcome).filter(|_| !run.is_stopped());

        if let Some(err) = &failure {
            self.append_output(run, LogLevel::Stderr, format!("Error: {}", err));
        }

        // Emitted under the state lock: whoever observes the new state can
        // already receive its events.
        let mut state = self.state.write();
        if !self.is_current_run(run) || *state != TaskState::Running {
            debug!(
                "Task {} run {} ended after being superseded",
                self.id(),
                run.generation()
            );
            return;
        }
        let next = match failure {
            Some(err) => {
                error!("Task {} failed: {}", self.id(), err);
                self.emit(TaskEvent::ErrorOccurred {
                    task_id: self.id().clone(),
                    message: err.to_string(),
                });
                TaskState::Erred
            }
            None => {
                info!("Task {} finished", self.id());
                TaskState::Stopped
            }
        };
        self.emit(TaskEvent::StatusChanged {
            task_id: self.id().clone(),
            state: next,
        });
        *state = next;
    }

    fn interrupt_workers(&self) {
        for worker in self.workers.lock().records() {
            worker.interrupt();
        }
    }

    fn join_workers(&self, budget: Duration) {
        let (main, children) = {
            let mut workers = self.workers.lock();
            (workers.main.take(), std::mem::take(&mut workers.children))
        };

        let me = thread::current().id();
        let records: Vec<&WorkerRecord> = main
            .iter()
            .map(|m| &m.record)
            .chain(children.iter())
            .filter(|w| w.thread_id() != me)
            .collect();

        let deadline = Instant::now() + budget;
        while records.iter().any(|w| w.is_alive()) && Instant::now() < deadline {
            thread::sleep(JOIN_POLL_INTERVAL);
        }

        let stragglers: Vec<&&WorkerRecord> = records.iter().filter(|w| w.is_alive()).collect();
        if !stragglers.is_empty() {
            for worker in &stragglers {
                worker.interrupt();
            }
            warn!(
                "Task {}: {} worker(s) still running after {:?}, detaching",
                self.id(),
                stragglers.len(),
                budget
            );
        }

        if let Some(main) = main {
            if !main.record.is_alive() && main.record.thread_id() != me {
                let _ = main.handle.join();
            }
        }
    }
}

/// Whether an entry failure is a deliberate stop
pub(crate) fn is_cancellation(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| matches!(cause.downcast_ref::<Error>(), Some(Error::Cancelled)))
}

/// Worker-boundary view of how an entry ended; `None` for success or a stop
pub(crate) fn run_failure(outcome: thread::Result<anyhow::Result<()>>) -> Option<Error> {
    match outcome {
        Ok(Ok(())) => None,
        Ok(Err(err)) if is_cancellation(&err) => None,
        Ok(Err(err)) => Some(Error::Runtime(err.to_string())),
        Err(payload) => Some(Error::Runtime(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}
