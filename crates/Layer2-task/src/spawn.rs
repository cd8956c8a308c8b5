//! Spawn interceptor
//!
//! [`spawn`], [`spawn_named`] and [`Timer::after`] stand in for
//! `std::thread::spawn` and a delayed one-shot callback. Called from a
//! thread that runs on behalf of a task, the new worker re-binds itself to
//! the same task and run as soon as it starts executing and is registered
//! with the task so `kill()` can interrupt, join or cancel it. Called from an
//! unbound thread they behave like their plain counterparts.

use crate::output;
use crate::routing::{self, Binding, RouteGuard, RoutingTable};
use parking_lot::{Condvar, Mutex};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, Thread, ThreadId};
use std::time::{Duration, Instant};

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// Worker records
// ============================================================================

/// Handle on a worker thread tracked by a task
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    id: u64,
    thread: Thread,
    alive: Arc<AtomicBool>,
}

impl WorkerRecord {
    pub(crate) fn new(thread: Thread, alive: Arc<AtomicBool>) -> Self {
        Self {
            id: NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed),
            thread,
            alive,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread.id()
    }

    pub fn name(&self) -> Option<&str> {
        self.thread.name()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Wake the worker out of `TaskContext::sleep` or any other park
    pub fn interrupt(&self) {
        self.thread.unpark();
    }
}

/// Clears a worker's alive flag when its thread exits
pub(crate) struct AliveGuard(Arc<AtomicBool>);

impl AliveGuard {
    pub(crate) fn new(alive: Arc<AtomicBool>) -> Self {
        Self(alive)
    }
}

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Binding of the current thread for the lifetime of the scope
///
/// Residual partial output lines are flushed to the task before the binding
/// is removed.
pub(crate) struct BoundScope {
    _route: RouteGuard<'static>,
}

impl BoundScope {
    pub(crate) fn enter(binding: Binding) -> Self {
        Self {
            _route: RoutingTable::global().bind_current(binding),
        }
    }
}

impl Drop for BoundScope {
    fn drop(&mut self) {
        output::flush_context(thread::current().id());
    }
}

// ============================================================================
// spawn
// ============================================================================

/// Spawn a worker that inherits the caller's task binding
pub fn spawn<F, T>(f: F) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    spawn_with(thread::Builder::new(), f)
}

pub fn spawn_named<F, T>(name: impl Into<String>, f: F) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    spawn_with(thread::Builder::new().name(name.into()), f)
}

fn spawn_with<F, T>(builder: thread::Builder, f: F) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match routing::current() {
        Some(binding) => spawn_bound(builder, binding, f),
        None => builder.spawn(f),
    }
}

pub(crate) fn spawn_bound<F, T>(
    builder: thread::Builder,
    binding: Binding,
    f: F,
) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let alive = Arc::new(AtomicBool::new(true));
    let owner = binding.task();
    let run = Arc::clone(binding.run());

    let worker_alive = Arc::clone(&alive);
    let handle = builder.spawn(move || {
        let _alive = AliveGuard::new(worker_alive);
        let _scope = BoundScope::enter(binding);
        f()
    })?;

    let record = WorkerRecord::new(handle.thread().clone(), alive);
    match owner {
        Some(task) if !run.is_stopped() && task.is_current_run(&run) => {
            task.register_child_worker(record)
        }
        _ => record.interrupt(),
    }
    Ok(handle)
}

// ============================================================================
// Timer
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerState {
    Pending,
    Cancelled,
    Fired,
}

#[derive(Debug)]
struct TimerInner {
    id: u64,
    state: Mutex<TimerState>,
    wake: Condvar,
}

/// Cancellable delayed one-shot callback on its own thread
#[derive(Debug, Clone)]
pub struct Timer {
    inner: Arc<TimerInner>,
}

impl Timer {
    /// Run `f` after `delay`, inheriting the caller's task binding
    pub fn after<F>(delay: Duration, f: F) -> io::Result<Timer>
    where
        F: FnOnce() + Send + 'static,
    {
        Self::schedule(delay, routing::current(), f)
    }

    pub(crate) fn schedule<F>(delay: Duration, binding: Option<Binding>, f: F) -> io::Result<Timer>
    where
        F: FnOnce() + Send + 'static,
    {
        let timer = Timer {
            inner: Arc::new(TimerInner {
                id: NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(TimerState::Pending),
                wake: Condvar::new(),
            }),
        };
        let owner = binding.as_ref().and_then(|b| b.task().map(|t| (t, Arc::clone(b.run()))));

        let alive = Arc::new(AtomicBool::new(true));
        let worker_alive = Arc::clone(&alive);
        let worker_timer = timer.clone();
        let handle = thread::Builder::new()
            .name(format!("task-timer-{}", timer.id()))
            .spawn(move || {
                let _alive = AliveGuard::new(worker_alive);
                if !worker_timer.wait_until_due(delay) {
                    return;
                }
                match binding {
                    Some(binding) => {
                        let _scope = BoundScope::enter(binding);
                        f();
                    }
                    None => f(),
                }
            })?;

        if let Some((task, run)) = owner {
            if run.is_stopped() || !task.is_current_run(&run) {
                timer.cancel();
            } else {
                task.register_timer(timer.clone());
                task.register_child_worker(WorkerRecord::new(handle.thread().clone(), alive));
            }
        }
        Ok(timer)
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Cancel the callback if it has not fired yet
    pub fn cancel(&self) -> bool {
        let mut state = self.inner.state.lock();
        if *state != TimerState::Pending {
            return false;
        }
        *state = TimerState::Cancelled;
        self.inner.wake.notify_all();
        true
    }

    pub fn is_pending(&self) -> bool {
        *self.inner.state.lock() == TimerState::Pending
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.state.lock() == TimerState::Cancelled
    }

    pub fn has_fired(&self) -> bool {
        *self.inner.state.lock() == TimerState::Fired
    }

    /// Blocks until due; false if cancelled first
    fn wait_until_due(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        let mut state = self.inner.state.lock();
        while *state == TimerState::Pending {
            if self.inner.wake.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        if *state == TimerState::Pending {
            *state = TimerState::Fired;
            true
        } else {
            false
        }
    }
}
