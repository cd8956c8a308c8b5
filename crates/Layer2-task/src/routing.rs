//! Routing Table - execution context to owning task
//!
//! Maps the OS thread a piece of code runs on to the task (and the run of
//! that task) it executes for. The output proxies, the input proxy and the
//! spawn interceptor consult it to attribute work that carries no explicit
//! context. Entries are created through [`RoutingTable::bind_current`] and
//! removed when the returned guard drops, whatever way the worker exits.

use crate::lifecycle::RunToken;
use crate::task::Task;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, ThreadId};

static GLOBAL_ROUTES: OnceLock<RoutingTable> = OnceLock::new();

/// What a bound context runs for
#[derive(Clone)]
pub struct Binding {
    task: Weak<Task>,
    run: Arc<RunToken>,
}

impl Binding {
    pub fn new(task: &Arc<Task>, run: Arc<RunToken>) -> Self {
        Self {
            task: Arc::downgrade(task),
            run,
        }
    }

    /// Owning task, if it has not been dropped
    pub fn task(&self) -> Option<Arc<Task>> {
        self.task.upgrade()
    }

    pub fn run(&self) -> &Arc<RunToken> {
        &self.run
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let task = self.task().map(|t| t.id().to_string());
        f.debug_struct("Binding")
            .field("task", &task)
            .field("generation", &self.run.generation())
            .finish()
    }
}

/// Concurrency-safe context → binding map
#[derive(Default)]
pub struct RoutingTable {
    routes: Mutex<HashMap<ThreadId, Binding>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide table used by the proxies
    pub fn global() -> &'static RoutingTable {
        GLOBAL_ROUTES.get_or_init(RoutingTable::new)
    }

    /// Bind a context, returning the binding it replaced
    pub fn bind(&self, context: ThreadId, binding: Binding) -> Option<Binding> {
        self.routes.lock().insert(context, binding)
    }

    pub fn unbind(&self, context: ThreadId) -> Option<Binding> {
        self.routes.lock().remove(&context)
    }

    /// Owning task of a context
    pub fn lookup(&self, context: ThreadId) -> Option<Arc<Task>> {
        self.binding(context).and_then(|b| b.task())
    }

    /// Full binding of a context, if its task is still alive
    pub fn binding(&self, context: ThreadId) -> Option<Binding> {
        let routes = self.routes.lock();
        let binding = routes.get(&context)?;
        if binding.task.strong_count() == 0 {
            return None;
        }
        Some(binding.clone())
    }

    pub fn is_bound(&self, context: ThreadId) -> bool {
        self.binding(context).is_some()
    }

    pub fn len(&self) -> usize {
        self.routes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.lock().is_empty()
    }

    /// Bind the calling thread until the guard drops
    pub fn bind_current(&self, binding: Binding) -> RouteGuard<'_> {
        let context = thread::current().id();
        let previous = self.bind(context, binding);
        RouteGuard {
            table: self,
            context,
            previous,
        }
    }
}

/// Restores the previous binding of a context (or removes it) on drop
pub struct RouteGuard<'a> {
    table: &'a RoutingTable,
    context: ThreadId,
    previous: Option<Binding>,
}

impl RouteGuard<'_> {
    pub fn context(&self) -> ThreadId {
        self.context
    }
}

impl Drop for RouteGuard<'_> {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(previous) => {
                self.table.bind(self.context, previous);
            }
            None => {
                self.table.unbind(self.context);
            }
        }
    }
}

/// Binding of the calling thread in the global table
pub fn current() -> Option<Binding> {
    RoutingTable::global().binding(thread::current().id())
}

/// Task the calling thread runs for
pub fn current_task() -> Option<Arc<Task>> {
    current().and_then(|b| b.task())
}

pub fn is_bound() -> bool {
    current().is_some()
}
