//! Ready-made [`TaskEntry`] implementations

mod command;

pub use command::{param_env_name, CommandEntry};

use crate::context::TaskContext;
use crate::task::{ParameterDefs, TaskEntry};
use std::fmt;

type EntryFn = dyn Fn(&TaskContext) -> anyhow::Result<()> + Send + Sync;

/// Entry backed by a closure
pub struct FnEntry {
    name: String,
    headless: bool,
    parameters: ParameterDefs,
    run: Box<EntryFn>,
}

impl FnEntry {
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(&TaskContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            headless: true,
            parameters: ParameterDefs::new(),
            run: Box::new(run),
        }
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_parameters(mut self, parameters: ParameterDefs) -> Self {
        self.parameters = parameters;
        self
    }
}

impl TaskEntry for FnEntry {
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
        (self.run)(ctx)
    }
}

impl fmt::Debug for FnEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnEntry")
            .field("name", &self.name)
            .field("headless", &self.headless)
            .finish()
    }
}
