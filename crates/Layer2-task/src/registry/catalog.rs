//! Entry type catalog
//!
//! Maps the `type` of a native descriptor to a factory registered by the
//! host. `command` descriptors need no registration.

use super::manifest::{EntrySpec, TaskManifest};
use crate::context::TaskContext;
use crate::entry::CommandEntry;
use crate::task::{ParameterDefs, TaskEntry};
use std::collections::HashMap;
use std::sync::Arc;
use taskhost_foundation::{Error, Result};

type EntryFactory = dyn Fn() -> Arc<dyn TaskEntry> + Send + Sync;

#[derive(Clone, Default)]
pub struct TaskCatalog {
    factories: HashMap<String, Arc<EntryFactory>>,
}

impl TaskCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `type_name`; a later registration replaces it
    pub fn register_type<F>(&mut self, type_name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn TaskEntry> + Send + Sync + 'static,
    {
        self.factories.insert(type_name.into(), Arc::new(factory));
        self
    }

    /// Builder form of [`register_type`](Self::register_type)
    pub fn with_type<F>(mut self, type_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn TaskEntry> + Send + Sync + 'static,
    {
        self.register_type(type_name, factory);
        self
    }

    pub fn has_type(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Instantiate the entry a descriptor names
    pub fn resolve(&self, manifest: &TaskManifest) -> Result<Arc<dyn TaskEntry>> {
        let inner: Arc<dyn TaskEntry> = match &manifest.entry {
            EntrySpec::Native { type_name } => {
                let factory = self.factories.get(type_name).ok_or_else(|| {
                    Error::load(&manifest.id, format!("unknown entry type '{}'", type_name))
                })?;
                factory()
            }
            EntrySpec::Command {
                command,
                program,
                args,
                interactive,
            } => {
                let entry = match (command, program) {
                    (Some(line), _) => CommandEntry::from_command_line(&manifest.name, line)
                        .ok_or_else(|| {
                            Error::load(&manifest.id, format!("cannot parse command {:?}", line))
                        })?,
                    (None, Some(program)) => {
                        CommandEntry::new(&manifest.name, program).with_args(args.iter().cloned())
                    }
                    (None, None) => {
                        return Err(Error::load(&manifest.id, "command entry needs a command"))
                    }
                };
                Arc::new(entry.with_interactive(*interactive))
            }
        };

        Ok(Arc::new(DescribedEntry::new(manifest, inner)))
    }
}

impl std::fmt::Debug for TaskCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCatalog")
            .field("types", &self.type_names())
            .finish()
    }
}

/// Entry whose metadata comes from its descriptor
struct DescribedEntry {
    name: String,
    headless: bool,
    parameters: ParameterDefs,
    inner: Arc<dyn TaskEntry>,
}

impl DescribedEntry {
    fn new(manifest: &TaskManifest, inner: Arc<dyn TaskEntry>) -> Self {
        // Descriptor definitions override same-named ones from the entry
        let mut parameters = inner.parameters();
        parameters.extend(manifest.parameters.clone());
        Self {
            name: manifest.name.clone(),
            headless: manifest.headless,
            parameters,
            inner,
        }
    }
}

impl TaskEntry for DescribedEntry {
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
        self.inner.run(ctx)
    }
}
