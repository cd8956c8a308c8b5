//! Task Registry - loads, updates and uninstalls tasks and fans out their events

use super::catalog::TaskCatalog;
use super::discovery::{self, is_reserved};
use super::manifest::TaskManifest;
use crate::event::{TaskEvent, EVENT_CHANNEL_CAPACITY};
use crate::output;
use crate::task::{Task, TaskEntry, TaskId, TaskSummary};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use taskhost_foundation::{Error, JsonSettingsStore, Result, RuntimeConfig, SettingsStore};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

/// Where a loaded task came from
#[derive(Debug, Clone)]
struct Descriptor {
    dir: PathBuf,
    manifest: TaskManifest,
}

/// A candidate that could not be loaded
#[derive(Debug)]
pub struct LoadFailure {
    pub path: PathBuf,
    pub error: Error,
}

/// Outcome of [`TaskRegistry::load`]
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<TaskId>,
    pub failures: Vec<LoadFailure>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Registry of managed tasks
#[derive(Clone)]
pub struct TaskRegistry {
    tasks_dir: PathBuf,
    catalog: Arc<TaskCatalog>,
    settings: Arc<dyn SettingsStore>,
    config: Arc<RuntimeConfig>,

    tasks: Arc<RwLock<HashMap<TaskId, Arc<Task>>>>,
    descriptors: Arc<RwLock<HashMap<TaskId, Descriptor>>>,
    events: broadcast::Sender<TaskEvent>,
}

impl TaskRegistry {
    /// Create a registry over `tasks_dir`; installs the output proxies
    pub fn new(
        tasks_dir: impl Into<PathBuf>,
        catalog: TaskCatalog,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        output::install();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            tasks_dir: tasks_dir.into(),
            catalog: Arc::new(catalog),
            settings,
            config: Arc::new(RuntimeConfig::default()),
            tasks: Arc::new(RwLock::new(HashMap::new())),
            descriptors: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    /// Registry with directories and settings resolved from `config`
    pub fn from_config(config: RuntimeConfig, catalog: TaskCatalog) -> Result<Self> {
        let tasks_dir = config.resolved_tasks_dir()?;
        let settings = Arc::new(JsonSettingsStore::new(config.resolved_settings_dir()?));
        Ok(Self::new(tasks_dir, catalog, settings).with_config(config))
    }

    /// Lifecycle timings and log capacity given to every task built afterwards
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn tasks_dir(&self) -> &Path {
        &self.tasks_dir
    }

    pub fn catalog(&self) -> &TaskCatalog {
        &self.catalog
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    /// Events of every managed task
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Load every task under the tasks directory
    ///
    /// Candidates that fail are reported, not fatal. Identities already
    /// managed are rejected as duplicates.
    pub async fn load(&self) -> Result<LoadReport> {
        let mut report = LoadReport::default();

        for dir in discovery::discover(&self.tasks_dir).await? {
            match self.load_dir(&dir).await {
                Ok(id) => {
                    debug!("Loaded task {} from {}", id, dir.display());
                    report.loaded.push(id);
                }
                Err(error) => {
                    warn!("{}", error);
                    report.failures.push(LoadFailure { path: dir, error });
                }
            }
        }

        info!(
            "Loaded {} task(s), {} failed",
            report.loaded.len(),
            report.failures.len()
        );
        Ok(report)
    }

    async fn load_dir(&self, dir: &Path) -> Result<TaskId> {
        let manifest = TaskManifest::read(dir).await?;
        let id = TaskId::new(manifest.id.clone());
        if self.tasks.read().await.contains_key(&id) {
            return Err(Error::load(id.as_str(), "duplicate task id"));
        }

        let entry = self.catalog.resolve(&manifest)?;
        let task = self.build(id.clone(), entry, Some(dir));
        self.store(task, Some(Descriptor {
            dir: dir.to_path_buf(),
            manifest,
        }))
        .await?;
        Ok(id)
    }

    /// Register an entry that has no descriptor on disk
    pub async fn register(
        &self,
        id: impl Into<TaskId>,
        entry: Arc<dyn TaskEntry>,
    ) -> Result<Arc<Task>> {
        let id = id.into();
        let task = self.build(id, entry, None);
        self.store(Arc::clone(&task), None).await?;
        Ok(task)
    }

    fn build(&self, id: TaskId, entry: Arc<dyn TaskEntry>, dir: Option<&Path>) -> Arc<Task> {
        let mut task = Task::new(id, entry)
            .with_config(&self.config)
            .with_settings(Arc::clone(&self.settings));
        if let Some(dir) = dir {
            task = task.with_working_dir(dir);
        }
        task.connect_events(self.events.clone());
        Arc::new(task)
    }

    async fn store(&self, task: Arc<Task>, descriptor: Option<Descriptor>) -> Result<()> {
        let id = task.id().clone();
        {
            let mut tasks = self.tasks.write().await;
            if tasks.contains_key(&id) {
                task.disconnect_events();
                return Err(Error::load(id.as_str(), "duplicate task id"));
            }
            tasks.insert(id.clone(), task);
        }
        if let Some(descriptor) = descriptor {
            self.descriptors.write().await.insert(id, descriptor);
        }
        Ok(())
    }

    /// Replace a task with a fresh instance read from its descriptor
    ///
    /// Persisted settings are untouched. If the descriptor no longer loads,
    /// the task stays unregistered and the load error is returned.
    pub async fn update(&self, id: &str) -> Result<Arc<Task>> {
        let old = self.require(id).await?;
        kill_blocking(Arc::clone(&old)).await?;

        let dir = self
            .descriptors
            .write()
            .await
            .remove(id)
            .map(|d| d.dir)
            .unwrap_or_else(|| self.tasks_dir.join(id));
        self.tasks.write().await.remove(id);
        old.disconnect_events();

        let manifest = TaskManifest::read(&dir).await?;
        if manifest.id != id {
            return Err(Error::load(
                id,
                format!("descriptor now declares id '{}'", manifest.id),
            ));
        }
        let entry = self.catalog.resolve(&manifest)?;
        let task = self.build(TaskId::new(id), entry, Some(&dir));
        self.store(Arc::clone(&task), Some(Descriptor { dir, manifest }))
            .await?;

        info!("Updated task {}", id);
        Ok(task)
    }

    /// Kill a task, forget it and delete its directory and settings
    ///
    /// The task is removed from memory even when on-disk cleanup fails;
    /// the first cleanup error is returned.
    pub async fn uninstall(&self, id: &str) -> Result<()> {
        let task = self.tasks.read().await.get(id).cloned();
        let descriptor = self.descriptors.read().await.get(id).cloned();
        if task.is_none() && descriptor.is_none() {
            return Err(Error::NotFound(format!("task '{}'", id)));
        }

        let kill_result = match &task {
            Some(task) => kill_blocking(Arc::clone(task)).await,
            None => Ok(()),
        };

        self.tasks.write().await.remove(id);
        self.descriptors.write().await.remove(id);
        if let Some(task) = &task {
            task.disconnect_events();
        }

        let dir = descriptor
            .map(|d| d.dir)
            .unwrap_or_else(|| self.tasks_dir.join(id));
        let dir_result = self.remove_task_dir(&dir).await;
        let settings_result = self.settings.remove(id);

        info!("Uninstalled task {}", id);
        kill_result.and(dir_result).and(settings_result)
    }

    async fn remove_task_dir(&self, dir: &Path) -> Result<()> {
        let reserved = dir
            .file_name()
            .map_or(true, |name| is_reserved(&name.to_string_lossy()));
        if reserved || dir.parent() != Some(self.tasks_dir.as_path()) {
            warn!("Not removing {}: outside the tasks directory", dir.display());
            return Ok(());
        }
        if !tokio::fs::try_exists(dir).await? {
            return Ok(());
        }
        tokio::fs::remove_dir_all(dir).await.map_err(|e| {
            Error::Storage(format!("failed to remove {}: {}", dir.display(), e))
        })
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn get(&self, id: &str) -> Option<Arc<Task>> {
        self.tasks.read().await.get(id).cloned()
    }

    async fn require(&self, id: &str) -> Result<Arc<Task>> {
        self.get(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("task '{}'", id)))
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.tasks.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// Directory a task was loaded from
    pub async fn task_dir(&self, id: &str) -> Option<PathBuf> {
        self.descriptors.read().await.get(id).map(|d| d.dir.clone())
    }

    pub async fn manifest(&self, id: &str) -> Option<TaskManifest> {
        self.descriptors
            .read()
            .await
            .get(id)
            .map(|d| d.manifest.clone())
    }

    /// Tasks in the user's list order, then by id
    pub async fn list(&self) -> Vec<TaskSummary> {
        let order = self.settings.list_order().unwrap_or_else(|e| {
            warn!("Failed to read list order: {}", e);
            Vec::new()
        });
        let position = |id: &TaskId| {
            order
                .iter()
                .position(|o| o == id.as_str())
                .unwrap_or(usize::MAX)
        };

        let mut summaries: Vec<_> = self
            .tasks
            .read()
            .await
            .values()
            .map(|t| t.summary())
            .collect();
        summaries.sort_by(|a, b| {
            position(&a.id)
                .cmp(&position(&b.id))
                .then_with(|| a.id.cmp(&b.id))
        });
        summaries
    }

    // ========================================================================
    // Commands
    // ========================================================================

    pub async fn start(&self, id: &str) -> Result<()> {
        self.require(id).await?.start()
    }

    /// Same as [`kill`](Self::kill)
    pub async fn stop(&self, id: &str) -> Result<()> {
        self.kill(id).await
    }

    pub async fn kill(&self, id: &str) -> Result<()> {
        let task = self.require(id).await?;
        kill_blocking(task).await
    }

    /// Deliver text to the task's pending input request
    pub async fn submit_input(&self, id: &str, text: impl Into<String>) -> Result<bool> {
        let task = self.require(id).await?;
        let text = text.into();
        tokio::task::spawn_blocking(move || task.submit_input(text))
            .await
            .map_err(|e| Error::Internal(e.to_string()))
    }

    /// Start every idle or finished task
    pub async fn start_all(&self) -> Vec<TaskId> {
        let mut started = Vec::new();
        for summary in self.list().await {
            if summary.state.is_running() {
                continue;
            }
            match self.start(summary.id.as_str()).await {
                Ok(()) => started.push(summary.id),
                Err(e) => warn!("Failed to start task {}: {}", summary.id, e),
            }
        }
        started
    }

    /// Kill every running task, concurrently
    pub async fn stop_all(&self) {
        let running: Vec<_> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.is_running())
            .cloned()
            .collect();

        let kills = running.into_iter().map(|task| async move {
            let id = task.id().clone();
            if let Err(e) = kill_blocking(task).await {
                warn!("Failed to stop task {}: {}", id, e);
            }
        });
        futures::future::join_all(kills).await;
    }

    /// Start the tasks whose settings enable auto start, by start order
    pub async fn auto_start(&self) -> Vec<TaskId> {
        let mut candidates = Vec::new();
        for id in self.tasks.read().await.keys() {
            match self.settings.load(id.as_str()) {
                Ok(settings) if settings.auto_start => {
                    candidates.push((settings.start_order, id.clone()))
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to read settings for task {}: {}", id, e),
            }
        }
        candidates.sort();

        let mut started = Vec::new();
        for (_, id) in candidates {
            match self.start(id.as_str()).await {
                Ok(()) => started.push(id),
                Err(e) => warn!("Failed to auto start task {}: {}", id, e),
            }
        }
        if !started.is_empty() {
            info!("Auto started {} task(s)", started.len());
        }
        started
    }
}

/// `kill()` joins worker threads, so it runs off the async executor
async fn kill_blocking(task: Arc<Task>) -> Result<()> {
    tokio::task::spawn_blocking(move || task.kill())
        .await
        .map_err(|e| Error::Internal(e.to_string()))
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks_dir", &self.tasks_dir)
            .field("catalog", &self.catalog)
            .finish()
    }
}
