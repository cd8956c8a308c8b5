//! Task Settings - Task별 저장 설정
//!
//! `settings.json`에 auto start 플래그와 시작 순서, 목록 순서를 저장하고
//! `params/<id>.json`에 Task별 파라미터 값을 저장한다.

use crate::storage::JsonStore;
use crate::{Error, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// 설정 파일명
pub const SETTINGS_FILE: &str = "settings.json";

/// 시작 순서가 지정되지 않은 Task의 기본값
pub const DEFAULT_START_ORDER: u32 = 999;

fn default_start_order() -> u32 {
    DEFAULT_START_ORDER
}

// ============================================================================
// TaskSettings
// ============================================================================

/// 한 Task에 대해 저장된 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSettings {
    /// 런타임 시작 시 자동 실행 여부
    #[serde(default)]
    pub auto_start: bool,

    /// 자동 실행 순서 (작을수록 먼저)
    #[serde(default = "default_start_order")]
    pub start_order: u32,

    /// 저장된 파라미터 값
    #[serde(default)]
    pub values: Map<String, Value>,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            auto_start: false,
            start_order: DEFAULT_START_ORDER,
            values: Map::new(),
        }
    }
}

impl TaskSettings {
    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn with_start_order(mut self, order: u32) -> Self {
        self.start_order = order;
        self
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// SettingsStore trait
// ============================================================================

/// Task 설정 저장소
///
/// 런타임은 `start()` 시점에 저장된 값을 읽고, uninstall 시 삭제를 요청한다.
pub trait SettingsStore: Send + Sync {
    /// 저장된 설정 로드 (없으면 기본값)
    fn load(&self, task_id: &str) -> Result<TaskSettings>;

    /// 설정 저장
    fn save(&self, task_id: &str, settings: &TaskSettings) -> Result<()>;

    /// Task에 관한 모든 저장 데이터 삭제
    fn remove(&self, task_id: &str) -> Result<()>;

    /// 사용자가 지정한 목록 순서
    fn list_order(&self) -> Result<Vec<String>>;
}

fn validate_id(task_id: &str) -> Result<()> {
    if task_id.is_empty()
        || task_id.contains(|c: char| c == '/' || c == '\\')
        || task_id == "."
        || task_id == ".."
    {
        return Err(Error::InvalidInput(format!("invalid task id: {:?}", task_id)));
    }
    Ok(())
}

// ============================================================================
// JsonSettingsStore
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskFlags {
    #[serde(default)]
    auto_start: bool,
    #[serde(default = "default_start_order")]
    start_order: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    tasks: BTreeMap<String, TaskFlags>,
    #[serde(default)]
    list_order: Vec<String>,
}

/// JSON 파일 기반 설정 저장소
#[derive(Debug)]
pub struct JsonSettingsStore {
    store: JsonStore,
    write_lock: Mutex<()>,
}

impl JsonSettingsStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            store: JsonStore::new(base_dir),
            write_lock: Mutex::new(()),
        }
    }

    /// 글로벌 설정 디렉토리 사용
    pub fn global() -> Result<Self> {
        Ok(Self {
            store: JsonStore::global()?,
            write_lock: Mutex::new(()),
        })
    }

    pub fn store(&self) -> &JsonStore {
        &self.store
    }

    fn params_file(task_id: &str) -> String {
        format!("params/{}.json", task_id)
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self, task_id: &str) -> Result<TaskSettings> {
        validate_id(task_id)?;
        let file: SettingsFile = self.store.load_or_default(SETTINGS_FILE)?;
        let values: Map<String, Value> = self.store.load_or_default(&Self::params_file(task_id))?;

        let mut settings = TaskSettings {
            values,
            ..TaskSettings::default()
        };
        if let Some(flags) = file.tasks.get(task_id) {
            settings.auto_start = flags.auto_start;
            settings.start_order = flags.start_order;
        }
        Ok(settings)
    }

    fn save(&self, task_id: &str, settings: &TaskSettings) -> Result<()> {
        validate_id(task_id)?;
        let _guard = self.write_lock.lock();

        let mut file: SettingsFile = self.store.load_or_default(SETTINGS_FILE)?;
        file.tasks.insert(
            task_id.to_string(),
            TaskFlags {
                auto_start: settings.auto_start,
                start_order: settings.start_order,
            },
        );
        if !file.list_order.iter().any(|id| id == task_id) {
            file.list_order.push(task_id.to_string());
        }
        self.store.save(SETTINGS_FILE, &file)?;
        self.store.save(&Self::params_file(task_id), &settings.values)
    }

    fn remove(&self, task_id: &str) -> Result<()> {
        validate_id(task_id)?;
        let _guard = self.write_lock.lock();

        self.store.remove(&Self::params_file(task_id))?;

        let mut file: SettingsFile = self.store.load_or_default(SETTINGS_FILE)?;
        let had_flags = file.tasks.remove(task_id).is_some();
        let before = file.list_order.len();
        file.list_order.retain(|id| id != task_id);
        if had_flags || before != file.list_order.len() {
            self.store.save(SETTINGS_FILE, &file)?;
        }
        tracing::debug!("Removed stored settings for task {}", task_id);
        Ok(())
    }

    fn list_order(&self) -> Result<Vec<String>> {
        let file: SettingsFile = self.store.load_or_default(SETTINGS_FILE)?;
        Ok(file.list_order)
    }
}

// ============================================================================
// MemorySettingsStore
// ============================================================================

/// 메모리 기반 설정 저장소 (테스트 및 임시 실행용)
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    tasks: RwLock<HashMap<String, TaskSettings>>,
    order: RwLock<Vec<String>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.read().contains_key(task_id)
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self, task_id: &str) -> Result<TaskSettings> {
        Ok(self.tasks.read().get(task_id).cloned().unwrap_or_default())
    }

    fn save(&self, task_id: &str, settings: &TaskSettings) -> Result<()> {
        validate_id(task_id)?;
        self.tasks
            .write()
            .insert(task_id.to_string(), settings.clone());
        let mut order = self.order.write();
        if !order.iter().any(|id| id == task_id) {
            order.push(task_id.to_string());
        }
        Ok(())
    }

    fn remove(&self, task_id: &str) -> Result<()> {
        self.tasks.write().remove(task_id);
        self.order.write().retain(|id| id != task_id);
        Ok(())
    }

    fn list_order(&self) -> Result<Vec<String>> {
        Ok(self.order.read().clone())
    }
}
