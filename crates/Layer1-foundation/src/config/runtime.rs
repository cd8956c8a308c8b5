//! Runtime Config - Task 런타임 설정
//!
//! `taskhost.toml` 에서 로드하며 모든 항목은 기본값을 가진다.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 설정 파일명
pub const RUNTIME_CONFIG_FILE: &str = "taskhost.toml";

/// 기본 로그 포맷
pub const DEFAULT_LOG_FORMAT: &str = "{time} - {target} - {level} - {message}";

/// 기본 시간 포맷 (chrono strftime)
pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

// ============================================================================
// RuntimeConfig (통합)
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Task 디렉토리 (없으면 `<config_dir>/taskhost/tasks`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks_dir: Option<PathBuf>,

    /// 설정 저장 디렉토리 (없으면 `<config_dir>/taskhost`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings_dir: Option<PathBuf>,

    pub lifecycle: LifecycleConfig,

    pub logging: LoggingConfig,
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// TOML 파일 로드
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// 파일이 없으면 기본값
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("No runtime config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// `<config_dir>/taskhost`
    pub fn base_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("taskhost"))
            .ok_or_else(|| Error::Config("Cannot find config directory".to_string()))
    }

    /// 기본 설정 파일 위치
    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join(RUNTIME_CONFIG_FILE))
    }

    pub fn resolved_tasks_dir(&self) -> Result<PathBuf> {
        match &self.tasks_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::base_dir()?.join("tasks")),
        }
    }

    pub fn resolved_settings_dir(&self) -> Result<PathBuf> {
        match &self.settings_dir {
            Some(dir) => Ok(dir.clone()),
            None => Self::base_dir(),
        }
    }

    pub fn with_tasks_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tasks_dir = Some(dir.into());
        self
    }

    pub fn with_settings_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.settings_dir = Some(dir.into());
        self
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// 중지/입력 관련 타이밍
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// 입력 대기 중 중지 플래그 확인 주기
    pub input_poll_interval_ms: u64,

    /// kill 시 worker 종료 대기 한도
    pub join_budget_ms: u64,

    /// 서브프로세스 SIGTERM 이후 강제 종료까지 유예 시간
    pub subprocess_grace_ms: u64,

    /// submit_input 재시도 횟수
    pub submit_retries: u32,

    pub submit_retry_interval_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            input_poll_interval_ms: 200,
            join_budget_ms: 300,
            subprocess_grace_ms: 300,
            submit_retries: 5,
            submit_retry_interval_ms: 20,
        }
    }
}

impl LifecycleConfig {
    pub fn input_poll_interval(&self) -> Duration {
        Duration::from_millis(self.input_poll_interval_ms.max(1))
    }

    pub fn join_budget(&self) -> Duration {
        Duration::from_millis(self.join_budget_ms)
    }

    pub fn subprocess_grace(&self) -> Duration {
        Duration::from_millis(self.subprocess_grace_ms)
    }

    pub fn submit_retry_interval(&self) -> Duration {
        Duration::from_millis(self.submit_retry_interval_ms)
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Task 로그 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Task별 로그 보관 줄 수
    pub log_capacity: usize,

    /// 로그 레코드 포맷 (`{time}`, `{target}`, `{level}`, `{message}`)
    pub format: String,

    pub time_format: String,

    /// 기본 필터 레벨 (RUST_LOG 가 우선)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_capacity: 1000,
            format: DEFAULT_LOG_FORMAT.to_string(),
            time_format: DEFAULT_TIME_FORMAT.to_string(),
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.lifecycle.input_poll_interval(), Duration::from_millis(200));
        assert_eq!(config.lifecycle.join_budget(), Duration::from_millis(300));
        assert_eq!(config.lifecycle.subprocess_grace(), Duration::from_millis(300));
        assert_eq!(config.logging.log_capacity, 1000);
        assert_eq!(config.logging.format, DEFAULT_LOG_FORMAT);
    }

    #[test]
    fn test_partial_toml() {
        let config = RuntimeConfig::from_toml(
            r#"
            tasks_dir = "/srv/tasks"

            [lifecycle]
            join_budget_ms = 50

            [logging]
            log_capacity = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.tasks_dir, Some(PathBuf::from("/srv/tasks")));
        assert_eq!(config.lifecycle.join_budget_ms, 50);
        assert_eq!(config.lifecycle.input_poll_interval_ms, 200);
        assert_eq!(config.logging.log_capacity, 10);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            RuntimeConfig::from_toml("lifecycle = 3"),
            Err(Error::Toml(_))
        ));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = TempDir::new().unwrap();
        let config = RuntimeConfig::load_or_default(dir.path().join(RUNTIME_CONFIG_FILE)).unwrap();
        assert!(config.tasks_dir.is_none());
    }

    #[test]
    fn test_explicit_dirs_win() {
        let config = RuntimeConfig::new()
            .with_tasks_dir("/a")
            .with_settings_dir("/b");
        assert_eq!(config.resolved_tasks_dir().unwrap(), PathBuf::from("/a"));
        assert_eq!(config.resolved_settings_dir().unwrap(), PathBuf::from("/b"));
    }
}
