//! # taskhost-foundation
//!
//! Foundation layer for taskhost:
//! - Error: 공용 에러 타입
//! - Config: RuntimeConfig (lifecycle 타이밍, 로그 설정)
//! - Storage: JsonStore (범용), SettingsStore (Task별 설정)

pub mod config;
pub mod error;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{
    LifecycleConfig, LoggingConfig, RuntimeConfig, DEFAULT_LOG_FORMAT, DEFAULT_TIME_FORMAT,
    RUNTIME_CONFIG_FILE,
};

// ============================================================================
// Storage (저장소)
// ============================================================================
pub use storage::{
    JsonSettingsStore, JsonStore, MemorySettingsStore, SettingsStore, TaskSettings,
    DEFAULT_START_ORDER, SETTINGS_FILE,
};
