//! Storage module for taskhost
//!
//! - `json`: JSON - 범용 파일 저장/로드
//! - `settings`: Task별 설정 (auto start, 시작 순서, 저장된 파라미터 값)

mod json;
mod settings;

// JSON Storage (범용)
pub use json::JsonStore;

// Task Settings
pub use settings::{
    JsonSettingsStore, MemorySettingsStore, SettingsStore, TaskSettings, DEFAULT_START_ORDER,
    SETTINGS_FILE,
};
