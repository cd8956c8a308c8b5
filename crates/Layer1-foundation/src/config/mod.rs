//! Config - 런타임 설정 관리
//!
//! - `runtime.rs` - RuntimeConfig (lifecycle 타이밍, 로그 포맷, 디렉토리)

mod runtime;

pub use runtime::{
    LifecycleConfig, LoggingConfig, RuntimeConfig, DEFAULT_LOG_FORMAT, DEFAULT_TIME_FORMAT,
    RUNTIME_CONFIG_FILE,
};
