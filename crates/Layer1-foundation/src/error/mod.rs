//! Error types for taskhost
//!
//! 런타임 전체에서 공유하는 에러 타입

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// taskhost 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 설정 관련
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // 저장소 관련
    // ========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    // ========================================================================
    // Task 관련
    // ========================================================================
    /// Descriptor could not be parsed or its entry could not be resolved
    #[error("Failed to load task '{task}': {message}")]
    Load { task: String, message: String },

    /// Failure raised by a task's own code
    #[error("{0}")]
    Runtime(String),

    #[error("Task error: {0}")]
    Task(String),

    // ========================================================================
    // 실행 관련
    // ========================================================================
    /// Deliberate stop; never reported as a task failure
    #[error("Cancelled")]
    Cancelled,

    // ========================================================================
    // 일반
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    // ========================================================================
    // 기타
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 의도적인 중지 신호인지 확인
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// 사용자에게 보여줄 수 있는 에러인지 확인
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::InvalidInput(_)
                | Error::Load { .. }
                | Error::Runtime(_)
                | Error::Cancelled
        )
    }

    /// Load 에러 생성 헬퍼
    pub fn load(task: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Load {
            task: task.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// From 구현 (추가 변환)
// ============================================================================

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_message_is_verbatim() {
        let err = Error::Runtime("disk on fire".to_string());
        assert_eq!(err.to_string(), "disk on fire");
    }

    #[test]
    fn test_load_helper() {
        let err = Error::load("ticker", "unknown entry type 'nope'");
        assert_eq!(
            err.to_string(),
            "Failed to load task 'ticker': unknown entry type 'nope'"
        );
        assert!(err.is_user_facing());
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_cancelled() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::from("boom").is_cancelled());
    }
}
