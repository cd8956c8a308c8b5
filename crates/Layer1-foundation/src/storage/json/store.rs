//! JSON 파일 저장소

use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};

/// 디렉토리 하나를 기준으로 JSON 파일을 읽고 쓰는 저장소
#[derive(Debug, Clone)]
pub struct JsonStore {
    base_dir: PathBuf,
}

impl JsonStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// 글로벌 저장소 (<config_dir>/taskhost/)
    pub fn global() -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Cannot find config directory".to_string()))?
            .join("taskhost");
        Ok(Self::new(dir))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.base_dir.join(filename)
    }

    fn ensure_parent(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::Storage(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
        }
        Ok(())
    }

    /// JSON 로드
    pub fn load<T: DeserializeOwned>(&self, filename: &str) -> Result<T> {
        let path = self.file_path(filename);
        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::Storage(format!("Failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Storage(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// JSON 로드 (Optional)
    pub fn load_optional<T: DeserializeOwned>(&self, filename: &str) -> Result<Option<T>> {
        if !self.exists(filename) {
            return Ok(None);
        }
        self.load(filename).map(Some)
    }

    /// JSON 로드 (파일이 없으면 기본값)
    pub fn load_or_default<T: DeserializeOwned + Default>(&self, filename: &str) -> Result<T> {
        Ok(self.load_optional(filename)?.unwrap_or_default())
    }

    /// JSON 저장 (하위 디렉토리 자동 생성)
    pub fn save<T: Serialize>(&self, filename: &str, data: &T) -> Result<()> {
        let path = self.file_path(filename);
        self.ensure_parent(&path)?;
        let content = serde_json::to_string_pretty(data)?;
        std::fs::write(&path, content)
            .map_err(|e| Error::Storage(format!("Failed to write {}: {}", path.display(), e)))
    }

    /// 파일 존재 여부
    pub fn exists(&self, filename: &str) -> bool {
        self.file_path(filename).exists()
    }

    /// 파일 삭제 (없으면 무시)
    pub fn remove(&self, filename: &str) -> Result<()> {
        let path = self.file_path(filename);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| {
                Error::Storage(format!("Failed to remove {}: {}", path.display(), e))
            })?;
        }
        Ok(())
    }
}
