//! Task directory scanning

use super::manifest::MANIFEST_FILE;
use std::path::{Path, PathBuf};
use taskhost_foundation::Result;
use tracing::{debug, warn};

/// Directory names starting with these are never tasks
const RESERVED_PREFIXES: &[&str] = &["__", "."];

pub(crate) fn is_reserved(name: &str) -> bool {
    RESERVED_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Candidate task directories under `tasks_dir`, sorted by name
///
/// A missing `tasks_dir` yields no candidates.
pub async fn discover(tasks_dir: &Path) -> Result<Vec<PathBuf>> {
    if !tokio::fs::try_exists(tasks_dir).await? {
        debug!("Tasks directory {} does not exist", tasks_dir.display());
        return Ok(Vec::new());
    }

    let mut candidates = Vec::new();
    let mut entries = tokio::fs::read_dir(tasks_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if is_reserved(&name) {
            continue;
        }

        let path = entry.path();
        if !tokio::fs::try_exists(path.join(MANIFEST_FILE)).await? {
            warn!("Skipping {}: no {}", path.display(), MANIFEST_FILE);
            continue;
        }
        candidates.push(path);
    }

    candidates.sort();
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_discover_skips_reserved_and_incomplete() {
        let dir = tempdir().unwrap();
        for name in ["beta", "alpha", "__cache__", ".hidden", "no_manifest"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        for name in ["beta", "alpha", "__cache__", ".hidden"] {
            std::fs::write(dir.path().join(name).join(MANIFEST_FILE), "").unwrap();
        }
        std::fs::write(dir.path().join("loose.toml"), "").unwrap();

        let found = discover(dir.path()).await.unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn test_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        let found = discover(&dir.path().join("absent")).await.unwrap();
        assert!(found.is_empty());
    }
}
