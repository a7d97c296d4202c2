use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;

/// Byte-level persistence used for the per-unit artifacts, generated images
/// and the progress ledger.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;
    /// Writes `content`, creating parent directories as needed.
    async fn write(&self, path: &Path, content: &[u8]) -> Result<()>;
    async fn exists(&self, path: &Path) -> Result<bool>;
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct NativeStorage;

impl NativeStorage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Storage for NativeStorage {
    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }

    async fn write(&self, path: &Path, content: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        tokio::fs::rename(from, to)
            .await
            .with_context(|| format!("Failed to move {} to {}", from.display(), to.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_creates_parent_directories() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("a").join("b").join("file.json");
        let storage = NativeStorage::new();

        storage.write(&path, b"[]").await?;

        assert!(storage.exists(&path).await?);
        assert_eq!(storage.read(&path).await?, b"[]");
        Ok(())
    }

    #[tokio::test]
    async fn test_rename_replaces_target() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let from = temp_dir.path().join("from.tmp");
        let to = temp_dir.path().join("to.json");
        let storage = NativeStorage::new();

        storage.write(&to, b"old").await?;
        storage.write(&from, b"new").await?;
        storage.rename(&from, &to).await?;

        assert!(!storage.exists(&from).await?);
        assert_eq!(storage.read(&to).await?, b"new");
        Ok(())
    }
}
