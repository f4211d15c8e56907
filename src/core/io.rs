use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Key/value persistence port. Keys are relative, `/`-separated names.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn read(&self, key: &str) -> Result<Vec<u8>>;
    async fn write(&self, key: &str, content: &[u8]) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

// --- Native Implementation ---

pub struct NativeStorage {
    root: PathBuf,
}

impl NativeStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl Storage for NativeStorage {
    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.path(key)).await?)
    }

    async fn write(&self, key: &str, content: &[u8]) -> Result<()> {
        let path = self.path(key);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        // Atomic replace.
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path(key);
        if tokio::fs::try_exists(&path).await? {
            if path.is_dir() {
                tokio::fs::remove_dir_all(&path).await?;
            } else {
                tokio::fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path(key)).await?)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.path(prefix);
        let mut entries = Vec::new();

        if dir.is_dir() {
            let mut read_dir = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = read_dir.next_entry().await? {
                let full = entry.path();
                if let Ok(rel) = full.strip_prefix(&self.root) {
                    entries.push(key_from_path(rel));
                }
            }
        } else if dir.exists() {
            entries.push(prefix.to_string());
        }

        entries.sort();
        Ok(entries)
    }
}

fn key_from_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

// --- In-memory Implementation ---

#[derive(Default)]
pub struct MemoryStorage {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let files = self.files.lock().map_err(|_| anyhow!("storage lock poisoned"))?;
        files.get(key).cloned().ok_or_else(|| anyhow!("File not found: {}", key))
    }

    async fn write(&self, key: &str, content: &[u8]) -> Result<()> {
        let mut files = self.files.lock().map_err(|_| anyhow!("storage lock poisoned"))?;
        files.insert(key.to_string(), content.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut files = self.files.lock().map_err(|_| anyhow!("storage lock poisoned"))?;
        files.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let files = self.files.lock().map_err(|_| anyhow!("storage lock poisoned"))?;
        Ok(files.contains_key(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let files = self.files.lock().map_err(|_| anyhow!("storage lock poisoned"))?;
        Ok(files.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_native_storage_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = NativeStorage::new(dir.path());

        assert!(!storage.exists("story_history.json").await?);
        storage.write("exports/a.txt", b"hello").await?;
        assert!(storage.exists("exports/a.txt").await?);
        assert_eq!(storage.read("exports/a.txt").await?, b"hello");
        assert_eq!(storage.list("exports").await?, vec!["exports/a.txt".to_string()]);

        storage.delete("exports/a.txt").await?;
        assert!(!storage.exists("exports/a.txt").await?);
        assert!(storage.read("exports/a.txt").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_memory_storage_list_by_prefix() -> Result<()> {
        let storage = MemoryStorage::new();
        storage.write("a/1", b"x").await?;
        storage.write("a/2", b"y").await?;
        storage.write("b/1", b"z").await?;
        assert_eq!(storage.list("a/").await?, vec!["a/1".to_string(), "a/2".to_string()]);
        storage.delete("a/1").await?;
        assert!(!storage.exists("a/1").await?);
        Ok(())
    }
}
