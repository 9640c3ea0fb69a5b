//! Blob storage for the local backend
//!
//! The whole dataset is one JSON document; a store only needs to read and
//! replace it.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{DatasetError, DatasetResult};

/// Holder of a single serialized dataset
pub trait BlobStore: Send + Sync {
    /// Stored content, `None` if nothing was written yet
    fn get(&self) -> DatasetResult<Option<String>>;

    /// Replace the stored content
    fn set(&self, content: &str) -> DatasetResult<()>;
}

/// Blob kept in a file on disk
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    path: PathBuf,
}

impl FileBlobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlobStore for FileBlobStore {
    fn get(&self) -> DatasetResult<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DatasetError::storage(&self.path, e)),
        }
    }

    fn set(&self, content: &str) -> DatasetResult<()> {
        atomic_write(&self.path, content.as_bytes())
            .map_err(|e| DatasetError::storage(&self.path, e))
    }
}

/// Blob kept in memory; lost on drop
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    content: Mutex<Option<String>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self) -> DatasetResult<Option<String>> {
        Ok(self
            .content
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    fn set(&self, content: &str) -> DatasetResult<()> {
        *self.content.lock().unwrap_or_else(|e| e.into_inner()) = Some(content.to_string());
        Ok(())
    }
}

/// Write data to a file atomically
///
/// The data goes to a temporary sibling first, is synced, then renamed over
/// the target, so the target never holds a partial write.
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;

    fs::rename(&temp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_store_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileBlobStore::new(temp_dir.path().join("dataset.json"));

        assert!(store.get().unwrap().is_none());
        store.set("{\"samples\":[]}").unwrap();
        assert_eq!(store.get().unwrap().as_deref(), Some("{\"samples\":[]}"));

        store.set("{}").unwrap();
        assert_eq!(store.get().unwrap().as_deref(), Some("{}"));
        assert!(!temp_dir.path().join("dataset.tmp").exists());
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("deep").join("dataset.json");

        atomic_write(&path, b"{}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryBlobStore::new();
        assert!(store.get().unwrap().is_none());
        store.set("x").unwrap();
        assert_eq!(store.get().unwrap().as_deref(), Some("x"));
    }
}
