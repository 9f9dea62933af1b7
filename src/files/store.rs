//! Blob storage for sealed files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::crypto::SecureRandom;
use crate::error::{Error, Result};

/// Longest extension carried over from an uploaded file name.
const MAX_EXTENSION_LEN: usize = 16;

/// Metadata for one stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub filename: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Result of a `put`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub stored_name: String,
    pub size_bytes: u64,
}

/// Byte-blob storage keyed by an opaque stored name.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Store `bytes` under a fresh name derived from `original_name`.
    async fn put(&self, original_name: &str, bytes: Vec<u8>) -> Result<StoredFile>;

    /// Fetch a blob.
    async fn get(&self, stored_name: &str) -> Result<Vec<u8>>;

    /// Every stored blob, oldest first.
    async fn list(&self) -> Result<Vec<FileInfo>>;
}

/// Reject names that could escape the storage root.
pub fn validate_stored_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.contains('\0')
    {
        return Err(Error::InvalidFileName(name.to_string()));
    }
    Ok(())
}

/// Random hex name keeping a sanitized copy of the original extension.
pub fn stored_name_for(original_name: &str) -> Result<String> {
    let stem = hex::encode(SecureRandom::bytes::<16>()?);

    let extension = Path::new(original_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        });

    Ok(match extension {
        Some(ext) => format!("{}.{}", stem, ext.to_ascii_lowercase()),
        None => stem,
    })
}

/// Files in a directory on disk.
#[derive(Debug, Clone)]
pub struct DiskFileStore {
    root: PathBuf,
}

impl DiskFileStore {
    /// Use `root`, creating it if missing.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl FileStore for DiskFileStore {
    async fn put(&self, original_name: &str, bytes: Vec<u8>) -> Result<StoredFile> {
        let stored_name = stored_name_for(original_name)?;
        let size_bytes = bytes.len() as u64;

        tokio::fs::write(self.root.join(&stored_name), bytes)
            .await
            .map_err(|e| Error::storage(format!("write {}: {}", stored_name, e)))?;

        Ok(StoredFile {
            stored_name,
            size_bytes,
        })
    }

    async fn get(&self, stored_name: &str) -> Result<Vec<u8>> {
        validate_stored_name(stored_name)?;

        match tokio::fs::read(self.root.join(stored_name)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::FileNotFound(stored_name.to_string()))
            }
            Err(e) => Err(Error::storage(format!("read {}: {}", stored_name, e))),
        }
    }

    async fn list(&self) -> Result<Vec<FileInfo>> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut files = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let Ok(filename) = entry.file_name().into_string() else {
                continue;
            };

            let created = metadata.created().or_else(|_| metadata.modified())?;
            files.push(FileInfo {
                filename,
                size_bytes: metadata.len(),
                created_at: DateTime::<Utc>::from(created),
            });
        }

        files.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.filename.cmp(&b.filename))
        });
        Ok(files)
    }
}

/// In-memory store for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryFileStore {
    files: RwLock<HashMap<String, (Vec<u8>, DateTime<Utc>)>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored bytes, bypassing the channel.
    pub fn raw(&self, stored_name: &str) -> Option<Vec<u8>> {
        self.files.read().get(stored_name).map(|(b, _)| b.clone())
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn put(&self, original_name: &str, bytes: Vec<u8>) -> Result<StoredFile> {
        let stored_name = stored_name_for(original_name)?;
        let size_bytes = bytes.len() as u64;
        self.files
            .write()
            .insert(stored_name.clone(), (bytes, Utc::now()));
        Ok(StoredFile {
            stored_name,
            size_bytes,
        })
    }

    async fn get(&self, stored_name: &str) -> Result<Vec<u8>> {
        validate_stored_name(stored_name)?;
        self.raw(stored_name)
            .ok_or_else(|| Error::FileNotFound(stored_name.to_string()))
    }

    async fn list(&self) -> Result<Vec<FileInfo>> {
        let mut files: Vec<FileInfo> = self
            .files
            .read()
            .iter()
            .map(|(name, (bytes, created_at))| FileInfo {
                filename: name.clone(),
                size_bytes: bytes.len() as u64,
                created_at: *created_at,
            })
            .collect();
        files.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.filename.cmp(&b.filename))
        });
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_name_keeps_extension() {
        let name = stored_name_for("Quarterly Report.PDF").unwrap();
        assert!(name.ends_with(".pdf"));
        assert_eq!(name.len(), 32 + 4);

        let bare = stored_name_for("README").unwrap();
        assert_eq!(bare.len(), 32);

        // Suspicious extensions are dropped
        assert_eq!(stored_name_for("x.p$p").unwrap().len(), 32);
        assert_ne!(stored_name_for("a.txt").unwrap(), stored_name_for("a.txt").unwrap());
    }

    #[test]
    fn test_validate_stored_name() {
        assert!(validate_stored_name("0a1b2c.txt").is_ok());
        for bad in ["", "../etc/passwd", "a/b", "a\\b", "..", "x..y"] {
            assert!(matches!(validate_stored_name(bad), Err(Error::InvalidFileName(_))));
        }
    }

    #[tokio::test]
    async fn test_disk_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskFileStore::open(dir.path().join("uploads")).await.unwrap();

        let stored = store.put("notes.txt", b"hello".to_vec()).await.unwrap();
        assert_eq!(stored.size_bytes, 5);
        assert_eq!(store.get(&stored.stored_name).await.unwrap(), b"hello");

        let listing = store.list().await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].filename, stored.stored_name);
        assert_eq!(listing[0].size_bytes, 5);
    }

    #[tokio::test]
    async fn test_disk_store_missing_and_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskFileStore::open(dir.path()).await.unwrap();

        assert!(matches!(
            store.get("0123.txt").await,
            Err(Error::FileNotFound(_))
        ));
        assert!(matches!(
            store.get("../secret").await,
            Err(Error::InvalidFileName(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryFileStore::new();
        let a = store.put("a.bin", vec![1, 2, 3]).await.unwrap();
        store.put("b.bin", vec![4]).await.unwrap();

        assert_eq!(store.get(&a.stored_name).await.unwrap(), vec![1, 2, 3]);
        assert_eq!(store.list().await.unwrap().len(), 2);
        assert!(matches!(store.get("missing").await, Err(Error::FileNotFound(_))));
    }
}
