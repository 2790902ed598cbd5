//! Versioned JSON files in a storage directory
//!
//! Each key is one file wrapping its payload with a version header:
//!
//! ```json
//! {
//!   "version": 1,
//!   "minor_version": 1,
//!   "key": "crm.automation_rules",
//!   "data": { ... }
//! }
//! ```

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, instrument, warn};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage file not found: {key}")]
    NotFound { key: String },

    #[error("Unsupported version for {key}: found {found}, expected {expected}")]
    UnsupportedVersion {
        key: String,
        found: u32,
        expected: u32,
    },
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// On-disk wrapper around a stored payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageFile<T> {
    /// Bumped on incompatible changes
    pub version: u32,
    /// Bumped on additive changes
    pub minor_version: u32,
    pub key: String,
    pub data: T,
}

impl<T> StorageFile<T> {
    pub fn new(key: impl Into<String>, data: T, version: u32, minor_version: u32) -> Self {
        Self {
            version,
            minor_version,
            key: key.into(),
            data,
        }
    }
}

/// A payload with a fixed storage key and version
pub trait Storable: Serialize + DeserializeOwned {
    const KEY: &'static str;
    const VERSION: u32;
    const MINOR_VERSION: u32;
}

/// Storage directory manager
#[derive(Debug, Clone)]
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    /// Manage files under `dir`
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the directory if it is missing
    pub async fn ensure_dir(&self) -> StorageResult<()> {
        if !fs::try_exists(&self.dir).await? {
            fs::create_dir_all(&self.dir).await?;
            debug!(dir = %self.dir.display(), "Created storage directory");
        }
        Ok(())
    }

    pub fn file_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    pub async fn exists(&self, key: &str) -> bool {
        fs::try_exists(self.file_path(key)).await.unwrap_or(false)
    }

    /// Read a raw file; `None` when the key has never been saved
    pub async fn load<T>(&self, key: &str) -> StorageResult<Option<StorageFile<T>>>
    where
        T: DeserializeOwned,
    {
        let path = self.file_path(key);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(key, "Storage file not found");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let file: StorageFile<T> = serde_json::from_str(&content)?;
        debug!(
            key,
            version = file.version,
            minor_version = file.minor_version,
            "Loaded storage file"
        );
        Ok(Some(file))
    }

    /// Read a file that must exist
    pub async fn load_required<T>(&self, key: &str) -> StorageResult<StorageFile<T>>
    where
        T: DeserializeOwned,
    {
        self.load(key).await?.ok_or_else(|| StorageError::NotFound {
            key: key.to_string(),
        })
    }

    /// Write a file through a temp file and rename
    #[instrument(skip(self, file), fields(key = %file.key))]
    pub async fn save<T>(&self, file: &StorageFile<T>) -> StorageResult<()>
    where
        T: Serialize,
    {
        self.ensure_dir().await?;

        let path = self.file_path(&file.key);
        let temp_path = self.file_path(&format!("{}.tmp", file.key));
        let content = serde_json::to_string_pretty(file)?;

        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &path).await?;

        debug!(bytes = content.len(), "Saved storage file");
        Ok(())
    }

    /// Load a typed payload, checking its version
    ///
    /// A different major version is an error. An older minor version loads
    /// with a warning since minor bumps only add defaulted fields.
    pub async fn load_data<T: Storable>(&self) -> StorageResult<Option<T>> {
        let Some(file) = self.load::<T>(T::KEY).await? else {
            return Ok(None);
        };

        if file.version != T::VERSION {
            return Err(StorageError::UnsupportedVersion {
                key: T::KEY.to_string(),
                found: file.version,
                expected: T::VERSION,
            });
        }
        if file.minor_version < T::MINOR_VERSION {
            warn!(
                key = T::KEY,
                found = file.minor_version,
                current = T::MINOR_VERSION,
                "Storage file has an older minor version"
            );
        }
        Ok(Some(file.data))
    }

    /// Save a typed payload under its key and current version
    pub async fn save_data<T: Storable>(&self, data: &T) -> StorageResult<()> {
        self.save(&StorageFile::new(T::KEY, data, T::VERSION, T::MINOR_VERSION))
            .await
    }

    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        match fs::remove_file(self.file_path(key)).await {
            Ok(()) => {
                debug!(key, "Deleted storage file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Stored keys, excluding in-flight temp files
    pub async fn list_keys(&self) -> StorageResult<Vec<String>> {
        if !fs::try_exists(&self.dir).await? {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.ends_with(".tmp") {
                    keys.push(name.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        value: i32,
    }

    impl Storable for Sample {
        const KEY: &'static str = "test.sample";
        const VERSION: u32 = 2;
        const MINOR_VERSION: u32 = 1;
    }

    fn sample() -> Sample {
        Sample {
            name: "welcome".into(),
            value: 7,
        }
    }

    #[tokio::test]
    async fn test_save_creates_dir_and_loads() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path().join("nested/.storage"));

        storage.save_data(&sample()).await.unwrap();
        assert!(storage.exists("test.sample").await);
        assert!(!storage.exists("test.sample.tmp").await);

        let file: StorageFile<Sample> = storage.load_required("test.sample").await.unwrap();
        assert_eq!(file.version, 2);
        assert_eq!(file.data, sample());
        assert_eq!(storage.load_data::<Sample>().await.unwrap(), Some(sample()));
    }

    #[tokio::test]
    async fn test_missing_key() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path());

        assert!(storage.load_data::<Sample>().await.unwrap().is_none());
        assert!(matches!(
            storage.load_required::<Sample>("test.sample").await,
            Err(StorageError::NotFound { .. })
        ));
        storage.delete("test.sample").await.unwrap();
    }

    #[tokio::test]
    async fn test_major_version_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path());
        storage
            .save(&StorageFile::new("test.sample", sample(), 1, 4))
            .await
            .unwrap();

        let err = storage.load_data::<Sample>().await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::UnsupportedVersion {
                found: 1,
                expected: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_list_keys_skips_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path());
        for key in ["b.rules", "a.logs"] {
            storage
                .save(&StorageFile::new(key, sample(), 1, 1))
                .await
                .unwrap();
        }
        std::fs::write(storage.file_path("c.rules.tmp"), "{}").unwrap();

        assert_eq!(storage.list_keys().await.unwrap(), vec!["a.logs", "b.rules"]);

        storage.delete("a.logs").await.unwrap();
        assert_eq!(storage.list_keys().await.unwrap(), vec!["b.rules"]);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path());
        std::fs::write(storage.file_path("test.sample"), "not json").unwrap();

        assert!(matches!(
            storage.load_data::<Sample>().await,
            Err(StorageError::Json(_))
        ));
    }
}
