//! JSON file-backed secret storage.
//!
//! Secrets are kept in a single JSON document in the platform data directory
//! (`~/.local/share/goodvibes/tokens.json` on Linux). The whole document is
//! rewritten on every mutation.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use super::{Secret, SecretStore, StoreError};

/// On-disk format.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileStoreData {
    /// Version of the store format.
    version: u32,

    entries: BTreeMap<String, Secret>,
}

impl Default for FileStoreData {
    fn default() -> Self {
        Self {
            version: 1,
            entries: BTreeMap::new(),
        }
    }
}

/// Disk-backed secret store.
pub struct FileStore {
    path: PathBuf,
    data: RwLock<FileStoreData>,
}

impl FileStore {
    /// Default location of the token file.
    pub fn default_path() -> Result<PathBuf, StoreError> {
        let dirs = directories::ProjectDirs::from("com", "good-vibes", "goodvibes").ok_or_else(
            || StoreError::BackendError {
                message: "data directory not available".to_string(),
            },
        )?;
        Ok(dirs.data_dir().join("tokens.json"))
    }

    /// Open the store at `path`, creating parent directories as needed.
    ///
    /// A missing file starts an empty store. A file that cannot be parsed is
    /// also treated as empty and will be overwritten on the next write.
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("Discarding unreadable token file {:?}: {}", path, e);
                FileStoreData::default()
            })
        } else {
            FileStoreData::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    fn save(&self, data: &FileStoreData) -> Result<(), StoreError> {
        let contents = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, contents)?;
        Ok(())
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore").field("path", &self.path).finish()
    }
}

#[async_trait]
impl SecretStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        Ok(self.data.read().entries.get(key).cloned())
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        let mut data = self.data.write();
        data.entries.insert(key.to_string(), secret.clone());
        self.save(&data)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut data = self.data.write();
        if data.entries.remove(key).is_some() {
            self.save(&data)?;
        }
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .data
            .read()
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
