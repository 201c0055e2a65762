use std::fmt::Debug;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use strum_macros::Display;

use crate::error::ManagerError;

pub fn make_asset_repository(settings: &RepositorySettings) -> Result<Box<dyn AssetRepository>, ManagerError> {
    match settings.storage {
        RepositoryType::Memory => Ok(Box::new(MemoryAssetRepository::default())),
        RepositoryType::File => {
            let path = settings.storage_path.clone().unwrap_or_else(|| "blueprint_assets".to_string());
            Ok(Box::new(FileAssetRepository::new(path)))
        },
    }
}

/// Key-addressed byte storage for persisted blueprint assets.
#[async_trait]
pub trait AssetRepository: Debug + Sync + Send {
    /// `None` when nothing is stored under `key`.
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, ManagerError>;
    async fn persist(&self, key: &str, data: &[u8]) -> Result<(), ManagerError>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), ManagerError>;
    async fn close(self: Box<Self>) -> Result<(), ManagerError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySettings {
    pub storage: RepositoryType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self { storage: RepositoryType::File, storage_path: None }
    }
}

#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, SerializeDisplay, DeserializeFromStr)]
#[strum(serialize_all = "snake_case")]
pub enum RepositoryType {
    Memory,
    File,
}

impl FromStr for RepositoryType {
    type Err = ManagerError;

    fn from_str(rep: &str) -> Result<Self, Self::Err> {
        match rep.to_lowercase().as_str() {
            "memory" => Ok(RepositoryType::Memory),
            "file" => Ok(RepositoryType::File),
            s => Err(ManagerError::UnknownRepositoryType(s.to_string())),
        }
    }
}

/// In-process repository. Clones share the same storage.
#[derive(Debug, Default, Clone)]
pub struct MemoryAssetRepository(Arc<DashMap<String, Vec<u8>>>);

impl MemoryAssetRepository {
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.0.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl AssetRepository for MemoryAssetRepository {
    #[tracing::instrument(level = "trace", skip(self))]
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, ManagerError> {
        Ok(self.0.get(key).map(|data| data.value().clone()))
    }

    #[tracing::instrument(level = "trace", skip(self, data))]
    async fn persist(&self, key: &str, data: &[u8]) -> Result<(), ManagerError> {
        let old = self.0.insert(key.to_string(), data.to_vec());
        tracing::debug!(replaced=%old.is_some(), nr_bytes=%data.len(), "persisted blueprint asset.");
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn delete(&self, key: &str) -> Result<(), ManagerError> {
        self.0.remove(key);
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn close(self: Box<Self>) -> Result<(), ManagerError> {
        self.0.clear();
        Ok(())
    }
}

/// Stores each asset as a file under a root directory; `/` in a key maps to a subdirectory.
#[derive(Debug)]
pub struct FileAssetRepository {
    root_path: PathBuf,
}

impl FileAssetRepository {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root_path: root.as_ref().to_path_buf() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut path = self.root_path.clone();
        path.extend(key.split('/').filter(|segment| !segment.is_empty() && *segment != ".."));
        path
    }

    fn file_for_write(&self, key: &str) -> Result<File, ManagerError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let f = OpenOptions::new().write(true).create(true).truncate(true).open(path)?;
        Ok(f)
    }
}

#[async_trait]
impl AssetRepository for FileAssetRepository {
    #[tracing::instrument(level = "trace", skip(self))]
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, ManagerError> {
        let f = match File::open(self.path_for(key)) {
            Ok(f) => f,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let mut data = Vec::new();
        BufReader::new(f).read_to_end(&mut data)?;
        Ok(Some(data))
    }

    #[tracing::instrument(level = "trace", skip(self, data))]
    async fn persist(&self, key: &str, data: &[u8]) -> Result<(), ManagerError> {
        let f = self.file_for_write(key)?;
        let mut writer = BufWriter::new(f);
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn delete(&self, key: &str) -> Result<(), ManagerError> {
        match fs::remove_file(self.path_for(key)) {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }

    async fn close(self: Box<Self>) -> Result<(), ManagerError> {
        Ok(())
    }
}
