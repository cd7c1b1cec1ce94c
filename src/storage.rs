//! # Intermediate Storage
//!
//! Downloaded pages are written here before an upload job referencing them
//! is enqueued. Locations are keyed by `(configId, generatedId)` and handed
//! to the upload step by filename.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use crate::error::{MigratorError, MigratorResult};

#[async_trait]
pub trait IntermediateStorage: Send + Sync + fmt::Debug {
    /// Durably write `payload`; returns the filename to reference it by
    async fn store(&self, config_id: &str, payload: &Value) -> MigratorResult<String>;

    async fn load(&self, config_id: &str, filename: &str) -> MigratorResult<Value>;

    async fn remove(&self, config_id: &str, filename: &str) -> MigratorResult<()>;
}

/// Stores payloads as `<directory>/<configId>/<uuid>.json`
#[derive(Debug, Clone)]
pub struct FileSystemStorage {
    directory: PathBuf,
}

impl FileSystemStorage {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, config_id: &str, filename: &str) -> MigratorResult<PathBuf> {
        // Filenames arrive in job bodies
        let name = Path::new(filename);
        if name.components().count() != 1 || filename.contains("..") {
            return Err(MigratorError::malformed(format!(
                "invalid stored payload name: {filename}"
            )));
        }
        Ok(self.directory.join(config_id).join(name))
    }
}

fn io_error(path: &Path, err: std::io::Error) -> MigratorError {
    MigratorError::storage(path.display().to_string(), err.to_string())
}

#[async_trait]
impl IntermediateStorage for FileSystemStorage {
    async fn store(&self, config_id: &str, payload: &Value) -> MigratorResult<String> {
        let filename = format!("{}.json", Uuid::new_v4());
        let path = self.path_for(config_id, &filename)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }

        let bytes = serde_json::to_vec(payload)?;
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| io_error(&path, e))?;
        tokio::io::AsyncWriteExt::write_all(&mut file, &bytes)
            .await
            .map_err(|e| io_error(&path, e))?;
        file.sync_all().await.map_err(|e| io_error(&path, e))?;

        debug!(config_id = %config_id, filename = %filename, bytes = bytes.len(), "Payload stored");
        Ok(filename)
    }

    async fn load(&self, config_id: &str, filename: &str) -> MigratorResult<Value> {
        let path = self.path_for(config_id, filename)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| io_error(&path, e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn remove(&self, config_id: &str, filename: &str) -> MigratorResult<()> {
        let path = self.path_for(config_id, filename)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_store_load_remove() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSystemStorage::new(dir.path());
        let payload = json!({"dataValues": [{"dataElement": "d1", "value": "3"}]});

        let filename = storage.store("cfg", &payload).await.unwrap();
        assert!(filename.ends_with(".json"));
        assert!(dir.path().join("cfg").join(&filename).exists());
        assert_eq!(storage.load("cfg", &filename).await.unwrap(), payload);

        storage.remove("cfg", &filename).await.unwrap();
        assert!(storage.load("cfg", &filename).await.is_err());
        // Removing twice is harmless
        storage.remove("cfg", &filename).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSystemStorage::new(dir.path());
        let err = storage.load("cfg", "../secrets.json").await.unwrap_err();
        assert!(matches!(err, MigratorError::MalformedJob(_)));
    }
}
