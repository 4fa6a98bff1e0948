use super::{ArtifactRecord, ArtifactStore, MetadataStore};
use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use std::path::{Path, PathBuf};
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};

/// Filesystem artifact store for local runs. Objects land in
/// `<root>/<namespace>/<key>` and are addressed with `file://` URLs.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root_dir: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root_dir: &Path) -> Self {
        Self {
            root_dir: root_dir.to_path_buf(),
        }
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn upload(
        &self,
        namespace: &str,
        key: &str,
        bytes: Bytes,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        let object_name = format!("{}/{}", namespace, key);
        let upload_error = |e: std::io::Error| StorageError::Upload {
            key: object_name.clone(),
            reason: e.to_string(),
        };

        let directory = self.root_dir.join(namespace);
        fs::create_dir_all(&directory).await.map_err(upload_error)?;

        let path = directory.join(key);
        fs::write(&path, &bytes).await.map_err(upload_error)?;
        let path = fs::canonicalize(&path).await.map_err(upload_error)?;

        Url::from_file_path(&path)
            .map(String::from)
            .map_err(|_| StorageError::Upload {
                key: object_name.clone(),
                reason: format!("{} cannot be expressed as a file url", path.display()),
            })
    }
}

/// Appends one JSON object per record to a file.
#[derive(Debug)]
pub struct JsonLinesMetadataStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesMetadataStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl MetadataStore for JsonLinesMetadataStore {
    async fn record(&self, record: &ArtifactRecord) -> Result<(), StorageError> {
        let mut line =
            serde_json::to_vec(record).map_err(|e| StorageError::Metadata(e.to_string()))?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Metadata(e.to_string()))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| StorageError::Metadata(e.to_string()))?;
        file.write_all(&line)
            .await
            .map_err(|e| StorageError::Metadata(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| StorageError::Metadata(e.to_string()))?;

        Ok(())
    }
}
