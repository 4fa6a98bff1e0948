use crate::{
    config::{ArtifactFormat, ArtifactsConfig},
    error::StorageError,
    storage::{ArtifactKey, ArtifactRecord, ArtifactStore, MetadataStore},
};
use bytes::Bytes;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::timeout;
use tracing::instrument;

/// Uploads the artifacts of one prediction and records them.
///
/// The three steps are exposed separately so the caller can enforce their
/// order: original, then mask, then the metadata record. An upload that
/// succeeded is never deleted when a later step fails, so a failed mask
/// upload or metadata write can leave an orphaned original in storage.
pub struct PersistenceCoordinator {
    artifact_store: Arc<dyn ArtifactStore>,
    metadata_store: Arc<dyn MetadataStore>,
    originals_namespace: String,
    masks_namespace: String,
    format: ArtifactFormat,
    storage_timeout: Duration,
    metadata_timeout: Duration,
}

impl PersistenceCoordinator {
    pub fn new(
        artifact_store: Arc<dyn ArtifactStore>,
        metadata_store: Arc<dyn MetadataStore>,
        artifacts: &ArtifactsConfig,
        storage_timeout: Duration,
        metadata_timeout: Duration,
    ) -> Self {
        Self {
            artifact_store,
            metadata_store,
            originals_namespace: artifacts.originals_namespace.clone(),
            masks_namespace: artifacts.masks_namespace.clone(),
            format: artifacts.format,
            storage_timeout,
            metadata_timeout,
        }
    }

    #[instrument(skip(self, bytes), fields(key = key.as_str()))]
    pub async fn upload_original(
        &self,
        key: &ArtifactKey,
        bytes: Bytes,
    ) -> Result<String, StorageError> {
        self.upload(&self.originals_namespace, key, bytes).await
    }

    #[instrument(skip(self, bytes), fields(key = key.as_str()))]
    pub async fn upload_mask(&self, key: &ArtifactKey, bytes: Bytes) -> Result<String, StorageError> {
        self.upload(&self.masks_namespace, key, bytes).await
    }

    #[instrument(skip(self, record), fields(user_id = %record.user_id))]
    pub async fn write_record(&self, record: &ArtifactRecord) -> Result<(), StorageError> {
        bounded(
            "metadata write",
            self.metadata_timeout,
            self.metadata_store.record(record),
        )
        .await
    }

    async fn upload(
        &self,
        namespace: &str,
        key: &ArtifactKey,
        bytes: Bytes,
    ) -> Result<String, StorageError> {
        let object_name = key.object_name(self.format.extension());
        bounded(
            "upload",
            self.storage_timeout,
            self.artifact_store.upload(
                namespace,
                &object_name,
                bytes,
                self.format.content_type(),
            ),
        )
        .await
    }
}

async fn bounded<T, F>(
    operation: &'static str,
    limit: Duration,
    call: F,
) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    timeout(limit, call)
        .await
        .map_err(|_| StorageError::Timeout {
            operation,
            seconds: limit.as_secs(),
        })?
}
