mod firestore;
mod gcs;
mod local;

pub use firestore::FirestoreMetadataStore;
pub use gcs::GcsArtifactStore;
pub use local::{JsonLinesMetadataStore, LocalArtifactStore};

use crate::{
    config::{MetadataProvider, StorageProvider},
    error::StorageError,
};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Metadata linking one prediction's artifacts to its user. Written once per
/// request, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub user_id: String,
    pub timestamp: u64,
    pub original_image_url: String,
    pub mask_image_url: String,
}

/// Shared basename of the original and mask objects of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactKey(String);

impl ArtifactKey {
    pub fn new(user_id: &str, timestamp: u64) -> Self {
        Self(format!("{}_{}", user_id, timestamp))
    }

    pub fn object_name(&self, extension: &str) -> String {
        format!("{}.{}", self.0, extension)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[async_trait]
pub trait ArtifactStore: Send + Sync + 'static {
    /// Stores `bytes` under `namespace/key` and returns a URL for the object.
    async fn upload(
        &self,
        namespace: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<String, StorageError>;
}

#[async_trait]
pub trait MetadataStore: Send + Sync + 'static {
    async fn record(&self, record: &ArtifactRecord) -> Result<(), StorageError>;
}

pub fn build_artifact_store(
    provider: &StorageProvider,
) -> Result<Arc<dyn ArtifactStore>, reqwest::Error> {
    let store: Arc<dyn ArtifactStore> = match provider {
        StorageProvider::Gcs {
            bucket,
            upload_url,
            public_url,
            access_token,
        } => Arc::new(GcsArtifactStore::new(
            bucket,
            upload_url,
            public_url,
            access_token.clone(),
        )?),
        StorageProvider::Local { root_dir } => Arc::new(LocalArtifactStore::new(root_dir)),
    };
    Ok(store)
}

pub fn build_metadata_store(
    provider: &MetadataProvider,
) -> Result<Arc<dyn MetadataStore>, reqwest::Error> {
    let store: Arc<dyn MetadataStore> = match provider {
        MetadataProvider::Firestore {
            project_id,
            base_url,
            collection,
            access_token,
        } => Arc::new(FirestoreMetadataStore::new(
            base_url,
            project_id,
            collection,
            access_token.clone(),
        )?),
        MetadataProvider::JsonLines { path } => Arc::new(JsonLinesMetadataStore::new(path)),
    };
    Ok(store)
}
