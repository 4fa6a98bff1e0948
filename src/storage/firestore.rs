use super::{ArtifactRecord, MetadataStore};
use crate::error::StorageError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::instrument;

/// Writes prediction records as new documents of a Firestore collection using
/// the REST API. Each call creates a document with a generated id.
#[derive(Debug, Clone)]
pub struct FirestoreMetadataStore {
    client: Client,
    documents_url: String,
    access_token: Option<String>,
}

impl FirestoreMetadataStore {
    pub fn new(
        base_url: &str,
        project_id: &str,
        collection: &str,
        access_token: Option<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().build()?;
        let documents_url = format!(
            "{}/v1/projects/{}/databases/(default)/documents/{}",
            base_url.trim_end_matches('/'),
            project_id,
            collection
        );
        Ok(Self {
            client,
            documents_url,
            access_token: access_token.filter(|token| !token.is_empty()),
        })
    }
}

fn to_document(record: &ArtifactRecord) -> Value {
    json!({
        "fields": {
            "user_id": { "stringValue": record.user_id },
            // Firestore carries 64-bit integers as strings.
            "timestamp": { "integerValue": record.timestamp.to_string() },
            "original_image_url": { "stringValue": record.original_image_url },
            "mask_image_url": { "stringValue": record.mask_image_url },
        }
    })
}

#[async_trait]
impl MetadataStore for FirestoreMetadataStore {
    #[instrument(skip(self, record), fields(user_id = %record.user_id))]
    async fn record(&self, record: &ArtifactRecord) -> Result<(), StorageError> {
        let mut request = self.client.post(&self.documents_url).json(&to_document(record));
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StorageError::Metadata(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Metadata(format!(
                "document store responded with {}: {}",
                status,
                body.trim()
            )));
        }

        Ok(())
    }
}
