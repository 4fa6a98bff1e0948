use super::ArtifactStore;
use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header::CONTENT_TYPE, Client, Url};
use tracing::instrument;

/// Uploads artifacts to a Google Cloud Storage bucket through the JSON API
/// media upload endpoint.
#[derive(Debug, Clone)]
pub struct GcsArtifactStore {
    client: Client,
    bucket: String,
    upload_url: String,
    public_url: String,
    access_token: Option<String>,
}

impl GcsArtifactStore {
    pub fn new(
        bucket: &str,
        upload_url: &str,
        public_url: &str,
        access_token: Option<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            bucket: bucket.to_string(),
            upload_url: upload_url.trim_end_matches('/').to_string(),
            public_url: public_url.trim_end_matches('/').to_string(),
            access_token: access_token.filter(|token| !token.is_empty()),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/upload/storage/v1/b/{}/o", self.upload_url, self.bucket)
    }

    /// Each segment is percent-encoded, so keys holding `#`, `?` or spaces
    /// still address the uploaded object.
    fn public_object_url(&self, namespace: &str, key: &str) -> Result<String, StorageError> {
        let invalid = |reason: String| StorageError::Upload {
            key: format!("{}/{}", namespace, key),
            reason,
        };

        let mut url = Url::parse(&self.public_url)
            .map_err(|e| invalid(format!("invalid public url {:?}: {}", self.public_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| invalid(format!("public url {:?} cannot be a base", self.public_url)))?
            .pop_if_empty()
            .extend([self.bucket.as_str(), namespace, key]);

        Ok(url.into())
    }
}

#[async_trait]
impl ArtifactStore for GcsArtifactStore {
    #[instrument(skip(self, bytes), fields(bucket = %self.bucket, size = bytes.len()))]
    async fn upload(
        &self,
        namespace: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let object_name = format!("{}/{}", namespace, key);

        let mut request = self
            .client
            .post(self.endpoint())
            .query(&[("uploadType", "media"), ("name", object_name.as_str())])
            .header(CONTENT_TYPE, content_type)
            .body(bytes);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| StorageError::Upload {
            key: object_name.clone(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Upload {
                key: object_name,
                reason: format!("storage responded with {}: {}", status, body.trim()),
            });
        }

        tracing::debug!("Uploaded {}", object_name);
        self.public_object_url(namespace, key)
    }
}
