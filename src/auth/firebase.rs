use super::{Identity, IdentityVerifier};
use crate::error::AuthError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Verifies Firebase ID tokens with the Identity Toolkit `accounts:lookup`
/// endpoint.
#[derive(Debug, Clone)]
pub struct FirebaseVerifier {
    client: Client,
    lookup_url: String,
    api_key: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupRequest<'a> {
    id_token: &'a str,
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

impl FirebaseVerifier {
    pub fn new(identity_url: &str, api_key: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            lookup_url: format!("{}/v1/accounts:lookup", identity_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl IdentityVerifier for FirebaseVerifier {
    #[instrument(skip(self, token))]
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let response = self
            .client
            .post(&self.lookup_url)
            .query(&[("key", self.api_key.as_str())])
            .json(&LookupRequest { id_token: token })
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                let lookup: LookupResponse = response
                    .json()
                    .await
                    .map_err(|e| AuthError::Unavailable(e.to_string()))?;
                let user = lookup
                    .users
                    .into_iter()
                    .next()
                    .ok_or_else(|| AuthError::InvalidToken("no account for token".into()))?;
                Ok(Identity {
                    uid: user.local_id,
                    email: user.email,
                })
            }
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                let reason = response
                    .json::<ErrorEnvelope>()
                    .await
                    .map(|envelope| envelope.error.message)
                    .unwrap_or_else(|_| "token rejected".into());
                Err(AuthError::InvalidToken(reason))
            }
            status => Err(AuthError::Unavailable(format!(
                "identity service responded with {}",
                status
            ))),
        }
    }
}
