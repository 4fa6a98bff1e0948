mod firebase;
mod static_tokens;

pub use firebase::FirebaseVerifier;
pub use static_tokens::StaticTokenVerifier;

use crate::{
    config::{AuthConfig, AuthProvider},
    error::AuthError,
};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::time::timeout;
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub email: Option<String>,
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync + 'static {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

pub fn build_verifier(provider: &AuthProvider) -> Result<Arc<dyn IdentityVerifier>, reqwest::Error> {
    let verifier: Arc<dyn IdentityVerifier> = match provider {
        AuthProvider::Firebase {
            identity_url,
            api_key,
        } => Arc::new(FirebaseVerifier::new(identity_url, api_key)?),
        AuthProvider::Static { tokens } => Arc::new(StaticTokenVerifier::new(tokens.clone())),
    };
    Ok(verifier)
}

/// Resolves the caller's identity before any inference or storage work.
pub struct Authenticator {
    verifier: Arc<dyn IdentityVerifier>,
    timeout: Duration,
    enforce_user_match: bool,
}

impl Authenticator {
    pub fn new(verifier: Arc<dyn IdentityVerifier>, config: &AuthConfig) -> Self {
        Self {
            verifier,
            timeout: config.timeout(),
            enforce_user_match: config.enforce_user_match,
        }
    }

    #[instrument(skip(self, token))]
    pub async fn authenticate(&self, user_id: &str, token: &str) -> Result<Identity, AuthError> {
        let token = strip_bearer(token);
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let identity = timeout(self.timeout, self.verifier.verify(token))
            .await
            .map_err(|_| {
                AuthError::Unavailable(format!(
                    "verification timed out after {}s",
                    self.timeout.as_secs()
                ))
            })??;

        if self.enforce_user_match && identity.uid != user_id {
            return Err(AuthError::UserMismatch(user_id.to_string()));
        }

        tracing::debug!(uid = %identity.uid, "Caller authenticated");
        Ok(identity)
    }
}

fn strip_bearer(token: &str) -> &str {
    let token = token.trim();
    match token.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => token[7..].trim_start(),
        _ => token,
    }
}
