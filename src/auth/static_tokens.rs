use super::{Identity, IdentityVerifier};
use crate::error::AuthError;
use async_trait::async_trait;
use std::collections::HashMap;

/// Token table loaded from configuration, for local development.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, String>,
}

impl StaticTokenVerifier {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl IdentityVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        self.tokens
            .get(token)
            .map(|uid| Identity {
                uid: uid.clone(),
                email: None,
            })
            .ok_or_else(|| AuthError::InvalidToken("unknown token".into()))
    }
}
