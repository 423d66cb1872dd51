//! Caller identity and the seam to whatever issues bearer tokens.
//!
//! Every data operation resolves its caller through an [`IdentityProvider`]
//! first. Nothing here caches: each request re-validates its token.

use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable user id used to scope every read and write.
    pub user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Identity {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            email: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,

    #[error("malformed authorization header")]
    MalformedHeader,

    #[error("invalid token")]
    InvalidToken,

    /// The provider itself could not be reached or answered garbage.
    #[error("identity provider failure: {0}")]
    Provider(String),
}

/// Resolves bearer tokens to identities.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Pull the token out of an `Authorization` header value.
///
/// Accepts `Bearer <token>` with any casing of the scheme.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::MissingToken)?;
    let (scheme, token) = header
        .trim()
        .split_once(' ')
        .ok_or(AuthError::MalformedHeader)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::MalformedHeader);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }

    Ok(token)
}

/// Fixed token table, for local runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    tokens: HashMap<String, Identity>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `token -> user id` pairs as they appear in configuration.
    pub fn from_config(tokens: &HashMap<String, String>) -> anyhow::Result<Self> {
        let mut provider = Self::new();
        for (token, user_id) in tokens {
            let user_id = Uuid::parse_str(user_id)
                .with_context(|| format!("static token user id '{user_id}' is not a uuid"))?;
            provider = provider.with_token(token.clone(), Identity::new(user_id));
        }
        Ok(provider)
    }

    pub fn with_token(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.tokens.insert(token.into(), identity);
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn resolve(&self, token: &str) -> Result<Identity, AuthError> {
        self.tokens.get(token).cloned().ok_or_else(|| {
            tracing::debug!(target: "shelf-authz", "unknown static token");
            AuthError::InvalidToken
        })
    }
}
