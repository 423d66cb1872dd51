//! Auth API calls: token introspection, password sign-in, sign-up.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shelf_authz::{AuthError, Identity, IdentityProvider};
use uuid::Uuid;

use crate::{check, BackendClient, BackendError};

/// User record as returned by the auth API.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

/// Tokens issued by a successful sign-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    pub user: AuthUserSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUserSummary {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

/// Outcome of a sign-up.
#[derive(Debug, Clone)]
pub enum SignUp {
    /// Account is usable immediately.
    Session(Session),
    /// Account exists but the email address must be confirmed first.
    ConfirmationPending { user_id: Option<Uuid> },
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

impl BackendClient {
    /// Resolve an access token to its user.
    pub async fn get_user(&self, access_token: &str) -> Result<AuthUser, BackendError> {
        let request = self.http.get(self.url("/auth/v1/user"));
        let response = self
            .authorize(request, Some(access_token))
            .send()
            .await?;

        Ok(check(response).await?.json().await?)
    }

    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, BackendError> {
        let request = self
            .http
            .post(self.url("/auth/v1/token"))
            .query(&[("grant_type", "password")])
            .json(&Credentials { email, password });
        let response = self.authorize(request, None).send().await?;

        Ok(check(response).await?.json().await?)
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<SignUp, BackendError> {
        let request = self
            .http
            .post(self.url("/auth/v1/signup"))
            .json(&Credentials { email, password });
        let response = self.authorize(request, None).send().await?;
        let body: serde_json::Value = check(response).await?.json().await?;

        parse_sign_up(body)
    }
}

/// Sign-up answers with a session when confirmation is disabled and with a
/// bare user otherwise.
fn parse_sign_up(body: serde_json::Value) -> Result<SignUp, BackendError> {
    if body.get("access_token").is_some() {
        let session = serde_json::from_value(body)
            .map_err(|e| BackendError::Decode(format!("sign-up session: {e}")))?;
        return Ok(SignUp::Session(session));
    }

    let user_id = body
        .get("id")
        .or_else(|| body.get("user").and_then(|u| u.get("id")))
        .and_then(|id| id.as_str())
        .and_then(|id| Uuid::parse_str(id).ok());

    Ok(SignUp::ConfirmationPending { user_id })
}

#[async_trait]
impl IdentityProvider for BackendClient {
    async fn resolve(&self, token: &str) -> Result<Identity, AuthError> {
        match self.get_user(token).await {
            Ok(user) => Ok(Identity {
                user_id: user.id,
                email: user.email,
            }),
            Err(e) => match e.status() {
                Some(status) if (400..500).contains(&status) => {
                    tracing::debug!(target: "shelf-db", status, "token rejected by auth api");
                    Err(AuthError::InvalidToken)
                }
                _ => Err(AuthError::Provider(e.to_string())),
            },
        }
    }
}
