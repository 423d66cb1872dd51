//! HTTP client for the hosted backend.
//!
//! The backend exposes two surfaces under one base URL: an auth API at
//! `/auth/v1` and a REST view of the relational store at `/rest/v1`. Both
//! expect the project key in an `apikey` header.

use std::time::Duration;

use anyhow::Context;
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use thiserror::Error;

pub mod auth;
pub mod rest;

pub use auth::{AuthUser, Session, SignUp};
pub use rest::TableQuery;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected backend response: {0}")]
    Decode(String),
}

impl BackendError {
    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::Api { status, .. } => Some(*status),
            BackendError::Http(e) => e.status().map(|s| s.as_u16()),
            BackendError::Decode(_) => None,
        }
    }

    /// Message the backend attached to the failure, if it sent one.
    pub fn message(&self) -> String {
        match self {
            BackendError::Api { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Shared handle to one backend project, authenticated with a single key.
///
/// Server-side code builds this with the service-role key; client tools use
/// the public anon key.
#[derive(Clone, Debug)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("failed to build backend http client")?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Start a query against one table of the REST store.
    pub fn from(&self, table: &str) -> TableQuery<'_> {
        TableQuery::new(self, table)
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Attach the project key; `bearer` defaults to the key itself.
    pub(crate) fn authorize(
        &self,
        request: RequestBuilder,
        bearer: Option<&str>,
    ) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(bearer.unwrap_or(&self.api_key))
    }
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Best-effort extraction of a human message from an error body.
pub(crate) fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<ErrorPayload>(body)
        .ok()
        .and_then(|p| p.message.or(p.msg).or(p.error_description).or(p.error))
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            } else {
                body.trim().to_string()
            }
        })
}

/// Turn a non-success response into [`BackendError::Api`].
pub(crate) async fn check(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(status, &body);
    tracing::debug!(target: "shelf-db", status = status.as_u16(), %message, "backend error");

    Err(BackendError::Api {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_dropped() {
        let client = BackendClient::new("https://project.example.co/", "anon").unwrap();
        assert_eq!(client.base_url(), "https://project.example.co");
        assert_eq!(
            client.url("/rest/v1/books"),
            "https://project.example.co/rest/v1/books"
        );
    }

    #[test]
    fn error_message_prefers_structured_fields() {
        let body = r#"{"code":"22P02","message":"invalid input value for enum"}"#;
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, body),
            "invalid input value for enum"
        );

        let body = r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#;
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, body),
            "Invalid login credentials"
        );
    }

    #[test]
    fn error_message_falls_back_to_body_or_reason() {
        assert_eq!(error_message(StatusCode::BAD_GATEWAY, "upstream down"), "upstream down");
        assert_eq!(error_message(StatusCode::NOT_FOUND, ""), "Not Found");
    }

    #[test]
    fn api_error_exposes_status_and_message() {
        let err = BackendError::Api {
            status: 409,
            message: "duplicate key".to_string(),
        };
        assert_eq!(err.status(), Some(409));
        assert_eq!(err.message(), "duplicate key");
        assert_eq!(err.to_string(), "backend returned 409: duplicate key");
    }
}
