//! Request extractors shared by module handlers.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequest, FromRequestParts, Query, Request},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    Json,
};
use serde::de::DeserializeOwned;
use shelf_authz::{bearer_token, Identity, IdentityProvider};

use crate::error::AppError;

pub type SharedIdentityProvider = Arc<dyn IdentityProvider>;

/// Resolve the caller from the `Authorization` header.
pub async fn authenticate(
    provider: &dyn IdentityProvider,
    headers: &HeaderMap,
) -> Result<Identity, AppError> {
    let header = headers
        .get(AUTHORIZATION)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| AppError::unauthorized("Malformed authorization header"))
        })
        .transpose()?;
    let token = bearer_token(header)?;

    Ok(provider.resolve(token).await?)
}

/// Authenticated caller; rejects with 401 before the handler runs.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Identity);

impl<S> FromRequestParts<S> for AuthUser
where
    SharedIdentityProvider: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let provider = SharedIdentityProvider::from_ref(state);
        let identity = authenticate(provider.as_ref(), &parts.headers).await?;

        tracing::debug!(user_id = %identity.user_id, "caller authenticated");

        Ok(AuthUser(identity))
    }
}

/// JSON body whose decode failures surface as 400 `Invalid input`.
#[derive(Debug, Clone)]
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => Err(AppError::validation(
                vec![serde_json::json!({ "error": rejection.body_text() })],
                "Invalid input",
            )),
        }
    }
}

/// Query string whose decode failures surface as 400 `Invalid query parameters`.
#[derive(Debug, Clone)]
pub struct QueryParams<T>(pub T);

impl<S, T> FromRequestParts<S> for QueryParams<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(QueryParams(value)),
            Err(rejection) => Err(AppError::validation(
                vec![serde_json::json!({ "error": rejection.body_text() })],
                "Invalid query parameters",
            )),
        }
    }
}
