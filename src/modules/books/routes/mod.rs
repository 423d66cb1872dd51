//! HTTP handlers for `/api/books`.

use std::convert::Infallible;

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::get,
    Json, Router,
};
use serde_json::json;
use shelf_events::{ChangeEvent, ChangeKind};
use shelf_http::{
    error::AppError,
    extract::{authenticate, AuthUser, JsonBody, QueryParams},
};
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use uuid::Uuid;

use super::{
    models::{Book, BookRequest, FieldError, ListQuery, StatusFilter, StatusRequest},
    BooksState, EVENT_TABLE,
};

pub fn router(state: BooksState) -> Router {
    Router::new()
        .route("/", get(list_books).post(create_book))
        .route("/health", get(health_check))
        .route("/changes", get(changes))
        .route(
            "/{id}",
            axum::routing::put(set_book_status)
                .patch(update_book)
                .delete(delete_book),
        )
        .with_state(state)
}

fn invalid_input(errors: Vec<FieldError>) -> AppError {
    AppError::validation(
        errors.iter().map(FieldError::to_json).collect(),
        "Invalid input",
    )
}

fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::bad_request("Invalid book id"))
}

async fn health_check() -> &'static str {
    "books module is healthy"
}

async fn list_books(
    State(state): State<BooksState>,
    AuthUser(caller): AuthUser,
    QueryParams(query): QueryParams<ListQuery>,
) -> Result<Json<Vec<Book>>, AppError> {
    let filter = StatusFilter::parse(query.status.as_deref()).map_err(|e| {
        AppError::validation(
            vec![json!({ "field": "status", "error": e.to_string() })],
            "Invalid status filter",
        )
    })?;

    let books = state
        .repository
        .list(caller.user_id, filter)
        .await
        .context("Failed to fetch books")?;

    tracing::debug!(user_id = %caller.user_id, %filter, count = books.len(), "listed books");
    Ok(Json(books))
}

async fn create_book(
    State(state): State<BooksState>,
    AuthUser(caller): AuthUser,
    JsonBody(request): JsonBody<BookRequest>,
) -> Result<impl IntoResponse, AppError> {
    let input = request.validate().map_err(invalid_input)?;

    let book = state
        .repository
        .create(caller.user_id, input)
        .await
        .context("Failed to add book")?;

    tracing::info!(user_id = %caller.user_id, book_id = %book.id, "book created");
    state
        .events
        .publish(ChangeEvent::new(ChangeKind::Insert, EVENT_TABLE, book.id));

    Ok((StatusCode::CREATED, Json(book)))
}

/// Full edit, scoped by id and owner.
async fn update_book(
    State(state): State<BooksState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<String>,
    JsonBody(request): JsonBody<BookRequest>,
) -> Result<Json<Book>, AppError> {
    let id = parse_id(&id)?;
    let input = request.validate().map_err(invalid_input)?;

    let book = state
        .repository
        .update(caller.user_id, id, input)
        .await
        .context("Failed to update book")?
        .ok_or_else(|| AppError::not_found("Book not found"))?;

    tracing::info!(user_id = %caller.user_id, book_id = %book.id, "book updated");
    state
        .events
        .publish(ChangeEvent::new(ChangeKind::Update, EVENT_TABLE, book.id));

    Ok(Json(book))
}

/// Status-only edit.
///
/// Filters by id alone unless `books.scope_status_updates` is on: any caller
/// who knows an id can change that book's status. Kept as-is pending an
/// ownership decision.
async fn set_book_status(
    State(state): State<BooksState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    JsonBody(request): JsonBody<StatusRequest>,
) -> Result<Json<Book>, AppError> {
    let owner = if state.scope_status_updates {
        Some(authenticate(state.identity.as_ref(), &headers).await?.user_id)
    } else {
        None
    };

    let id = parse_id(&id)?;
    let status = request.validate().map_err(invalid_input)?;

    if owner.is_none() {
        tracing::warn!(book_id = %id, "status update without owner check");
    }

    let book = match state.repository.set_status(id, owner, status).await {
        Ok(Some(book)) => book,
        Ok(None) => return Err(AppError::not_found("Book not found")),
        Err(e) => {
            tracing::error!(book_id = %id, error = %e, "status update failed");
            return Err(AppError::backend(e.message()));
        }
    };

    state
        .events
        .publish(ChangeEvent::new(ChangeKind::Update, EVENT_TABLE, book.id));

    Ok(Json(book))
}

async fn delete_book(
    State(state): State<BooksState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_id(&id)?;

    state
        .repository
        .delete(caller.user_id, id)
        .await
        .context("Failed to delete")?;

    tracing::info!(user_id = %caller.user_id, book_id = %id, "book deleted");
    state
        .events
        .publish(ChangeEvent::new(ChangeKind::Delete, EVENT_TABLE, id));

    Ok(Json(json!({ "success": true })))
}

/// Server-sent change feed. Carries every owner's events; clients refetch
/// through the scoped list.
async fn changes(
    State(state): State<BooksState>,
    AuthUser(caller): AuthUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::info!(user_id = %caller.user_id, "change feed subscribed");

    let stream = BroadcastStream::new(state.events.subscribe()).filter_map(|received| {
        match received {
            Ok(change) => match Event::default().event("change").json_data(&change) {
                Ok(event) => Some(Ok(event)),
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode change event");
                    None
                }
            },
            Err(lagged) => {
                // Missed events collapse into a single refetch hint.
                tracing::warn!(error = %lagged, "change feed subscriber lagged");
                Some(Ok(Event::default().event("lagged").data("refetch")))
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
