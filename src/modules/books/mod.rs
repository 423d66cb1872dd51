pub mod models;
pub mod repository;
pub mod routes;

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use axum::{extract::FromRef, Router};
use serde_json::json;
use shelf_authz::StaticIdentityProvider;
use shelf_db::BackendClient;
use shelf_events::EventBus;
use shelf_http::extract::SharedIdentityProvider;
use shelf_kernel::{
    settings::{BackendMode, Settings},
    InitCtx, Migration, Module,
};

use repository::{BookRepository, MemoryBookRepository, RestBookRepository};

/// Table name carried on change events.
pub const EVENT_TABLE: &str = "books";

/// Everything a books handler needs; cheap to clone per request.
#[derive(Clone)]
pub struct BooksState {
    pub repository: Arc<dyn BookRepository>,
    pub identity: SharedIdentityProvider,
    pub events: EventBus,
    pub scope_status_updates: bool,
}

impl FromRef<BooksState> for SharedIdentityProvider {
    fn from_ref(state: &BooksState) -> Self {
        state.identity.clone()
    }
}

impl BooksState {
    /// Wire the hosted backend or the in-memory one, per `backend.mode`.
    pub fn from_settings(settings: &Settings, events: EventBus) -> anyhow::Result<Self> {
        let backend = &settings.backend;

        let (repository, identity): (Arc<dyn BookRepository>, SharedIdentityProvider) =
            match backend.mode {
                BackendMode::Hosted => {
                    backend.validate()?;
                    let url = backend.url.clone().unwrap_or_default();
                    let key = backend.service_role_key.clone().unwrap_or_default();
                    let client = BackendClient::new(url, key)
                        .context("failed to create backend client")?;

                    let repository: Arc<dyn BookRepository> = Arc::new(
                        RestBookRepository::new(client.clone(), backend.books_table.clone()),
                    );
                    let identity: SharedIdentityProvider = Arc::new(client);
                    (repository, identity)
                }
                BackendMode::Memory => {
                    let provider = StaticIdentityProvider::from_config(&backend.static_tokens)
                        .context("invalid backend.static_tokens")?;
                    let repository: Arc<dyn BookRepository> =
                        Arc::new(MemoryBookRepository::new());
                    let identity: SharedIdentityProvider = Arc::new(provider);
                    (repository, identity)
                }
            };

        Ok(Self {
            repository,
            identity,
            events,
            scope_status_updates: settings.books.scope_status_updates,
        })
    }
}

/// Books module: owner-scoped CRUD over the books table plus a change feed
pub struct BooksModule {
    state: BooksState,
}

impl BooksModule {
    pub fn new(state: BooksState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl Module for BooksModule {
    fn name(&self) -> &'static str {
        "books"
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(
            module = self.name(),
            environment = ?ctx.settings.environment,
            backend = ?ctx.settings.backend.mode,
            "books module initialized"
        );
        if !self.state.scope_status_updates {
            tracing::warn!(
                module = self.name(),
                "PUT /api/books/{{id}} updates status without an owner check"
            );
        }
        Ok(())
    }

    fn routes(&self) -> Router {
        routes::router(self.state.clone())
    }

    fn openapi(&self) -> Option<serde_json::Value> {
        Some(openapi_fragment())
    }

    fn migrations(&self) -> Vec<Migration> {
        vec![
            Migration {
                id: "001_books_table",
                up: r#"
create table if not exists public.books (
    id uuid primary key default gen_random_uuid(),
    title text not null check (length(trim(title)) > 0),
    author text not null check (length(trim(author)) > 0),
    status text not null check (status in ('reading', 'completed', 'wishlist')),
    user_id uuid not null references auth.users (id) on delete cascade,
    created_at timestamptz not null default now()
);
create index if not exists books_user_created_idx
    on public.books (user_id, created_at desc);
"#,
            },
            Migration {
                id: "002_books_rls",
                up: r#"
alter table public.books enable row level security;
create policy "books_select_own" on public.books
    for select using (auth.uid() = user_id);
create policy "books_insert_own" on public.books
    for insert with check (auth.uid() = user_id);
create policy "books_update_own" on public.books
    for update using (auth.uid() = user_id);
create policy "books_delete_own" on public.books
    for delete using (auth.uid() = user_id);
"#,
            },
            Migration {
                id: "003_books_realtime",
                up: r#"
alter publication supabase_realtime add table public.books;
"#,
            },
        ]
    }

    async fn start(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "books module started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        tracing::info!(
            module = self.name(),
            subscribers = self.state.events.subscriber_count(),
            "books module stopped"
        );
        Ok(())
    }
}

fn error_response(description: &str) -> serde_json::Value {
    json!({
        "description": description,
        "content": {
            "application/json": {
                "schema": { "$ref": "#/components/schemas/ErrorResponse" }
            }
        }
    })
}

fn book_response(description: &str) -> serde_json::Value {
    json!({
        "description": description,
        "content": {
            "application/json": {
                "schema": { "$ref": "#/components/schemas/Book" }
            }
        }
    })
}

fn openapi_fragment() -> serde_json::Value {
    let id_param = json!({
        "name": "id",
        "in": "path",
        "required": true,
        "schema": { "type": "string", "format": "uuid" }
    });
    let book_request = json!({
        "required": true,
        "content": {
            "application/json": {
                "schema": { "$ref": "#/components/schemas/BookRequest" }
            }
        }
    });

    json!({
        "paths": {
            "/": {
                "get": {
                    "summary": "List the caller's books, newest first",
                    "tags": ["Books"],
                    "security": [{ "bearerAuth": [] }],
                    "parameters": [{
                        "name": "status",
                        "in": "query",
                        "required": false,
                        "schema": {
                            "type": "string",
                            "enum": ["all", "reading", "completed", "wishlist"]
                        }
                    }],
                    "responses": {
                        "200": {
                            "description": "Books owned by the caller",
                            "content": {
                                "application/json": {
                                    "schema": {
                                        "type": "array",
                                        "items": { "$ref": "#/components/schemas/Book" }
                                    }
                                }
                            }
                        },
                        "400": error_response("Unknown status filter"),
                        "401": error_response("Missing or invalid token"),
                        "500": error_response("Backend failure")
                    }
                },
                "post": {
                    "summary": "Add a book",
                    "tags": ["Books"],
                    "security": [{ "bearerAuth": [] }],
                    "requestBody": book_request,
                    "responses": {
                        "201": book_response("Created book"),
                        "400": error_response("Invalid input"),
                        "401": error_response("Missing or invalid token"),
                        "500": error_response("Backend failure")
                    }
                }
            },
            "/{id}": {
                "put": {
                    "summary": "Change a book's status (not owner-scoped unless configured)",
                    "tags": ["Books"],
                    "parameters": [id_param],
                    "requestBody": {
                        "required": true,
                        "content": {
                            "application/json": {
                                "schema": { "$ref": "#/components/schemas/StatusRequest" }
                            }
                        }
                    },
                    "responses": {
                        "200": book_response("Updated book"),
                        "400": error_response("Invalid input or backend rejection"),
                        "404": error_response("No such book")
                    }
                },
                "patch": {
                    "summary": "Edit a book the caller owns",
                    "tags": ["Books"],
                    "security": [{ "bearerAuth": [] }],
                    "parameters": [id_param],
                    "requestBody": book_request,
                    "responses": {
                        "200": book_response("Updated book"),
                        "400": error_response("Invalid input"),
                        "401": error_response("Missing or invalid token"),
                        "404": error_response("No such book for this caller"),
                        "500": error_response("Backend failure")
                    }
                },
                "delete": {
                    "summary": "Delete a book the caller owns",
                    "tags": ["Books"],
                    "security": [{ "bearerAuth": [] }],
                    "parameters": [id_param],
                    "responses": {
                        "200": {
                            "description": "Acknowledged, whether or not a row matched",
                            "content": {
                                "application/json": {
                                    "schema": {
                                        "type": "object",
                                        "properties": { "success": { "type": "boolean" } }
                                    }
                                }
                            }
                        },
                        "401": error_response("Missing or invalid token"),
                        "500": error_response("Backend failure")
                    }
                }
            },
            "/changes": {
                "get": {
                    "summary": "Server-sent stream of book change events",
                    "tags": ["Books"],
                    "security": [{ "bearerAuth": [] }],
                    "responses": {
                        "200": {
                            "description": "text/event-stream of `change` events",
                            "content": {
                                "text/event-stream": {
                                    "schema": { "$ref": "#/components/schemas/ChangeEvent" }
                                }
                            }
                        },
                        "401": error_response("Missing or invalid token")
                    }
                }
            },
            "/health": {
                "get": {
                    "summary": "Books health check",
                    "tags": ["Books"],
                    "responses": {
                        "200": {
                            "description": "OK",
                            "content": { "text/plain": { "schema": { "type": "string" } } }
                        }
                    }
                }
            }
        },
        "components": {
            "schemas": {
                "BookStatus": {
                    "type": "string",
                    "enum": ["reading", "completed", "wishlist"]
                },
                "Book": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "string", "format": "uuid" },
                        "title": { "type": "string" },
                        "author": { "type": "string" },
                        "status": { "$ref": "#/components/schemas/BookStatus" },
                        "user_id": { "type": "string", "format": "uuid" },
                        "created_at": { "type": "string", "format": "date-time" }
                    },
                    "required": ["id", "title", "author", "status", "user_id", "created_at"]
                },
                "BookRequest": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string", "minLength": 1 },
                        "author": { "type": "string", "minLength": 1 },
                        "status": { "$ref": "#/components/schemas/BookStatus" }
                    },
                    "required": ["title", "author", "status"]
                },
                "StatusRequest": {
                    "type": "object",
                    "properties": {
                        "status": { "$ref": "#/components/schemas/BookStatus" }
                    },
                    "required": ["status"]
                },
                "ChangeEvent": {
                    "type": "object",
                    "properties": {
                        "kind": { "type": "string", "enum": ["INSERT", "UPDATE", "DELETE"] },
                        "table": { "type": "string" },
                        "record_id": { "type": "string", "format": "uuid" },
                        "at": { "type": "string", "format": "date-time" }
                    },
                    "required": ["kind", "table", "record_id", "at"]
                }
            }
        }
    })
}

/// Build the books module from settings
pub fn create_module(settings: &Settings, events: EventBus) -> anyhow::Result<Arc<dyn Module>> {
    let state = BooksState::from_settings(settings, events)?;
    Ok(Arc::new(BooksModule::new(state)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelf_kernel::settings::BackendSettings;

    #[test]
    fn hosted_mode_without_credentials_fails_to_build() {
        let settings = Settings::default();
        let err = create_module(&settings, EventBus::new()).err().unwrap();
        assert!(err.to_string().contains("backend url is missing"));
    }

    #[test]
    fn memory_mode_builds_without_credentials() {
        let settings = Settings {
            backend: BackendSettings {
                mode: BackendMode::Memory,
                ..BackendSettings::default()
            },
            ..Settings::default()
        };
        let module = create_module(&settings, EventBus::new()).unwrap();
        assert_eq!(module.name(), "books");
        assert_eq!(module.migrations().len(), 3);
    }

    #[test]
    fn openapi_fragment_documents_every_route() {
        let fragment = openapi_fragment();
        let paths = fragment["paths"].as_object().unwrap();
        for path in ["/", "/{id}", "/changes", "/health"] {
            assert!(paths.contains_key(path), "missing {path}");
        }
        for method in ["put", "patch", "delete"] {
            assert!(fragment["paths"]["/{id}"][method].is_object());
        }
    }
}
