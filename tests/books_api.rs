use std::{collections::HashMap, time::Duration};

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use shelf_kernel::settings::{BackendMode, BackendSettings, BooksSettings, Settings};
use tokio_stream::StreamExt;
use tower::ServiceExt;

const ALICE: &str = "alice-token";
const ALICE_ID: &str = "7c9e6679-7425-40de-944b-e07fc1f90ae7";
const BOB: &str = "bob-token";

fn settings(scope_status_updates: bool) -> Settings {
    let mut static_tokens = HashMap::new();
    static_tokens.insert(ALICE.to_string(), ALICE_ID.to_string());
    static_tokens.insert(
        BOB.to_string(),
        "16fd2706-8baf-433b-82eb-8c7fada847da".to_string(),
    );

    Settings {
        backend: BackendSettings {
            mode: BackendMode::Memory,
            static_tokens,
            ..BackendSettings::default()
        },
        books: BooksSettings {
            scope_status_updates,
        },
        ..Settings::default()
    }
}

fn app_with(scope_status_updates: bool) -> Router {
    let settings = settings(scope_status_updates);
    let registry = shelf_app::build_registry(&settings).unwrap();
    shelf_http::build_router(&registry, &settings)
}

fn app() -> Router {
    app_with(false)
}

async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, value)
}

async fn get(app: &Router, uri: &str, token: &str) -> (StatusCode, Value) {
    call(app, Method::GET, uri, Some(token), None).await
}

async fn create(app: &Router, token: &str, title: &str, status: &str) -> Value {
    let (code, body) = call(
        app,
        Method::POST,
        "/api/books",
        Some(token),
        Some(json!({ "title": title, "author": "Author", "status": status })),
    )
    .await;
    assert_eq!(code, StatusCode::CREATED, "{body}");
    body
}

fn titles(body: &Value) -> Vec<&str> {
    body.as_array()
        .unwrap()
        .iter()
        .map(|b| b["title"].as_str().unwrap())
        .collect()
}

#[tokio::test]
async fn dune_lifecycle() {
    let app = app();

    let (code, created) = call(
        &app,
        Method::POST,
        "/api/books",
        Some(ALICE),
        Some(json!({ "title": "Dune", "author": "Herbert", "status": "wishlist" })),
    )
    .await;
    assert_eq!(code, StatusCode::CREATED);
    assert_eq!(created["status"], "wishlist");
    assert_eq!(created["user_id"], ALICE_ID);
    assert!(created["id"].is_string());
    assert!(created["created_at"].is_string());
    let id = created["id"].as_str().unwrap();

    let (code, updated) = call(
        &app,
        Method::PATCH,
        &format!("/api/books/{id}"),
        Some(ALICE),
        Some(json!({ "title": "Dune", "author": "Herbert", "status": "reading" })),
    )
    .await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(updated["status"], "reading");

    let (_, reading) = get(&app, "/api/books?status=reading", ALICE).await;
    assert_eq!(titles(&reading), vec!["Dune"]);
    let (_, wishlist) = get(&app, "/api/books?status=wishlist", ALICE).await;
    assert!(titles(&wishlist).is_empty());

    let uri = format!("/api/books/{id}");
    let (code, ack) = call(&app, Method::DELETE, &uri, Some(ALICE), None).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(ack, json!({ "success": true }));

    let (_, all) = get(&app, "/api/books", ALICE).await;
    assert!(titles(&all).is_empty());
}

#[tokio::test]
async fn every_data_route_requires_a_token() {
    let app = app();
    let id = "0b8e3a6e-7f43-4a0c-9a0e-1f7d2c1b9a11";

    let (code, body) = call(&app, Method::GET, "/api/books", None, None).await;
    assert_eq!(code, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["message"], "Missing token");

    let (code, _) = call(
        &app,
        Method::POST,
        "/api/books",
        None,
        Some(json!({ "title": "x", "author": "y", "status": "reading" })),
    )
    .await;
    assert_eq!(code, StatusCode::UNAUTHORIZED);

    let (code, _) = call(&app, Method::DELETE, &format!("/api/books/{id}"), None, None).await;
    assert_eq!(code, StatusCode::UNAUTHORIZED);

    let (code, body) = call(&app, Method::GET, "/api/books", Some("forged"), None).await;
    assert_eq!(code, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["message"], "Invalid token");
}

#[tokio::test]
async fn invalid_input_is_rejected_before_storage() {
    let app = app();

    for body in [
        json!({ "title": "", "author": "Herbert", "status": "reading" }),
        json!({ "title": "Dune", "status": "reading" }),
        json!({ "title": "Dune", "author": "Herbert", "status": "abandoned" }),
        json!("not an object"),
    ] {
        let (code, response) =
            call(&app, Method::POST, "/api/books", Some(ALICE), Some(body)).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(response["error"]["message"], "Invalid input");
    }

    let (_, all) = get(&app, "/api/books", ALICE).await;
    assert!(titles(&all).is_empty());

    let (code, _) = get(&app, "/api/books?status=finished", ALICE).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn undecodable_query_gets_the_error_envelope() {
    let app = app();

    let (code, body) = get(&app, "/api/books?status=reading&status=completed", ALICE).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");
    assert_eq!(body["error"]["message"], "Invalid query parameters");
    assert!(body["error"]["trace_id"].is_string());
}

#[tokio::test]
async fn listing_is_owner_scoped_and_newest_first() {
    let app = app();
    create(&app, ALICE, "Foundation", "completed").await;
    create(&app, ALICE, "Hyperion", "reading").await;
    create(&app, ALICE, "Solaris", "completed").await;
    create(&app, BOB, "Bob's Book", "completed").await;

    let (_, all) = get(&app, "/api/books?status=all", ALICE).await;
    assert_eq!(titles(&all), vec!["Solaris", "Hyperion", "Foundation"]);

    let (_, completed) = get(&app, "/api/books?status=completed", ALICE).await;
    for book in completed.as_array().unwrap() {
        assert_eq!(book["status"], "completed");
        assert_eq!(book["user_id"], ALICE_ID);
    }
    assert_eq!(titles(&completed), vec!["Solaris", "Foundation"]);
}

#[tokio::test]
async fn other_owners_cannot_edit_or_delete() {
    let app = app();
    let book = create(&app, ALICE, "Dune", "reading").await;
    let id = book["id"].as_str().unwrap();

    let (code, _) = call(
        &app,
        Method::PATCH,
        &format!("/api/books/{id}"),
        Some(BOB),
        Some(json!({ "title": "Mine now", "author": "Bob", "status": "completed" })),
    )
    .await;
    assert_eq!(code, StatusCode::NOT_FOUND);

    // Acknowledged, but nothing is removed.
    let (code, _) = call(&app, Method::DELETE, &format!("/api/books/{id}"), Some(BOB), None).await;
    assert_eq!(code, StatusCode::OK);

    let (_, all) = get(&app, "/api/books", ALICE).await;
    assert_eq!(titles(&all), vec!["Dune"]);
    assert_eq!(all[0]["status"], "reading");
}

#[tokio::test]
async fn status_update_is_unscoped_by_default() {
    let app = app();
    let book = create(&app, ALICE, "Dune", "reading").await;
    let id = book["id"].as_str().unwrap();

    // No token at all, and still applied to Alice's book.
    let (code, updated) = call(
        &app,
        Method::PUT,
        &format!("/api/books/{id}"),
        None,
        Some(json!({ "status": "wishlist" })),
    )
    .await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(updated["status"], "wishlist");
    assert_eq!(updated["user_id"], ALICE_ID);

    let (code, _) = call(
        &app,
        Method::PUT,
        &format!("/api/books/{id}"),
        None,
        Some(json!({ "status": "shelved" })),
    )
    .await;
    assert_eq!(code, StatusCode::BAD_REQUEST);

    let (code, _) = call(
        &app,
        Method::PUT,
        "/api/books/0b8e3a6e-7f43-4a0c-9a0e-1f7d2c1b9a11",
        None,
        Some(json!({ "status": "reading" })),
    )
    .await;
    assert_eq!(code, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn scoped_status_update_checks_owner() {
    let app = app_with(true);
    let book = create(&app, ALICE, "Dune", "reading").await;
    let uri = format!("/api/books/{}", book["id"].as_str().unwrap());

    let completed = json!({ "status": "completed" });
    let (code, _) = call(&app, Method::PUT, &uri, None, Some(completed.clone())).await;
    assert_eq!(code, StatusCode::UNAUTHORIZED);

    let (code, _) = call(&app, Method::PUT, &uri, Some(BOB), Some(completed.clone())).await;
    assert_eq!(code, StatusCode::NOT_FOUND);

    let (code, updated) = call(&app, Method::PUT, &uri, Some(ALICE), Some(completed)).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(updated["status"], "completed");
}

#[tokio::test]
async fn sequential_status_updates_last_write_wins() {
    let app = app();
    let book = create(&app, ALICE, "Dune", "wishlist").await;
    let uri = format!("/api/books/{}", book["id"].as_str().unwrap());

    call(&app, Method::PUT, &uri, Some(ALICE), Some(json!({ "status": "reading" }))).await;
    call(&app, Method::PUT, &uri, Some(ALICE), Some(json!({ "status": "completed" }))).await;

    let (_, all) = get(&app, "/api/books", ALICE).await;
    assert_eq!(all[0]["status"], "completed");
}

#[tokio::test]
async fn malformed_ids_are_bad_requests() {
    let app = app();
    let (code, body) = call(&app, Method::DELETE, "/api/books/not-a-uuid", Some(ALICE), None).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "Invalid book id");
}

#[tokio::test]
async fn change_feed_streams_mutations() {
    let app = app();

    let request = Request::builder()
        .uri("/api/books/changes")
        .header(header::AUTHORIZATION, format!("Bearer {BOB}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    // Events from other owners are delivered too.
    let book = create(&app, ALICE, "Dune", "reading").await;

    let mut stream = response.into_body().into_data_stream();
    let chunk = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("no change event within timeout")
        .unwrap()
        .unwrap();
    let frame = String::from_utf8(chunk.to_vec()).unwrap();

    assert!(frame.contains("event: change"), "{frame}");
    assert!(frame.contains("\"kind\":\"INSERT\""), "{frame}");
    assert!(frame.contains(book["id"].as_str().unwrap()), "{frame}");
}

#[tokio::test]
async fn docs_and_health_are_served() {
    let app = app();

    let (code, body) = call(&app, Method::GET, "/healthz", None, None).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body, Value::String("ok".into()));

    let (code, spec) = call(&app, Method::GET, "/docs/openapi.json", None, None).await;
    assert_eq!(code, StatusCode::OK);
    assert!(spec["paths"]["/api/books"]["get"].is_object());
    assert!(spec["paths"]["/api/books/{id}"]["patch"].is_object());
}
