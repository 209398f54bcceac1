//! Integration tests for the HTTP API
//!
//! Requests go straight into the router with `oneshot`; no socket is bound
//! and no upstream service is contacted.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use noor_core::config::Config;
use noor_core::database::LocalStore;
use noor_core::remote::{MemoryRemoteStore, RemoteStore, Session};
use noor_core::server::create_router;
use noor_core::services::{ContentClient, EmailService, LibraryProvider};
use noor_core::storage::BlobStore;
use noor_core::AppState;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const SECRET: &str = "revalidate-me";

/// Helper to build a router whose upstreams are unreachable
async fn create_test_app(secret: Option<&str>) -> (Router, TempDir) {
    create_app(secret, None).await
}

/// Helper to build a router whose library syncs to `remote`
async fn create_library_app(remote: &MemoryRemoteStore) -> (Router, TempDir) {
    create_app(None, Some(remote.clone())).await
}

async fn create_app(secret: Option<&str>, remote: Option<MemoryRemoteStore>) -> (Router, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config {
        data_dir: temp_dir.path().to_path_buf(),
        revalidate_secret: secret.map(str::to_string),
        dua_api_url: "http://127.0.0.1:9".to_string(),
        azkar_api_url: "http://127.0.0.1:9/azkar.json".to_string(),
        remote_max_attempts: 1,
        ..Config::default()
    };

    let local = LocalStore::in_memory().await.unwrap();
    let remote: Option<Arc<dyn RemoteStore>> = match remote {
        Some(remote) => Some(Arc::new(remote)),
        None => None,
    };
    let library = LibraryProvider::new(local, BlobStore::new(temp_dir.path().join("attachments")), remote);
    let content = ContentClient::from_config(&config).unwrap();
    let email = EmailService::from_config(&config).unwrap();

    let state = AppState::new(config, library, content, email);
    (create_router(Arc::new(state)), temp_dir)
}

async fn send(app: Router, method: Method, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if body.is_some() {
        request = request.header("content-type", "application/json");
    }
    let request = request
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_health() {
    let (app, _temp) = create_test_app(None).await;
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_revalidate_by_tag() {
    let (app, _temp) = create_test_app(Some(SECRET)).await;

    let (status, body) = send(
        app,
        Method::POST,
        "/api/revalidate?secret=revalidate-me&tag=duas",
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revalidated"], true);
    assert_eq!(body["tag"], "duas");
    assert!(body["now"].as_i64().unwrap() > 0);
    assert!(body.get("path").is_none());
}

#[tokio::test]
async fn test_revalidate_by_path_with_get() {
    let (app, _temp) = create_test_app(Some(SECRET)).await;

    let (status, body) = send(
        app,
        Method::GET,
        "/api/revalidate?secret=revalidate-me&path=/categories",
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["path"], "/categories");
}

#[tokio::test]
async fn test_revalidate_wrong_secret_is_unauthorized() {
    let (app, _temp) = create_test_app(Some(SECRET)).await;
    let (status, _) = send(app, Method::POST, "/api/revalidate?secret=nope&tag=duas", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_revalidate_without_configured_secret_is_unauthorized() {
    let (app, _temp) = create_test_app(None).await;
    let (status, _) = send(app, Method::POST, "/api/revalidate?secret=&tag=duas", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_revalidate_needs_tag_or_path() {
    let (app, _temp) = create_test_app(Some(SECRET)).await;
    let (status, body) = send(app, Method::POST, "/api/revalidate?secret=revalidate-me", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Missing tag or path");
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    let (app, _temp) = create_test_app(None).await;
    let (status, body) = send(app, Method::GET, "/api/duas/categories?lang=en", None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn test_unknown_language_is_bad_request() {
    let (app, _temp) = create_test_app(None).await;
    let (status, _) = send(app, Method::GET, "/api/duas/categories?lang=fr", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_welcome_email_without_key_is_unavailable() {
    let (app, _temp) = create_test_app(None).await;
    let (status, _) = send(
        app,
        Method::POST,
        "/api/email/welcome",
        Some(r#"{"email":"amina@example.com","name":"Amina"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

const HADITH: &str = r#"{"type":"hadith","id":"1","collection":"bukhari","text":"Actions are by intentions"}"#;

#[tokio::test]
async fn test_library_favorites_sync_after_sign_in() {
    let remote = MemoryRemoteStore::new();
    let (app, _temp) = create_library_app(&remote).await;

    let (status, body) = send(app.clone(), Method::POST, "/api/library/favorites/toggle", Some(HADITH)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["favorite"], true);

    let (status, body) = send(
        app.clone(),
        Method::POST,
        "/api/library/session",
        Some(r#"{"userId":"user-7","jwt":"jwt-7"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["report"]["pushed"], 1);
    assert_eq!(
        remote.list_favorites(&Session::new("user-7", "jwt-7")).await.unwrap().len(),
        1
    );

    let (status, body) = send(app.clone(), Method::GET, "/api/library/favorites?type=hadith", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, _) = send(app.clone(), Method::DELETE, "/api/library/favorites/hadith/1", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(remote
        .list_favorites(&Session::new("user-7", "jwt-7"))
        .await
        .unwrap()
        .is_empty());

    let (status, _) = send(app, Method::DELETE, "/api/library/favorites/hadith/1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_library_bookmark_note_round_trip() {
    let remote = MemoryRemoteStore::new();
    let (app, _temp) = create_library_app(&remote).await;

    let (status, _) = send(
        app.clone(),
        Method::POST,
        "/api/library/bookmarks",
        Some(r#"{"surah":2,"ayah":255,"surah_name":"Al-Baqarah","ayah_text":"..."}"#),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        app.clone(),
        Method::PUT,
        "/api/library/bookmarks/2/255/note",
        Some(r#"{"note":"  memorize  "}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["note"], "memorize");

    let (status, body) = send(app.clone(), Method::GET, "/api/library/bookmarks/2/255", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["note"], "memorize");

    let (status, _) = send(app, Method::GET, "/api/library/bookmarks/0/1", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_library_resync_without_session_is_unauthorized() {
    let remote = MemoryRemoteStore::new();
    let (app, _temp) = create_library_app(&remote).await;
    let (status, _) = send(app, Method::POST, "/api/library/sync", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_library_sign_in_without_remote_is_unavailable() {
    let (app, _temp) = create_test_app(None).await;
    let (status, _) = send(
        app.clone(),
        Method::POST,
        "/api/library/session",
        Some(r#"{"userId":"user-7","jwt":"jwt-7"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, body) = send(app, Method::GET, "/api/library", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["signedIn"], false);
}
