//! HTTP server
//!
//! The device library, content proxies, the welcome-email trigger and
//! on-demand cache revalidation.

pub mod http;
pub mod library;

use crate::app::AppState;
use crate::config::MAX_ATTACHMENT_BYTES;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(http::health))
        // Cache invalidation
        .route(
            "/api/revalidate",
            get(http::revalidate).post(http::revalidate),
        )
        // Content
        .route("/api/duas/categories", get(http::dua_categories))
        .route("/api/duas/categories/{slug}", get(http::category_duas))
        .route("/api/duas/categories/{slug}/{id}", get(http::dua))
        .route("/api/azkar", get(http::azkar))
        // Email
        .route("/api/email/welcome", post(http::send_welcome))
        // Library
        .route("/api/library", get(library::status))
        .route(
            "/api/library/session",
            post(library::sign_in).delete(library::sign_out),
        )
        .route("/api/library/sync", post(library::resync))
        .route("/api/library/favorites", get(library::list_favorites))
        .route("/api/library/favorites/toggle", post(library::toggle_favorite))
        .route(
            "/api/library/favorites/{kind}/{id}",
            get(library::is_favorite).delete(library::remove_favorite),
        )
        .route(
            "/api/library/bookmarks",
            get(library::list_bookmarks).post(library::add_bookmark),
        )
        .route(
            "/api/library/bookmarks/{surah}/{ayah}",
            get(library::get_bookmark).delete(library::remove_bookmark),
        )
        .route(
            "/api/library/bookmarks/{surah}/{ayah}/note",
            put(library::update_note),
        )
        .route(
            "/api/library/bookmarks/{surah}/{ayah}/image",
            get(library::read_image)
                .put(library::attach_image)
                .delete(library::remove_image),
        )
        .layer(DefaultBodyLimit::max(MAX_ATTACHMENT_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl-C
pub async fn serve(addr: &str, state: Arc<AppState>) -> std::io::Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Noor server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
