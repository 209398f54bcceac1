//! Library endpoints
//!
//! Favorites, bookmarks, notes, images and the sync session, each a thin
//! call into `LibraryProvider`.

use crate::app::AppState;
use crate::database::{Bookmark, BookmarkKey, Favorite, FavoriteItem, FavoriteKind, NewBookmark};
use crate::error::{AppError, Result};
use crate::remote::Session;
use crate::services::{SyncOutcome, SyncReport};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ===== Session =====

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInRequest {
    pub user_id: String,
    pub jwt: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Completed,
    AlreadyRunning,
    AlreadySignedIn,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SyncReport>,
}

impl From<SyncOutcome> for SyncResponse {
    fn from(outcome: SyncOutcome) -> Self {
        match outcome {
            SyncOutcome::Completed(report) => Self {
                status: SyncStatus::Completed,
                report: Some(report),
            },
            SyncOutcome::AlreadyRunning => Self {
                status: SyncStatus::AlreadyRunning,
                report: None,
            },
            SyncOutcome::AlreadySignedIn => Self {
                status: SyncStatus::AlreadySignedIn,
                report: None,
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryStatus {
    pub signed_in: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub local_degraded: bool,
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<LibraryStatus> {
    let user_id = state.library.session().await.map(|s| s.user_id);
    Json(LibraryStatus {
        signed_in: user_id.is_some(),
        user_id,
        local_degraded: state.library.is_local_degraded(),
    })
}

/// Sign in with a JWT from the auth backend; syncs on a new user
pub async fn sign_in(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SignInRequest>,
) -> Result<Json<SyncResponse>> {
    if request.user_id.trim().is_empty() || request.jwt.trim().is_empty() {
        return Err(AppError::Validation("userId and jwt are required".to_string()));
    }
    let outcome = state
        .library
        .sign_in(Session::new(request.user_id, request.jwt))
        .await?;
    Ok(Json(outcome.into()))
}

pub async fn sign_out(State(state): State<Arc<AppState>>) -> StatusCode {
    state.library.sign_out().await;
    StatusCode::NO_CONTENT
}

pub async fn resync(State(state): State<Arc<AppState>>) -> Result<Json<SyncResponse>> {
    Ok(Json(state.library.resync().await?.into()))
}

// ===== Favorites =====

#[derive(Debug, Default, Deserialize)]
pub struct FavoritesQuery {
    #[serde(rename = "type")]
    pub kind: Option<FavoriteKind>,
}

pub async fn list_favorites(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FavoritesQuery>,
) -> Result<Json<Vec<Favorite>>> {
    Ok(Json(state.library.list_favorites(query.kind).await?))
}

#[derive(Debug, Serialize)]
pub struct FavoriteState {
    pub favorite: bool,
}

pub async fn is_favorite(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(FavoriteKind, String)>,
) -> Result<Json<FavoriteState>> {
    let favorite = state.library.is_favorite(kind, &id).await?;
    Ok(Json(FavoriteState { favorite }))
}

pub async fn toggle_favorite(
    State(state): State<Arc<AppState>>,
    Json(item): Json<FavoriteItem>,
) -> Result<Json<FavoriteState>> {
    let favorite = state.library.toggle_favorite(item).await?;
    Ok(Json(FavoriteState { favorite }))
}

pub async fn remove_favorite(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(FavoriteKind, String)>,
) -> Result<StatusCode> {
    if state.library.remove_favorite(kind, &id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("favorite {}:{}", kind, id)))
    }
}

// ===== Bookmarks =====

pub async fn list_bookmarks(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Bookmark>>> {
    Ok(Json(state.library.list_bookmarks().await?))
}

pub async fn add_bookmark(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewBookmark>,
) -> Result<(StatusCode, Json<Bookmark>)> {
    let bookmark = state.library.add_bookmark(new).await?;
    Ok((StatusCode::CREATED, Json(bookmark)))
}

pub async fn get_bookmark(
    State(state): State<Arc<AppState>>,
    Path((surah, ayah)): Path<(u16, u16)>,
) -> Result<Json<Bookmark>> {
    let key = BookmarkKey::new(surah, ayah)?;
    state
        .library
        .get_bookmark(key)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("bookmark {}", key)))
}

pub async fn remove_bookmark(
    State(state): State<Arc<AppState>>,
    Path((surah, ayah)): Path<(u16, u16)>,
) -> Result<StatusCode> {
    let key = BookmarkKey::new(surah, ayah)?;
    if state.library.remove_bookmark(key).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("bookmark {}", key)))
    }
}

#[derive(Debug, Deserialize)]
pub struct NoteRequest {
    #[serde(default)]
    pub note: Option<String>,
}

pub async fn update_note(
    State(state): State<Arc<AppState>>,
    Path((surah, ayah)): Path<(u16, u16)>,
    Json(request): Json<NoteRequest>,
) -> Result<Json<Bookmark>> {
    let key = BookmarkKey::new(surah, ayah)?;
    Ok(Json(state.library.update_note(key, request.note).await?))
}

// ===== Images =====

pub async fn read_image(
    State(state): State<Arc<AppState>>,
    Path((surah, ayah)): Path<(u16, u16)>,
) -> Result<Response> {
    let key = BookmarkKey::new(surah, ayah)?;
    match state.library.read_image(key).await? {
        Some(bytes) => Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response()),
        None => Err(AppError::NotFound(format!("image for bookmark {}", key))),
    }
}

pub async fn attach_image(
    State(state): State<Arc<AppState>>,
    Path((surah, ayah)): Path<(u16, u16)>,
    body: Bytes,
) -> Result<Json<Bookmark>> {
    let key = BookmarkKey::new(surah, ayah)?;
    Ok(Json(state.library.attach_image(key, &body).await?))
}

pub async fn remove_image(
    State(state): State<Arc<AppState>>,
    Path((surah, ayah)): Path<(u16, u16)>,
) -> Result<Json<Bookmark>> {
    let key = BookmarkKey::new(surah, ayah)?;
    Ok(Json(state.library.remove_image(key).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_response_shape() {
        let report = SyncReport {
            pushed: 2,
            ..SyncReport::default()
        };
        let completed = serde_json::to_value(SyncResponse::from(SyncOutcome::Completed(report))).unwrap();
        assert_eq!(completed["status"], "completed");
        assert_eq!(completed["report"]["pushed"], 2);

        let skipped = serde_json::to_value(SyncResponse::from(SyncOutcome::AlreadySignedIn)).unwrap();
        assert_eq!(skipped["status"], "already_signed_in");
        assert!(skipped.get("report").is_none());
    }
}
