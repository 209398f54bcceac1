//! HTTP endpoint handlers

use crate::app::AppState;
use crate::error::{AppError, Result};
use crate::services::email::is_valid_recipient;
use crate::services::{Azkar, Dua, DuaCategory, DuaSummary, EmailResult, Language};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
pub struct RevalidateQuery {
    pub secret: Option<String>,
    pub tag: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RevalidateResponse {
    pub revalidated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Milliseconds since the Unix epoch
    pub now: i64,
}

/// Drop cached content by tag or by path. A tag takes precedence when
/// both are given.
pub async fn revalidate(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RevalidateQuery>,
) -> std::result::Result<Json<RevalidateResponse>, (StatusCode, Json<serde_json::Value>)> {
    let authorized = match (
        state.config.revalidate_secret.as_deref(),
        query.secret.as_deref(),
    ) {
        (Some(expected), Some(given)) => secrets_match(expected, given),
        _ => false,
    };
    if !authorized {
        tracing::warn!("Revalidation rejected: invalid secret");
        return Err(message(StatusCode::UNAUTHORIZED, "Invalid secret"));
    }

    let now = chrono::Utc::now().timestamp_millis();
    let tag = query.tag.filter(|t| !t.trim().is_empty());
    let path = query.path.filter(|p| !p.trim().is_empty());

    if let Some(tag) = tag {
        state.content.invalidate_tag(&tag).await;
        return Ok(Json(RevalidateResponse {
            revalidated: true,
            tag: Some(tag),
            path: None,
            now,
        }));
    }
    if let Some(path) = path {
        state.content.invalidate_path(&path).await;
        return Ok(Json(RevalidateResponse {
            revalidated: true,
            tag: None,
            path: Some(path),
            now,
        }));
    }

    Err(message(StatusCode::BAD_REQUEST, "Missing tag or path"))
}

/// Compare digests so the time taken does not depend on the secret
fn secrets_match(expected: &str, given: &str) -> bool {
    Sha256::digest(expected.as_bytes()) == Sha256::digest(given.as_bytes())
}

fn message(status: StatusCode, text: &str) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(serde_json::json!({ "message": text })))
}

#[derive(Debug, Default, Deserialize)]
pub struct LangQuery {
    pub lang: Option<String>,
}

impl LangQuery {
    fn language(&self) -> Result<Language> {
        match self.lang.as_deref() {
            Some(lang) => lang.parse(),
            None => Ok(Language::default()),
        }
    }
}

pub async fn dua_categories(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LangQuery>,
) -> Result<Json<Vec<DuaCategory>>> {
    let categories = state.content.categories(query.language()?).await?;
    Ok(Json(categories))
}

pub async fn category_duas(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Query(query): Query<LangQuery>,
) -> Result<Json<Vec<DuaSummary>>> {
    let duas = state
        .content
        .category_duas(&slug, query.language()?)
        .await?;
    Ok(Json(duas))
}

pub async fn dua(
    State(state): State<Arc<AppState>>,
    Path((slug, id)): Path<(String, u32)>,
    Query(query): Query<LangQuery>,
) -> Result<Json<Dua>> {
    let dua = state.content.dua(&slug, id, query.language()?).await?;
    Ok(Json(dua))
}

pub async fn azkar(State(state): State<Arc<AppState>>) -> Result<Json<Azkar>> {
    Ok(Json(state.content.azkar().await?))
}

#[derive(Debug, Deserialize)]
pub struct WelcomeRequest {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

pub async fn send_welcome(
    State(state): State<Arc<AppState>>,
    Json(request): Json<WelcomeRequest>,
) -> std::result::Result<(StatusCode, Json<EmailResult>), AppError> {
    if !state.email.is_configured() {
        return Err(AppError::NotConfigured("email service".to_string()));
    }
    if !is_valid_recipient(request.email.trim()) {
        return Err(AppError::Validation(format!(
            "invalid email address: {}",
            request.email
        )));
    }

    let result = state
        .email
        .send_welcome_email(&request.email, request.name.as_deref())
        .await;
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };

    Ok((status, Json(result)))
}
