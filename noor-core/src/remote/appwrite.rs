//! Appwrite implementation of the remote store
//!
//! Talks to the Appwrite Databases REST API with the user's JWT. Each
//! document carries the owning `userId` and the application-level
//! `identity` used for reconciliation; permissions restrict it to that user.

use super::retry::{Idempotency, RetryPolicy};
use super::{FavoriteListing, RemoteStore, Session};
use crate::config::{AppwriteConfig, REMOTE_PAGE_SIZE};
use crate::database::{normalize_note, Bookmark, Favorite, FavoriteItem, FavoriteKind};
use crate::error::{AppError, Result};
use crate::http_client::{build_client, check};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Remote store backed by Appwrite
pub struct AppwriteStore {
    client: Client,
    config: AppwriteConfig,
    retry: RetryPolicy,
}

/// A document as returned by Appwrite: system `$id` plus attributes
#[derive(Debug, Deserialize)]
struct Document<F> {
    #[serde(rename = "$id")]
    id: String,
    #[serde(flatten)]
    fields: F,
}

#[derive(Debug, Deserialize)]
struct DocumentList<F> {
    total: u64,
    documents: Vec<Document<F>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FavoriteFields {
    user_id: String,
    identity: String,
    #[serde(rename = "type")]
    kind: FavoriteKind,
    item_id: String,
    /// JSON-encoded `FavoriteItem`
    payload: String,
    created_at: DateTime<Utc>,
}

impl FavoriteFields {
    fn new(user_id: &str, favorite: &Favorite) -> Result<Self> {
        let key = favorite.key();
        Ok(Self {
            user_id: user_id.to_string(),
            identity: key.to_string(),
            kind: key.kind,
            item_id: key.id,
            payload: serde_json::to_string(&favorite.item)?,
            created_at: favorite.created_at,
        })
    }

    fn into_favorite(self, document_id: String) -> Result<Favorite> {
        let item: FavoriteItem = serde_json::from_str(&self.payload)?;
        if item.key().to_string() != self.identity {
            return Err(AppError::Generic(format!(
                "document {} payload does not match identity {}",
                document_id, self.identity
            )));
        }
        Ok(Favorite {
            item,
            created_at: self.created_at,
            document_id: Some(document_id),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookmarkFields {
    user_id: String,
    identity: String,
    surah: u16,
    ayah: u16,
    surah_name: String,
    ayah_text: String,
    #[serde(default)]
    note: Option<String>,
    #[serde(default)]
    image_ref: Option<String>,
    created_at: DateTime<Utc>,
}

impl BookmarkFields {
    fn new(user_id: &str, bookmark: &Bookmark) -> Self {
        Self {
            user_id: user_id.to_string(),
            identity: bookmark.key().to_string(),
            surah: bookmark.surah,
            ayah: bookmark.ayah,
            surah_name: bookmark.surah_name.clone(),
            ayah_text: bookmark.ayah_text.clone(),
            note: bookmark.note.clone(),
            image_ref: bookmark.image_ref.clone(),
            created_at: bookmark.created_at,
        }
    }

    /// Blank remote notes count as no note
    fn into_bookmark(self, document_id: String) -> Bookmark {
        Bookmark {
            surah: self.surah,
            ayah: self.ayah,
            surah_name: self.surah_name,
            ayah_text: self.ayah_text,
            note: normalize_note(self.note),
            image_ref: self.image_ref,
            created_at: self.created_at,
            document_id: Some(document_id),
        }
    }
}

impl AppwriteStore {
    pub fn new(config: AppwriteConfig, timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            config,
            retry,
        })
    }

    fn documents_url(&self, collection_id: &str) -> String {
        format!(
            "{}/databases/{}/collections/{}/documents",
            self.config.endpoint.trim_end_matches('/'),
            self.config.database_id,
            collection_id
        )
    }

    fn request(&self, method: Method, url: &str, session: &Session) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("X-Appwrite-Project", &self.config.project_id)
            .header("X-Appwrite-JWT", &session.jwt)
    }

    async fn list_documents<F: DeserializeOwned>(
        &self,
        session: &Session,
        collection_id: &str,
    ) -> Result<Vec<Document<F>>> {
        let url = self.documents_url(collection_id);
        let mut documents = Vec::new();

        loop {
            let queries = list_queries(&session.user_id, documents.len());
            let url = url.as_str();
            let queries = &queries;

            let page: DocumentList<F> = self
                .retry
                .run("list documents", Idempotency::Idempotent, move || async move {
                    let response = self
                        .request(Method::GET, url, session)
                        .query(&queries.iter().map(|q| ("queries[]", q)).collect::<Vec<_>>())
                        .send()
                        .await?;
                    Ok::<_, AppError>(check(response).await?.json().await?)
                })
                .await?;

            let fetched = page.documents.len();
            documents.extend(page.documents);

            if fetched < REMOTE_PAGE_SIZE || documents.len() as u64 >= page.total {
                break;
            }
        }

        tracing::debug!(
            "Listed {} documents from {} for {}",
            documents.len(),
            collection_id,
            session.user_id
        );
        Ok(documents)
    }

    async fn create_document<F: DeserializeOwned>(
        &self,
        session: &Session,
        collection_id: &str,
        data: Value,
    ) -> Result<Document<F>> {
        let url = self.documents_url(collection_id);
        let body = json!({
            "documentId": "unique()",
            "data": data,
            "permissions": owner_permissions(&session.user_id),
        });
        let (url, body) = (url.as_str(), &body);

        self.retry
            .run("create document", Idempotency::NonIdempotent, move || async move {
                let response = self
                    .request(Method::POST, url, session)
                    .json(body)
                    .send()
                    .await?;
                Ok::<_, AppError>(check(response).await?.json().await?)
            })
            .await
    }

    async fn update_document<F: DeserializeOwned>(
        &self,
        session: &Session,
        collection_id: &str,
        document_id: &str,
        data: Value,
    ) -> Result<Document<F>> {
        let url = format!("{}/{}", self.documents_url(collection_id), document_id);
        let body = json!({ "data": data });
        let (url, body) = (url.as_str(), &body);

        self.retry
            .run("update document", Idempotency::Idempotent, move || async move {
                let response = self
                    .request(Method::PATCH, url, session)
                    .json(body)
                    .send()
                    .await?;
                Ok::<_, AppError>(check(response).await?.json().await?)
            })
            .await
    }

    async fn delete_document(&self, session: &Session, collection_id: &str, document_id: &str) -> Result<()> {
        let url = format!("{}/{}", self.documents_url(collection_id), document_id);
        let url = url.as_str();

        let result = self
            .retry
            .run("delete document", Idempotency::Idempotent, move || async move {
                let response = self.request(Method::DELETE, url, session).send().await?;
                check(response).await?;
                Ok::<_, AppError>(())
            })
            .await;

        match result {
            Err(AppError::Remote { status: 404, .. }) => {
                tracing::debug!("Document {} already gone from {}", document_id, collection_id);
                Ok(())
            }
            other => other,
        }
    }
}

/// Queries selecting one page of the user's documents
fn list_queries(user_id: &str, offset: usize) -> Vec<String> {
    vec![
        json!({ "method": "equal", "attribute": "userId", "values": [user_id] }).to_string(),
        json!({ "method": "limit", "values": [REMOTE_PAGE_SIZE] }).to_string(),
        json!({ "method": "offset", "values": [offset] }).to_string(),
    ]
}

fn owner_permissions(user_id: &str) -> Vec<String> {
    ["read", "update", "delete"]
        .iter()
        .map(|action| format!("{}(\"user:{}\")", action, user_id))
        .collect()
}

#[async_trait]
impl RemoteStore for AppwriteStore {
    async fn favorite_listing(&self, session: &Session) -> Result<FavoriteListing> {
        let documents = self
            .list_documents::<FavoriteFields>(session, &self.config.favorites_collection_id)
            .await?;

        let mut listing = FavoriteListing::default();
        for doc in documents {
            let identity = doc.fields.identity.clone();
            match doc.fields.into_favorite(doc.id) {
                Ok(favorite) => listing.favorites.push(favorite),
                Err(e) => {
                    tracing::warn!("Skipping malformed favorite document {}: {}", identity, e);
                    listing.unreadable.push(identity);
                }
            }
        }
        Ok(listing)
    }

    async fn create_favorite(&self, session: &Session, favorite: &Favorite) -> Result<Favorite> {
        let data = serde_json::to_value(FavoriteFields::new(&session.user_id, favorite)?)?;
        let doc = self
            .create_document::<FavoriteFields>(session, &self.config.favorites_collection_id, data)
            .await?;

        tracing::debug!("Created remote favorite {} as {}", favorite.key(), doc.id);
        doc.fields.into_favorite(doc.id)
    }

    async fn delete_favorite(&self, session: &Session, document_id: &str) -> Result<()> {
        self.delete_document(session, &self.config.favorites_collection_id, document_id)
            .await
    }

    async fn list_bookmarks(&self, session: &Session) -> Result<Vec<Bookmark>> {
        let documents = self
            .list_documents::<BookmarkFields>(session, &self.config.bookmarks_collection_id)
            .await?;

        Ok(documents
            .into_iter()
            .map(|doc| doc.fields.into_bookmark(doc.id))
            .collect())
    }

    async fn create_bookmark(&self, session: &Session, bookmark: &Bookmark) -> Result<Bookmark> {
        let data = serde_json::to_value(BookmarkFields::new(&session.user_id, bookmark))?;
        let doc = self
            .create_document::<BookmarkFields>(session, &self.config.bookmarks_collection_id, data)
            .await?;

        tracing::debug!("Created remote bookmark {} as {}", bookmark.key(), doc.id);
        Ok(doc.fields.into_bookmark(doc.id))
    }

    async fn update_bookmark(
        &self,
        session: &Session,
        document_id: &str,
        bookmark: &Bookmark,
    ) -> Result<Bookmark> {
        let data = json!({
            "note": bookmark.note,
            "imageRef": bookmark.image_ref,
        });
        let doc = self
            .update_document::<BookmarkFields>(
                session,
                &self.config.bookmarks_collection_id,
                document_id,
                data,
            )
            .await?;

        Ok(doc.fields.into_bookmark(doc.id))
    }

    async fn delete_bookmark(&self, session: &Session, document_id: &str) -> Result<()> {
        self.delete_document(session, &self.config.bookmarks_collection_id, document_id)
            .await
    }
}
