//! Local store for favorites and bookmarks
//!
//! Device-scoped persistence that works without a session. Backed by a
//! SQLite file; when the file cannot be opened, or a write fails because
//! the storage went away, the store switches to an in-memory database
//! for the rest of the session and keeps serving requests.

use super::models::*;
use super::{create_memory_pool, create_pool};
use crate::error::{AppError, Result};
use sqlx::SqlitePool;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Local favorites/bookmarks store
#[derive(Clone)]
pub struct LocalStore {
    pool: Arc<RwLock<SqlitePool>>,
    degraded: Arc<AtomicBool>,
}

impl LocalStore {
    /// Open the store at `db_path`, falling back to memory on failure
    pub async fn open(db_path: &Path) -> Result<Self> {
        match create_pool(db_path).await {
            Ok(pool) => Ok(Self::from_pool(pool)),
            Err(e) => {
                tracing::warn!(
                    "Library store unavailable at {:?} ({}), keeping favorites in memory for this session",
                    db_path,
                    e
                );
                let pool = create_memory_pool()
                    .await
                    .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;
                let store = Self::from_pool(pool);
                store.degraded.store(true, Ordering::SeqCst);
                Ok(store)
            }
        }
    }

    /// Store that never touches the disk
    pub async fn in_memory() -> Result<Self> {
        Ok(Self::from_pool(create_memory_pool().await?))
    }

    /// Wrap an already initialized pool
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(RwLock::new(pool)),
            degraded: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the store fell back to memory
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    async fn current(&self) -> SqlitePool {
        self.pool.read().await.clone()
    }

    /// Run `op`, switching to memory and retrying once if storage failed
    async fn run<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(SqlitePool) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match op(self.current().await).await {
            Err(AppError::Database(e)) if is_storage_failure(&e) && !self.is_degraded() => {
                self.degrade(&e).await?;
                op(self.current().await).await
            }
            other => other,
        }
    }

    async fn degrade(&self, cause: &sqlx::Error) -> Result<()> {
        let mut guard = self.pool.write().await;
        if self.is_degraded() {
            return Ok(());
        }

        tracing::warn!(
            "Library storage failed ({}), switching to in-memory store for this session",
            cause
        );

        let favorites = queries::list_favorites(&guard).await.unwrap_or_else(|e| {
            tracing::warn!("Could not carry favorites over to memory: {}", e);
            Vec::new()
        });
        let bookmarks = queries::list_bookmarks(&guard).await.unwrap_or_else(|e| {
            tracing::warn!("Could not carry bookmarks over to memory: {}", e);
            Vec::new()
        });

        let memory = create_memory_pool()
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;
        for favorite in &favorites {
            queries::upsert_favorite(&memory, favorite).await?;
        }
        for bookmark in &bookmarks {
            queries::upsert_bookmark(&memory, bookmark).await?;
        }

        *guard = memory;
        self.degraded.store(true, Ordering::SeqCst);

        tracing::info!(
            "In-memory library holds {} favorites and {} bookmarks",
            favorites.len(),
            bookmarks.len()
        );
        Ok(())
    }

    // ===== Favorites =====

    /// All favorites in insertion order
    pub async fn list_favorites(&self) -> Result<Vec<Favorite>> {
        self.run(|pool| async move { queries::list_favorites(&pool).await })
            .await
    }

    pub async fn get_favorite(&self, key: &FavoriteKey) -> Result<Option<Favorite>> {
        self.run(move |pool| async move { queries::get_favorite(&pool, key).await })
            .await
    }

    pub async fn contains_favorite(&self, key: &FavoriteKey) -> Result<bool> {
        Ok(self.get_favorite(key).await?.is_some())
    }

    /// Insert or replace by identity; an existing row keeps its position
    pub async fn add_favorite(&self, favorite: &Favorite) -> Result<()> {
        self.run(move |pool| async move { queries::upsert_favorite(&pool, favorite).await })
            .await?;
        tracing::debug!("Stored favorite {}", favorite.key());
        Ok(())
    }

    /// Remove a favorite, returning what was stored
    pub async fn remove_favorite(&self, key: &FavoriteKey) -> Result<Option<Favorite>> {
        let removed = self
            .run(move |pool| async move {
                let existing = queries::get_favorite(&pool, key).await?;
                sqlx::query("DELETE FROM favorites WHERE identity = ?")
                    .bind(key.to_string())
                    .execute(&pool)
                    .await?;
                Ok::<_, AppError>(existing)
            })
            .await?;

        if removed.is_some() {
            tracing::debug!("Removed favorite {}", key);
        }
        Ok(removed)
    }

    /// Record the backend document id of a favorite
    pub async fn attach_favorite_document(&self, key: &FavoriteKey, document_id: &str) -> Result<()> {
        let rows = self
            .run(move |pool| async move {
                Ok::<_, AppError>(sqlx::query("UPDATE favorites SET document_id = ? WHERE identity = ?")
                    .bind(document_id)
                    .bind(key.to_string())
                    .execute(&pool)
                    .await?
                    .rows_affected())
            })
            .await?;

        if rows == 0 {
            return Err(AppError::NotFound(key.to_string()));
        }
        Ok(())
    }

    // ===== Bookmarks =====

    /// All bookmarks in insertion order
    pub async fn list_bookmarks(&self) -> Result<Vec<Bookmark>> {
        self.run(|pool| async move { queries::list_bookmarks(&pool).await })
            .await
    }

    pub async fn get_bookmark(&self, key: BookmarkKey) -> Result<Option<Bookmark>> {
        self.run(move |pool| async move { queries::get_bookmark(&pool, key).await })
            .await
    }

    /// Insert or replace by key; an existing row keeps its position
    pub async fn add_bookmark(&self, bookmark: &Bookmark) -> Result<()> {
        self.run(move |pool| async move { queries::upsert_bookmark(&pool, bookmark).await })
            .await?;
        tracing::debug!("Stored bookmark {}", bookmark.key());
        Ok(())
    }

    /// Remove a bookmark, returning what was stored
    pub async fn remove_bookmark(&self, key: BookmarkKey) -> Result<Option<Bookmark>> {
        let removed = self
            .run(move |pool| async move {
                let existing = queries::get_bookmark(&pool, key).await?;
                sqlx::query("DELETE FROM bookmarks WHERE key = ?")
                    .bind(key.to_string())
                    .execute(&pool)
                    .await?;
                Ok::<_, AppError>(existing)
            })
            .await?;

        if removed.is_some() {
            tracing::debug!("Removed bookmark {}", key);
        }
        Ok(removed)
    }

    /// Replace the note on a bookmark
    pub async fn update_note(&self, key: BookmarkKey, note: Option<&str>) -> Result<Bookmark> {
        self.update_bookmark_column(key, "note", note).await
    }

    /// Replace the attached image reference on a bookmark
    pub async fn set_image(&self, key: BookmarkKey, image_ref: Option<&str>) -> Result<Bookmark> {
        self.update_bookmark_column(key, "image_ref", image_ref).await
    }

    /// Record the backend document id of a bookmark
    pub async fn attach_bookmark_document(&self, key: BookmarkKey, document_id: &str) -> Result<Bookmark> {
        self.update_bookmark_column(key, "document_id", Some(document_id))
            .await
    }

    async fn update_bookmark_column(
        &self,
        key: BookmarkKey,
        column: &'static str,
        value: Option<&str>,
    ) -> Result<Bookmark> {
        let query = format!("UPDATE bookmarks SET {} = ? WHERE key = ?", column);
        let query = query.as_str();

        self.run(move |pool| async move {
            let rows = sqlx::query(query)
                .bind(value)
                .bind(key.to_string())
                .execute(&pool)
                .await?
                .rows_affected();

            if rows == 0 {
                return Err(AppError::NotFound(key.to_string()));
            }

            queries::get_bookmark(&pool, key)
                .await?
                .ok_or_else(|| AppError::NotFound(key.to_string()))
        })
        .await
    }

    /// Remove every favorite and bookmark on this device
    pub async fn clear(&self) -> Result<()> {
        self.run(|pool| async move {
            let mut tx = pool.begin().await?;
            sqlx::query("DELETE FROM favorites").execute(&mut *tx).await?;
            sqlx::query("DELETE FROM bookmarks").execute(&mut *tx).await?;
            tx.commit().await?;
            Ok::<_, AppError>(())
        })
        .await?;

        tracing::info!("Cleared local library");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn close_for_test(&self) {
        self.current().await.close().await;
    }
}

/// Errors after which the backing file can no longer be trusted
fn is_storage_failure(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            // Primary result codes: READONLY, IOERR, CORRUPT, FULL, CANTOPEN, NOTADB
            .map(|code| matches!(code & 0xff, 8 | 10 | 11 | 13 | 14 | 26))
            .unwrap_or(false),
        _ => false,
    }
}

mod queries {
    use super::*;

    const FAVORITE_COLUMNS: &str = "identity, payload, created_at, document_id, position";
    const BOOKMARK_COLUMNS: &str =
        "key, surah, ayah, surah_name, ayah_text, note, image_ref, created_at, document_id, position";

    pub async fn list_favorites(pool: &SqlitePool) -> Result<Vec<Favorite>> {
        let rows = sqlx::query_as::<_, FavoriteRow>(&format!(
            "SELECT {} FROM favorites ORDER BY position ASC",
            FAVORITE_COLUMNS
        ))
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(Favorite::try_from).collect()
    }

    pub async fn get_favorite(pool: &SqlitePool, key: &FavoriteKey) -> Result<Option<Favorite>> {
        sqlx::query_as::<_, FavoriteRow>(&format!(
            "SELECT {} FROM favorites WHERE identity = ?",
            FAVORITE_COLUMNS
        ))
        .bind(key.to_string())
        .fetch_optional(pool)
        .await?
        .map(Favorite::try_from)
        .transpose()
    }

    pub async fn upsert_favorite(pool: &SqlitePool, favorite: &Favorite) -> Result<()> {
        let key = favorite.key();
        let payload = serde_json::to_string(&favorite.item)?;

        sqlx::query(
            r#"
            INSERT INTO favorites (identity, kind, item_id, payload, created_at, document_id, position)
            VALUES (?, ?, ?, ?, ?, ?, (SELECT COALESCE(MAX(position), 0) + 1 FROM favorites))
            ON CONFLICT(identity) DO UPDATE SET
                payload = excluded.payload,
                created_at = excluded.created_at,
                document_id = COALESCE(excluded.document_id, favorites.document_id)
            "#,
        )
        .bind(key.to_string())
        .bind(key.kind.as_str())
        .bind(&key.id)
        .bind(payload)
        .bind(favorite.created_at)
        .bind(&favorite.document_id)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn list_bookmarks(pool: &SqlitePool) -> Result<Vec<Bookmark>> {
        let rows = sqlx::query_as::<_, BookmarkRow>(&format!(
            "SELECT {} FROM bookmarks ORDER BY position ASC",
            BOOKMARK_COLUMNS
        ))
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(Bookmark::try_from).collect()
    }

    pub async fn get_bookmark(pool: &SqlitePool, key: BookmarkKey) -> Result<Option<Bookmark>> {
        sqlx::query_as::<_, BookmarkRow>(&format!(
            "SELECT {} FROM bookmarks WHERE key = ?",
            BOOKMARK_COLUMNS
        ))
        .bind(key.to_string())
        .fetch_optional(pool)
        .await?
        .map(Bookmark::try_from)
        .transpose()
    }

    pub async fn upsert_bookmark(pool: &SqlitePool, bookmark: &Bookmark) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bookmarks (key, surah, ayah, surah_name, ayah_text, note, image_ref, created_at, document_id, position)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, (SELECT COALESCE(MAX(position), 0) + 1 FROM bookmarks))
            ON CONFLICT(key) DO UPDATE SET
                surah_name = excluded.surah_name,
                ayah_text = excluded.ayah_text,
                note = excluded.note,
                image_ref = excluded.image_ref,
                created_at = excluded.created_at,
                document_id = COALESCE(excluded.document_id, bookmarks.document_id)
            "#,
        )
        .bind(bookmark.key().to_string())
        .bind(i64::from(bookmark.surah))
        .bind(i64::from(bookmark.ayah))
        .bind(&bookmark.surah_name)
        .bind(&bookmark.ayah_text)
        .bind(&bookmark.note)
        .bind(&bookmark.image_ref)
        .bind(bookmark.created_at)
        .bind(&bookmark.document_id)
        .execute(pool)
        .await?;

        Ok(())
    }
}
