//! In-process remote store
//!
//! Behaves like the hosted backend (assigns document ids, does not enforce
//! identity uniqueness) without the network. Used for offline development
//! and as the remote in sync tests, where failures can be injected.

use super::{FavoriteListing, RemoteStore, Session};
use crate::database::{Bookmark, Favorite};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    favorites: HashMap<String, Vec<Favorite>>,
    bookmarks: HashMap<String, Vec<Bookmark>>,
    unreadable: HashMap<String, Vec<String>>,
    revoked: HashSet<String>,
    fail_next: u32,
    creates: u32,
}

/// Remote store kept in memory, keyed by user id
#[derive(Clone, Default)]
pub struct MemoryRemoteStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reject every later call made with this JWT
    pub fn revoke(&self, jwt: &str) {
        self.lock().revoked.insert(jwt.to_string());
    }

    /// Fail the next `count` calls with a transient error
    pub fn fail_next(&self, count: u32) {
        self.lock().fail_next = count;
    }

    /// Number of documents created so far
    pub fn create_count(&self) -> u32 {
        self.lock().creates
    }

    /// Put a favorite straight into a user's collection
    pub fn seed_favorite(&self, user_id: &str, mut favorite: Favorite) -> Favorite {
        favorite.document_id = Some(new_document_id());
        self.lock()
            .favorites
            .entry(user_id.to_string())
            .or_default()
            .push(favorite.clone());
        favorite
    }

    /// Record a favorite document that exists but cannot be decoded
    pub fn seed_unreadable_favorite(&self, user_id: &str, identity: &str) {
        self.lock()
            .unreadable
            .entry(user_id.to_string())
            .or_default()
            .push(identity.to_string());
    }

    /// Put a bookmark straight into a user's collection
    pub fn seed_bookmark(&self, user_id: &str, mut bookmark: Bookmark) -> Bookmark {
        bookmark.document_id = Some(new_document_id());
        self.lock()
            .bookmarks
            .entry(user_id.to_string())
            .or_default()
            .push(bookmark.clone());
        bookmark
    }

    /// Lock state after checking the session and injected failures
    fn enter(&self, session: &Session) -> Result<MutexGuard<'_, Inner>> {
        let mut inner = self.lock();
        if session.jwt.is_empty() || inner.revoked.contains(&session.jwt) {
            return Err(AppError::Unauthenticated);
        }
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(AppError::Transient("injected failure".to_string()));
        }
        Ok(inner)
    }
}

fn new_document_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn favorite_listing(&self, session: &Session) -> Result<FavoriteListing> {
        let inner = self.enter(session)?;
        Ok(FavoriteListing {
            favorites: inner
                .favorites
                .get(&session.user_id)
                .cloned()
                .unwrap_or_default(),
            unreadable: inner
                .unreadable
                .get(&session.user_id)
                .cloned()
                .unwrap_or_default(),
        })
    }

    async fn create_favorite(&self, session: &Session, favorite: &Favorite) -> Result<Favorite> {
        let mut inner = self.enter(session)?;
        let mut created = favorite.clone();
        created.document_id = Some(new_document_id());
        inner.creates += 1;
        inner
            .favorites
            .entry(session.user_id.clone())
            .or_default()
            .push(created.clone());
        Ok(created)
    }

    async fn delete_favorite(&self, session: &Session, document_id: &str) -> Result<()> {
        let mut inner = self.enter(session)?;
        if let Some(favorites) = inner.favorites.get_mut(&session.user_id) {
            favorites.retain(|f| f.document_id.as_deref() != Some(document_id));
        }
        Ok(())
    }

    async fn list_bookmarks(&self, session: &Session) -> Result<Vec<Bookmark>> {
        let inner = self.enter(session)?;
        Ok(inner
            .bookmarks
            .get(&session.user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_bookmark(&self, session: &Session, bookmark: &Bookmark) -> Result<Bookmark> {
        let mut inner = self.enter(session)?;
        let mut created = bookmark.clone();
        created.document_id = Some(new_document_id());
        inner.creates += 1;
        inner
            .bookmarks
            .entry(session.user_id.clone())
            .or_default()
            .push(created.clone());
        Ok(created)
    }

    async fn update_bookmark(
        &self,
        session: &Session,
        document_id: &str,
        bookmark: &Bookmark,
    ) -> Result<Bookmark> {
        let mut inner = self.enter(session)?;
        let stored = inner
            .bookmarks
            .get_mut(&session.user_id)
            .and_then(|all| {
                all.iter_mut()
                    .find(|b| b.document_id.as_deref() == Some(document_id))
            })
            .ok_or_else(|| AppError::Remote {
                status: 404,
                message: format!("document {} not found", document_id),
            })?;

        stored.note = bookmark.note.clone();
        stored.image_ref = bookmark.image_ref.clone();
        Ok(stored.clone())
    }

    async fn delete_bookmark(&self, session: &Session, document_id: &str) -> Result<()> {
        let mut inner = self.enter(session)?;
        if let Some(bookmarks) = inner.bookmarks.get_mut(&session.user_id) {
            bookmarks.retain(|b| b.document_id.as_deref() != Some(document_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{FavoriteItem, SheikhFavorite};

    fn sheikh(id: &str) -> Favorite {
        Favorite::new(FavoriteItem::Sheikh(SheikhFavorite {
            id: id.to_string(),
            name: "Mishary Alafasy".to_string(),
            image_url: None,
        }))
    }

    #[tokio::test]
    async fn test_collections_are_scoped_per_user() {
        let remote = MemoryRemoteStore::new();
        let alice = Session::new("alice", "jwt-a");
        let bob = Session::new("bob", "jwt-b");

        remote.create_favorite(&alice, &sheikh("1")).await.unwrap();

        assert_eq!(remote.list_favorites(&alice).await.unwrap().len(), 1);
        assert!(remote.list_favorites(&bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_revoked_session_is_unauthenticated() {
        let remote = MemoryRemoteStore::new();
        let session = Session::new("alice", "jwt-a");
        remote.revoke("jwt-a");

        let result = remote.list_favorites(&session).await;
        assert!(matches!(result, Err(AppError::Unauthenticated)));
    }

    #[tokio::test]
    async fn test_injected_failures_run_out() {
        let remote = MemoryRemoteStore::new();
        let session = Session::new("alice", "jwt-a");
        remote.fail_next(1);

        assert!(remote.list_favorites(&session).await.unwrap_err().is_transient());
        assert!(remote.list_favorites(&session).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_by_document_id() {
        let remote = MemoryRemoteStore::new();
        let session = Session::new("alice", "jwt-a");
        let created = remote.create_favorite(&session, &sheikh("1")).await.unwrap();

        remote
            .delete_favorite(&session, created.document_id.as_deref().unwrap())
            .await
            .unwrap();

        assert!(remote.list_favorites(&session).await.unwrap().is_empty());
        assert_eq!(remote.create_count(), 1);
    }
}
