//! Library provider
//!
//! The single entry point the UI talks to for favorites and bookmarks.
//! Every mutation lands in the local store first and is then written
//! through to the remote store when a session is active. Remote trouble
//! never undoes a local change; it is reported as a `LibraryEvent`.
//!
//! Mutations and reconciliation share one write lock, so a removal made
//! while a sync is running waits for the sync to finish.

use super::sync::{SyncOutcome, SyncReconciler, SyncReport};
use crate::config::MAX_NOTE_LENGTH;
use crate::database::{
    normalize_note, Bookmark, BookmarkKey, Favorite, FavoriteItem, FavoriteKey, FavoriteKind,
    LocalStore, NewBookmark,
};
use crate::error::{AppError, Result};
use crate::remote::{RemoteStore, Session};
use crate::storage::BlobStore;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};

const EVENT_CAPACITY: usize = 32;

/// Notices for the UI
#[derive(Debug, Clone, PartialEq)]
pub enum LibraryEvent {
    /// A remote write needs a signed-in user; the local change was kept
    LoginRequired { action: &'static str },
    /// A remote write failed; the local change was kept
    RemoteFailed { action: &'static str, message: String },
    SyncCompleted(SyncReport),
    SignedOut,
}

#[derive(Clone)]
pub struct LibraryProvider {
    local: LocalStore,
    blobs: BlobStore,
    remote: Option<Arc<dyn RemoteStore>>,
    reconciler: Option<Arc<SyncReconciler>>,
    session: Arc<RwLock<Option<Session>>>,
    writes: Arc<Mutex<()>>,
    events: broadcast::Sender<LibraryEvent>,
}

impl LibraryProvider {
    /// `remote` is `None` when no backend is configured; the library then
    /// stays device-local.
    pub fn new(local: LocalStore, blobs: BlobStore, remote: Option<Arc<dyn RemoteStore>>) -> Self {
        let writes = Arc::new(Mutex::new(()));
        let reconciler = remote.as_ref().map(|remote| {
            Arc::new(SyncReconciler::with_write_lock(
                local.clone(),
                Arc::clone(remote),
                Arc::clone(&writes),
            ))
        });
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            local,
            blobs,
            remote,
            reconciler,
            session: Arc::new(RwLock::new(None)),
            writes,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LibraryEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: LibraryEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub async fn session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    pub fn is_local_degraded(&self) -> bool {
        self.local.is_degraded()
    }

    // ===== Session =====

    /// Record a signed-in session and reconcile on a sign-in transition.
    ///
    /// A refreshed token for the user already signed in only replaces the
    /// stored session.
    pub async fn sign_in(&self, session: Session) -> Result<SyncOutcome> {
        let reconciler = self
            .reconciler
            .clone()
            .ok_or_else(|| AppError::NotConfigured("remote store".to_string()))?;

        {
            let mut current = self.session.write().await;
            let same_user = current
                .as_ref()
                .is_some_and(|s| s.user_id == session.user_id);
            *current = Some(session.clone());
            if same_user {
                tracing::debug!("Session refreshed for user {}", session.user_id);
                return Ok(SyncOutcome::AlreadySignedIn);
            }
        }

        tracing::info!("User {} signed in", session.user_id);
        self.run_sync(&reconciler, &session).await
    }

    /// Reconcile again with the current session
    pub async fn resync(&self) -> Result<SyncOutcome> {
        let reconciler = self
            .reconciler
            .clone()
            .ok_or_else(|| AppError::NotConfigured("remote store".to_string()))?;
        let session = self.session().await.ok_or(AppError::Unauthenticated)?;
        self.run_sync(&reconciler, &session).await
    }

    async fn run_sync(&self, reconciler: &SyncReconciler, session: &Session) -> Result<SyncOutcome> {
        match reconciler.reconcile(session).await {
            Ok(SyncOutcome::Completed(report)) => {
                self.emit(LibraryEvent::SyncCompleted(report.clone()));
                Ok(SyncOutcome::Completed(report))
            }
            Ok(outcome) => Ok(outcome),
            Err(AppError::Unauthenticated) => {
                tracing::warn!("Sync rejected: session expired");
                self.emit(LibraryEvent::LoginRequired { action: "sync" });
                Err(AppError::Unauthenticated)
            }
            Err(e) => {
                tracing::warn!("Sync failed: {}", e);
                self.emit(LibraryEvent::RemoteFailed {
                    action: "sync",
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Drop the session; the local library stays as it is
    pub async fn sign_out(&self) {
        if let Some(session) = self.session.write().await.take() {
            tracing::info!("User {} signed out", session.user_id);
            self.emit(LibraryEvent::SignedOut);
        }
    }

    // ===== Favorites =====

    /// Favorites in insertion order, optionally of one kind
    pub async fn list_favorites(&self, kind: Option<FavoriteKind>) -> Result<Vec<Favorite>> {
        let favorites = self.local.list_favorites().await?;
        Ok(match kind {
            Some(kind) => favorites
                .into_iter()
                .filter(|f| f.item.kind() == kind)
                .collect(),
            None => favorites,
        })
    }

    pub async fn is_favorite(&self, kind: FavoriteKind, id: &str) -> Result<bool> {
        self.local.contains_favorite(&FavoriteKey::new(kind, id)).await
    }

    /// Add the item if absent, remove it if present. Returns whether it is
    /// now a favorite.
    pub async fn toggle_favorite(&self, item: FavoriteItem) -> Result<bool> {
        let _writes = self.writes.lock().await;
        let key = item.key();
        if self.local.contains_favorite(&key).await? {
            self.remove_favorite_locked(key).await?;
            return Ok(false);
        }

        let favorite = Favorite::new(item);
        self.local.add_favorite(&favorite).await?;
        tracing::debug!("Favorite added: {}", key);

        let pushed = &favorite;
        let document_id = self
            .write_through("add favorite", move |remote, session| async move {
                ensure_remote_favorite(remote.as_ref(), &session, pushed).await
            })
            .await;
        if let Some(document_id) = document_id {
            self.local.attach_favorite_document(&key, &document_id).await?;
        }

        Ok(true)
    }

    /// Remove a favorite. Returns whether it existed locally.
    pub async fn remove_favorite(&self, kind: FavoriteKind, id: &str) -> Result<bool> {
        let _writes = self.writes.lock().await;
        self.remove_favorite_locked(FavoriteKey::new(kind, id)).await
    }

    async fn remove_favorite_locked(&self, key: FavoriteKey) -> Result<bool> {
        let Some(removed) = self.local.remove_favorite(&key).await? else {
            return Ok(false);
        };
        tracing::debug!("Favorite removed: {}", key);

        let key = &key;
        let known_id = removed.document_id.as_deref();
        self.write_through("remove favorite", move |remote, session| async move {
            match known_id {
                Some(document_id) => remote.delete_favorite(&session, document_id).await,
                None => {
                    // Never synced from here; it may still exist remotely
                    for favorite in remote.list_favorites(&session).await? {
                        if favorite.key() == *key {
                            if let Some(document_id) = favorite.document_id.as_deref() {
                                remote.delete_favorite(&session, document_id).await?;
                            }
                        }
                    }
                    Ok(())
                }
            }
        })
        .await;

        Ok(true)
    }

    // ===== Bookmarks =====

    pub async fn list_bookmarks(&self) -> Result<Vec<Bookmark>> {
        self.local.list_bookmarks().await
    }

    pub async fn get_bookmark(&self, key: BookmarkKey) -> Result<Option<Bookmark>> {
        self.local.get_bookmark(key).await
    }

    /// Bookmark a verse. Re-bookmarking keeps the existing note (unless a
    /// new one is given), the attached image and the remote link.
    pub async fn add_bookmark(&self, new: NewBookmark) -> Result<Bookmark> {
        let mut bookmark = new.into_bookmark()?;
        validate_note(bookmark.note.as_deref())?;
        let _writes = self.writes.lock().await;

        if let Some(existing) = self.local.get_bookmark(bookmark.key()).await? {
            if bookmark.note.is_none() {
                bookmark.note = existing.note;
            }
            bookmark.image_ref = existing.image_ref;
            bookmark.document_id = existing.document_id;
        }

        self.local.add_bookmark(&bookmark).await?;
        tracing::debug!("Bookmark saved: {}", bookmark.key());

        self.push_bookmark(bookmark, "add bookmark").await
    }

    /// Remove a bookmark and its image. Returns whether it existed locally.
    pub async fn remove_bookmark(&self, key: BookmarkKey) -> Result<bool> {
        let _writes = self.writes.lock().await;
        let Some(removed) = self.local.remove_bookmark(key).await? else {
            return Ok(false);
        };
        tracing::debug!("Bookmark removed: {}", key);

        if let Some(hash) = removed.image_ref.as_deref() {
            self.release_image(hash).await;
        }

        let known_id = removed.document_id.as_deref();
        self.write_through("remove bookmark", move |remote, session| async move {
            match known_id {
                Some(document_id) => remote.delete_bookmark(&session, document_id).await,
                None => {
                    for bookmark in remote.list_bookmarks(&session).await? {
                        if bookmark.key() == key {
                            if let Some(document_id) = bookmark.document_id.as_deref() {
                                remote.delete_bookmark(&session, document_id).await?;
                            }
                        }
                    }
                    Ok(())
                }
            }
        })
        .await;

        Ok(true)
    }

    /// Set or clear the note on a bookmark
    pub async fn update_note(&self, key: BookmarkKey, note: Option<String>) -> Result<Bookmark> {
        let note = normalize_note(note);
        validate_note(note.as_deref())?;
        let _writes = self.writes.lock().await;

        let bookmark = self.local.update_note(key, note.as_deref()).await?;
        tracing::debug!("Note updated on bookmark {}", key);

        self.push_bookmark(bookmark, "update note").await
    }

    /// Attach an image to a bookmark, replacing any previous one
    pub async fn attach_image(&self, key: BookmarkKey, data: &[u8]) -> Result<Bookmark> {
        let _writes = self.writes.lock().await;
        let existing = self
            .local
            .get_bookmark(key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("bookmark {}", key)))?;

        let hash = self.blobs.write_image(data).await?;
        let bookmark = self.local.set_image(key, Some(&hash)).await?;

        if let Some(previous) = existing.image_ref.as_deref() {
            if previous != hash {
                self.release_image(previous).await;
            }
        }

        self.push_bookmark(bookmark, "attach image").await
    }

    pub async fn remove_image(&self, key: BookmarkKey) -> Result<Bookmark> {
        let _writes = self.writes.lock().await;
        let existing = self
            .local
            .get_bookmark(key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("bookmark {}", key)))?;

        let bookmark = self.local.set_image(key, None).await?;
        if let Some(previous) = existing.image_ref.as_deref() {
            self.release_image(previous).await;
        }

        self.push_bookmark(bookmark, "remove image").await
    }

    /// Image bytes attached to a bookmark, if any
    pub async fn read_image(&self, key: BookmarkKey) -> Result<Option<Vec<u8>>> {
        let Some(bookmark) = self.local.get_bookmark(key).await? else {
            return Ok(None);
        };
        let Some(hash) = bookmark.image_ref.as_deref() else {
            return Ok(None);
        };
        if !self.blobs.exists(hash).await? {
            tracing::warn!("Image {} for bookmark {} is missing", hash, key);
            return Ok(None);
        }
        Ok(Some(self.blobs.read(hash).await?.0))
    }

    /// Forget everything stored on this device
    pub async fn clear_local(&self) -> Result<()> {
        let _writes = self.writes.lock().await;
        for bookmark in self.local.list_bookmarks().await? {
            if let Some(hash) = bookmark.image_ref.as_deref() {
                if let Err(e) = self.blobs.delete(hash).await {
                    tracing::warn!("Failed to delete image {}: {}", hash, e);
                }
            }
        }
        self.local.clear().await
    }

    // ===== Remote write-through =====

    /// Push a bookmark already saved locally, returning the local copy with
    /// the document id attached when the push succeeded
    async fn push_bookmark(&self, bookmark: Bookmark, action: &'static str) -> Result<Bookmark> {
        let pushed = &bookmark;
        let document_id = self
            .write_through(action, move |remote, session| async move {
                upsert_remote_bookmark(remote.as_ref(), &session, pushed).await
            })
            .await;

        match document_id {
            Some(document_id) if bookmark.document_id.as_deref() != Some(document_id.as_str()) => {
                self.local
                    .attach_bookmark_document(bookmark.key(), &document_id)
                    .await
            }
            _ => Ok(bookmark),
        }
    }

    /// Run a remote write if a session is active. Failures become events.
    async fn write_through<T, F, Fut>(&self, action: &'static str, call: F) -> Option<T>
    where
        F: FnOnce(Arc<dyn RemoteStore>, Session) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let remote = self.remote.clone()?;
        let Some(session) = self.session().await else {
            tracing::debug!("{} kept locally: not signed in", action);
            self.emit(LibraryEvent::LoginRequired { action });
            return None;
        };

        match call(remote, session).await {
            Ok(value) => Some(value),
            Err(AppError::Unauthenticated) => {
                tracing::warn!("{} kept locally: session rejected", action);
                self.emit(LibraryEvent::LoginRequired { action });
                None
            }
            Err(e) => {
                tracing::warn!("{} kept locally: remote write failed: {}", action, e);
                self.emit(LibraryEvent::RemoteFailed {
                    action,
                    message: e.to_string(),
                });
                None
            }
        }
    }

    /// Delete an image blob unless another bookmark still points at it
    async fn release_image(&self, hash: &str) {
        let still_used = match self.local.list_bookmarks().await {
            Ok(bookmarks) => bookmarks
                .iter()
                .any(|b| b.image_ref.as_deref() == Some(hash)),
            Err(e) => {
                tracing::warn!("Keeping image {}: {}", hash, e);
                true
            }
        };
        if !still_used {
            if let Err(e) = self.blobs.delete(hash).await {
                tracing::warn!("Failed to delete image {}: {}", hash, e);
            }
        }
    }
}

fn validate_note(note: Option<&str>) -> Result<()> {
    match note {
        Some(n) if n.chars().count() > MAX_NOTE_LENGTH => Err(AppError::Validation(format!(
            "note is longer than {} characters",
            MAX_NOTE_LENGTH
        ))),
        _ => Ok(()),
    }
}

/// Document id of the remote favorite with this identity, creating it if
/// the user does not have one yet
async fn ensure_remote_favorite(
    remote: &dyn RemoteStore,
    session: &Session,
    favorite: &Favorite,
) -> Result<String> {
    let key = favorite.key();
    let listing = remote.favorite_listing(session).await?;
    if listing.unreadable.contains(&key.to_string()) {
        return Err(AppError::Generic(format!(
            "remote favorite {} exists but is unreadable",
            key
        )));
    }
    let existing = listing
        .favorites
        .into_iter()
        .find(|f| f.key() == key)
        .and_then(|f| f.document_id);
    if let Some(document_id) = existing {
        return Ok(document_id);
    }

    remote
        .create_favorite(session, favorite)
        .await?
        .document_id
        .ok_or_else(|| AppError::Generic("remote create returned no document id".to_string()))
}

/// Update the remote bookmark with this identity, or create it
async fn upsert_remote_bookmark(
    remote: &dyn RemoteStore,
    session: &Session,
    bookmark: &Bookmark,
) -> Result<String> {
    let document_id = match bookmark.document_id.clone() {
        Some(id) => Some(id),
        None => {
            let key = bookmark.key();
            remote
                .list_bookmarks(session)
                .await?
                .into_iter()
                .find(|b| b.key() == key)
                .and_then(|b| b.document_id)
        }
    };

    match document_id {
        Some(document_id) => {
            remote.update_bookmark(session, &document_id, bookmark).await?;
            Ok(document_id)
        }
        None => remote
            .create_bookmark(session, bookmark)
            .await?
            .document_id
            .ok_or_else(|| AppError::Generic("remote create returned no document id".to_string())),
    }
}
