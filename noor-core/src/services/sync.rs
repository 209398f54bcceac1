//! Sync reconciler
//!
//! Merges the local library with the signed-in user's remote collections.
//! Items are matched by identity (`kind:id` for favorites, `surah:ayah` for
//! bookmarks), never by document id:
//!
//! - local only: created remotely, then the returned document id is kept locally
//! - remote only: copied into the local store as-is
//! - in both: the remote copy wins, except that a note or image present only
//!   locally is kept and pushed back as an update
//!
//! Running it again with nothing changed creates nothing. A run holds the
//! library's write lock, so provider mutations wait for it to finish.

use crate::database::{normalize_note, Bookmark, BookmarkKey, Favorite, FavoriteKey, LocalStore};
use crate::error::{AppError, Result};
use crate::remote::{RemoteStore, Session};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Counts from one reconciliation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Local-only items created remotely
    pub pushed: usize,
    /// Remote-only items copied locally
    pub pulled: usize,
    /// Local items replaced by a differing remote copy
    pub overwritten: usize,
    /// Remote bookmarks updated with a locally kept note or image
    pub updates_pushed: usize,
    /// Per-item remote failures, left for the next run
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// Another reconciliation was in progress; nothing was done
    AlreadyRunning,
    /// The session belonged to the user already signed in
    AlreadySignedIn,
}

/// Remote items indexed by identity, in the order the remote returned them
struct RemoteIndex<K, T> {
    order: Vec<K>,
    items: HashMap<K, T>,
}

impl<K: Eq + Hash + Clone + std::fmt::Display, T> RemoteIndex<K, T> {
    fn build(list: Vec<T>, key: impl Fn(&T) -> K, what: &str) -> Self {
        let mut order = Vec::with_capacity(list.len());
        let mut items = HashMap::with_capacity(list.len());
        for item in list {
            let k = key(&item);
            if items.contains_key(&k) {
                tracing::warn!("Duplicate remote {} {} ignored", what, k);
                continue;
            }
            order.push(k.clone());
            items.insert(k, item);
        }
        Self { order, items }
    }

    fn take(&mut self, key: &K) -> Option<T> {
        self.items.remove(key)
    }

    /// Items nobody took, in remote order
    fn into_remaining(mut self) -> Vec<T> {
        self.order
            .iter()
            .filter_map(|k| self.items.remove(k))
            .collect()
    }
}

pub struct SyncReconciler {
    local: LocalStore,
    remote: Arc<dyn RemoteStore>,
    running: Mutex<()>,
    writes: Arc<Mutex<()>>,
}

impl SyncReconciler {
    pub fn new(local: LocalStore, remote: Arc<dyn RemoteStore>) -> Self {
        Self::with_write_lock(local, remote, Arc::new(Mutex::new(())))
    }

    /// Share `writes` with whoever else mutates `local`; a run holds it
    /// from the first listing to the last local write.
    pub fn with_write_lock(
        local: LocalStore,
        remote: Arc<dyn RemoteStore>,
        writes: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            local,
            remote,
            running: Mutex::new(()),
            writes,
        }
    }

    /// Reconcile favorites and bookmarks for `session`.
    ///
    /// Per-item remote failures are counted and skipped. An expired session
    /// or a failed listing aborts the run with the error.
    pub async fn reconcile(&self, session: &Session) -> Result<SyncOutcome> {
        let Ok(_guard) = self.running.try_lock() else {
            tracing::info!("Sync already in progress, skipping");
            return Ok(SyncOutcome::AlreadyRunning);
        };

        let _writes = self.writes.lock().await;
        tracing::info!("Starting sync for user {}", session.user_id);

        let mut report = SyncReport::default();
        self.sync_favorites(session, &mut report).await?;
        self.sync_bookmarks(session, &mut report).await?;

        tracing::info!(
            "Sync finished: {} pushed, {} pulled, {} overwritten, {} updated, {} failed",
            report.pushed,
            report.pulled,
            report.overwritten,
            report.updates_pushed,
            report.failed
        );

        Ok(SyncOutcome::Completed(report))
    }

    async fn sync_favorites(&self, session: &Session, report: &mut SyncReport) -> Result<()> {
        let listing = self.remote.favorite_listing(session).await?;
        let unreadable: HashSet<String> = listing.unreadable.into_iter().collect();
        let local = self.local.list_favorites().await?;
        let mut index: RemoteIndex<FavoriteKey, Favorite> =
            RemoteIndex::build(listing.favorites, Favorite::key, "favorite");

        for favorite in &local {
            let key = favorite.key();
            match index.take(&key) {
                Some(remote) => {
                    if remote != *favorite {
                        self.local.add_favorite(&remote).await?;
                        report.overwritten += 1;
                    }
                }
                // A document exists for it; creating another would duplicate it
                None if unreadable.contains(&key.to_string()) => {
                    tracing::warn!("Not pushing favorite {}: remote copy is unreadable", key);
                    report.failed += 1;
                }
                None => match self.remote.create_favorite(session, favorite).await {
                    Ok(created) => {
                        let Some(document_id) = created.document_id.as_deref() else {
                            report.pushed += 1;
                            continue;
                        };
                        match self.local.attach_favorite_document(&key, document_id).await {
                            Ok(()) => report.pushed += 1,
                            Err(AppError::NotFound(_)) => {
                                tracing::warn!("Favorite {} removed locally during sync", key);
                                if let Err(e) = self.remote.delete_favorite(session, document_id).await {
                                    skip_item(e, "orphaned favorite", &key, report)?;
                                }
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    Err(e) => skip_item(e, "favorite", &key, report)?,
                },
            }
        }

        for remote in index.into_remaining() {
            self.local.add_favorite(&remote).await?;
            report.pulled += 1;
        }

        Ok(())
    }

    async fn sync_bookmarks(&self, session: &Session, report: &mut SyncReport) -> Result<()> {
        let remote = self.remote.list_bookmarks(session).await?;
        let local = self.local.list_bookmarks().await?;
        let mut index: RemoteIndex<BookmarkKey, Bookmark> =
            RemoteIndex::build(remote, Bookmark::key, "bookmark");

        for bookmark in &local {
            let key = bookmark.key();
            match index.take(&key) {
                Some(remote) => {
                    let merged = self.merge_bookmark(session, bookmark, remote, report).await?;
                    if merged != *bookmark {
                        self.local.add_bookmark(&merged).await?;
                        report.overwritten += 1;
                    }
                }
                None => match self.remote.create_bookmark(session, bookmark).await {
                    Ok(created) => {
                        let Some(document_id) = created.document_id.as_deref() else {
                            report.pushed += 1;
                            continue;
                        };
                        match self.local.attach_bookmark_document(key, document_id).await {
                            Ok(_) => report.pushed += 1,
                            Err(AppError::NotFound(_)) => {
                                tracing::warn!("Bookmark {} removed locally during sync", key);
                                if let Err(e) = self.remote.delete_bookmark(session, document_id).await {
                                    skip_item(e, "orphaned bookmark", &key, report)?;
                                }
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    Err(e) => skip_item(e, "bookmark", &key, report)?,
                },
            }
        }

        for remote in index.into_remaining() {
            self.local.add_bookmark(&remote).await?;
            report.pulled += 1;
        }

        Ok(())
    }

    /// Remote wins, but locally-only note and image survive and are pushed
    async fn merge_bookmark(
        &self,
        session: &Session,
        local: &Bookmark,
        remote: Bookmark,
        report: &mut SyncReport,
    ) -> Result<Bookmark> {
        let mut merged = remote;
        merged.note = normalize_note(merged.note);
        let mut kept_local = false;

        if merged.note.is_none() && local.note.is_some() {
            merged.note = local.note.clone();
            kept_local = true;
        }
        if merged.image_ref.is_none() && local.image_ref.is_some() {
            merged.image_ref = local.image_ref.clone();
            kept_local = true;
        }

        if kept_local {
            if let Some(document_id) = merged.document_id.clone() {
                match self
                    .remote
                    .update_bookmark(session, &document_id, &merged)
                    .await
                {
                    Ok(_) => report.updates_pushed += 1,
                    Err(e) => skip_item(e, "bookmark update", &merged.key(), report)?,
                }
            }
        }

        Ok(merged)
    }
}

/// Count a per-item failure, or abort when the session is gone
fn skip_item(
    error: AppError,
    what: &str,
    key: &impl std::fmt::Display,
    report: &mut SyncReport,
) -> Result<()> {
    if matches!(error, AppError::Unauthenticated) {
        return Err(error);
    }
    tracing::warn!("Failed to sync {} {}: {}", what, key, error);
    report.failed += 1;
    Ok(())
}
