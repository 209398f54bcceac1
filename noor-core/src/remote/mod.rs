//! Remote store
//!
//! User-scoped favorites and bookmarks in a hosted document database.
//! Every call needs a signed-in `Session`; the backend assigns a document
//! id on create and that id never changes afterwards.

pub mod appwrite;
pub mod memory;
pub mod retry;

pub use appwrite::AppwriteStore;
pub use memory::MemoryRemoteStore;
pub use retry::{Idempotency, RetryPolicy};

use crate::database::{Bookmark, Favorite};
use crate::error::Result;
use async_trait::async_trait;
use std::fmt;

/// An authenticated user session
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    /// Short-lived JWT issued by the auth backend
    pub jwt: String,
}

impl Session {
    pub fn new(user_id: impl Into<String>, jwt: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            jwt: jwt.into(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("jwt", &"<redacted>")
            .finish()
    }
}

/// Every favorite document the user has, as far as it could be read
#[derive(Debug, Clone, Default)]
pub struct FavoriteListing {
    pub favorites: Vec<Favorite>,
    /// Identities (`kind:id`) of documents that exist but could not be decoded
    pub unreadable: Vec<String>,
}

/// CRUD over the signed-in user's remote collections
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn favorite_listing(&self, session: &Session) -> Result<FavoriteListing>;

    async fn list_favorites(&self, session: &Session) -> Result<Vec<Favorite>> {
        Ok(self.favorite_listing(session).await?.favorites)
    }

    /// Create a favorite; the returned copy carries its document id
    async fn create_favorite(&self, session: &Session, favorite: &Favorite) -> Result<Favorite>;

    async fn delete_favorite(&self, session: &Session, document_id: &str) -> Result<()>;

    async fn list_bookmarks(&self, session: &Session) -> Result<Vec<Bookmark>>;

    /// Create a bookmark; the returned copy carries its document id
    async fn create_bookmark(&self, session: &Session, bookmark: &Bookmark) -> Result<Bookmark>;

    /// Push the mutable fields (note, image) of a bookmark
    async fn update_bookmark(
        &self,
        session: &Session,
        document_id: &str,
        bookmark: &Bookmark,
    ) -> Result<Bookmark>;

    async fn delete_bookmark(&self, session: &Session, document_id: &str) -> Result<()>;
}
