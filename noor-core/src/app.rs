//! Application state and initialization
//!
//! All services are built here from the loaded `Config` and shared with
//! the HTTP layer through `AppState`.

use crate::config::{Config, ATTACHMENTS_DIR, LOCAL_DB_FILE};
use crate::database::LocalStore;
use crate::error::Result;
use crate::remote::{AppwriteStore, RemoteStore, RetryPolicy};
use crate::services::{ContentClient, EmailService, LibraryProvider};
use crate::storage::BlobStore;
use std::sync::Arc;

/// Central application state holding all services
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub library: LibraryProvider,
    pub content: ContentClient,
    pub email: EmailService,
}

impl AppState {
    pub fn new(
        config: Config,
        library: LibraryProvider,
        content: ContentClient,
        email: EmailService,
    ) -> Self {
        Self {
            config,
            library,
            content,
            email,
        }
    }

    /// Build every service from configuration. Storage problems degrade
    /// to memory instead of failing startup.
    pub async fn initialize(config: Config) -> Result<Self> {
        tracing::info!("Initializing application");
        tracing::info!("Data directory: {:?}", config.data_dir);

        if let Err(e) = tokio::fs::create_dir_all(&config.data_dir).await {
            tracing::warn!("Could not create data directory {:?}: {}", config.data_dir, e);
        }

        let local = LocalStore::open(&config.data_dir.join(LOCAL_DB_FILE)).await?;

        let blobs = BlobStore::new(config.data_dir.join(ATTACHMENTS_DIR));
        if let Err(e) = blobs.initialize().await {
            tracing::warn!("Attachment store unavailable: {}", e);
        }

        let remote: Option<Arc<dyn RemoteStore>> = match &config.appwrite {
            Some(appwrite) => Some(Arc::new(AppwriteStore::new(
                appwrite.clone(),
                config.remote_timeout,
                RetryPolicy::new(config.remote_max_attempts),
            )?)),
            None => None,
        };

        let library = LibraryProvider::new(local, blobs, remote);
        let content = ContentClient::from_config(&config)?;
        let email = EmailService::from_config(&config)?;

        if !email.is_configured() {
            tracing::warn!("Welcome emails disabled: RESEND_API_KEY not set");
        }

        tracing::info!("Application initialized successfully");

        Ok(Self::new(config, library, content, email))
    }
}
