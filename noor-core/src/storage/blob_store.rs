//! Content-addressed image storage for bookmarks
//!
//! Images attached to a bookmark are stored under their SHA-256 hash; the
//! bookmark only carries the hash. Files live in a two-level directory
//! structure, e.g. hash "abcd1234..." is stored at "attachments/ab/cd/abcd1234...".

use crate::config::MAX_ATTACHMENT_BYTES;
use crate::error::{AppError, Result};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Image formats accepted as attachments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
}

impl ImageFormat {
    /// Detect the format from magic bytes
    pub fn sniff(data: &[u8]) -> Option<Self> {
        match data {
            [0x89, b'P', b'N', b'G', ..] => Some(ImageFormat::Png),
            [0xFF, 0xD8, 0xFF, ..] => Some(ImageFormat::Jpeg),
            [b'G', b'I', b'F', b'8', ..] => Some(ImageFormat::Gif),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => {
                Some(ImageFormat::Webp)
            }
            _ => None,
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Webp => "image/webp",
        }
    }
}

/// Content-addressed attachment store
#[derive(Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Create the root directory if needed
    pub async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        tracing::info!("Attachment store initialized at: {:?}", self.root);
        Ok(())
    }

    /// Store an image, returning its hash
    pub async fn write_image(&self, data: &[u8]) -> Result<String> {
        if data.len() > MAX_ATTACHMENT_BYTES {
            return Err(AppError::Attachment(format!(
                "image is {} bytes, limit is {}",
                data.len(),
                MAX_ATTACHMENT_BYTES
            )));
        }
        let format = ImageFormat::sniff(data)
            .ok_or_else(|| AppError::Attachment("unsupported image format".to_string()))?;

        let hash = calculate_hash(data);
        let path = self.get_path(&hash)?;

        if path.exists() {
            tracing::debug!("Attachment already stored: {}", hash);
            return Ok(hash);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write to temp file first so readers never see a partial image
        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        fs::rename(temp_path, &path).await?;

        tracing::debug!(
            "Stored {} attachment {} ({} bytes)",
            format.mime_type(),
            hash,
            data.len()
        );

        Ok(hash)
    }

    /// Read an attachment and its detected format
    pub async fn read(&self, hash: &str) -> Result<(Vec<u8>, Option<ImageFormat>)> {
        let path = self.get_path(hash)?;

        if !path.exists() {
            return Err(AppError::NotFound(format!("attachment {}", hash)));
        }

        let data = fs::read(&path).await?;
        let format = ImageFormat::sniff(&data);
        Ok((data, format))
    }

    pub async fn exists(&self, hash: &str) -> Result<bool> {
        Ok(self.get_path(hash)?.exists())
    }

    /// Delete an attachment; deleting a missing one is not an error
    pub async fn delete(&self, hash: &str) -> Result<()> {
        let path = self.get_path(hash)?;

        if !path.exists() {
            return Ok(());
        }

        fs::remove_file(&path).await?;
        tracing::debug!("Deleted attachment: {}", hash);
        Ok(())
    }

    fn get_path(&self, hash: &str) -> Result<PathBuf> {
        if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AppError::Attachment(format!("invalid attachment hash: {}", hash)));
        }
        Ok(self.root.join(&hash[0..2]).join(&hash[2..4]).join(hash))
    }
}

fn calculate_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
