//! Storage module
//!
//! Provides content-addressed storage for bookmark image attachments.

pub mod blob_store;

pub use blob_store::{BlobStore, ImageFormat};
