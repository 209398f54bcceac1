//! Noor core
//!
//! Favorites and bookmarks for the Noor Islamic portal, kept on the device
//! and synced to the user's remote collections after sign-in. Also serves
//! the supplication/azkar content proxies, welcome emails and cache
//! revalidation over HTTP.

pub mod app;
pub mod config;
pub mod database;
pub mod error;
pub mod http_client;
pub mod remote;
pub mod server;
pub mod services;
pub mod storage;

pub use app::AppState;
pub use error::{AppError, Result};
