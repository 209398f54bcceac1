//! Application configuration
//!
//! Constants for resource limits and remote-call policy, plus the
//! environment-driven `Config` used by the server binary.

use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use tracing::{info, warn};

// ===== Remote calls =====

/// Default per-request timeout for the remote store and content APIs
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 10;

/// Default attempts per remote call (first try plus one retry)
pub const DEFAULT_REMOTE_MAX_ATTEMPTS: u32 = 2;

/// Backoff before the first retry; doubles per attempt
pub const RETRY_BASE_DELAY_MS: u64 = 250;

/// Upper bound on a single backoff sleep
pub const RETRY_MAX_DELAY_MS: u64 = 4_000;

/// Page size used when listing remote documents
pub const REMOTE_PAGE_SIZE: usize = 100;

/// User agent sent on every outbound request
pub const USER_AGENT: &str = concat!("noor-core/", env!("CARGO_PKG_VERSION"));

// ===== Local storage =====

/// File name of the on-device SQLite store
pub const LOCAL_DB_FILE: &str = "library.db";

/// Directory (under the data dir) holding bookmark image blobs
pub const ATTACHMENTS_DIR: &str = "attachments";

/// Largest image accepted as a bookmark attachment (5 MiB)
pub const MAX_ATTACHMENT_BYTES: usize = 5 * 1024 * 1024;

/// Longest note stored on a bookmark
pub const MAX_NOTE_LENGTH: usize = 2_000;

// ===== Content cache =====

/// Cache tag for dua-dhikr responses
pub const DUAS_CACHE_TAG: &str = "duas";

/// Cache tag for the azkar dataset
pub const AZKAR_CACHE_TAG: &str = "azkar";

// ===== Defaults for external services =====

pub const DEFAULT_ADDR: &str = "127.0.0.1:3030";
pub const DEFAULT_APPWRITE_ENDPOINT: &str = "https://cloud.appwrite.io/v1";
pub const DEFAULT_DUA_API_URL: &str = "https://dua-dhikr.vercel.app";
pub const DEFAULT_AZKAR_API_URL: &str =
    "https://raw.githubusercontent.com/nawafalqari/azkar-api/main/azkar.json";
pub const DEFAULT_RESEND_API_URL: &str = "https://api.resend.com";
pub const DEFAULT_EMAIL_FROM: &str = "Noor <welcome@noor.app>";

pub const WELCOME_EMAIL_SUBJECT: &str = "مرحبا بك في نور | Welcome to Noor";

/// Appwrite collection and project identifiers
#[derive(Debug, Clone)]
pub struct AppwriteConfig {
    pub endpoint: String,
    pub project_id: String,
    pub database_id: String,
    pub favorites_collection_id: String,
    pub bookmarks_collection_id: String,
}

/// Runtime configuration loaded from the environment
#[derive(Debug, Clone)]
pub struct Config {
    pub addr: String,
    pub data_dir: PathBuf,
    pub appwrite: Option<AppwriteConfig>,
    pub resend_api_key: Option<String>,
    pub resend_api_url: String,
    pub email_from: String,
    pub revalidate_secret: Option<String>,
    pub dua_api_url: String,
    pub azkar_api_url: String,
    pub remote_timeout: Duration,
    pub remote_max_attempts: u32,
}

impl Config {
    pub fn load() -> Self {
        let appwrite = match (
            optional("APPWRITE_PROJECT_ID"),
            optional("APPWRITE_DATABASE_ID"),
        ) {
            (Some(project_id), Some(database_id)) => Some(AppwriteConfig {
                endpoint: try_load("APPWRITE_ENDPOINT", DEFAULT_APPWRITE_ENDPOINT.to_string()),
                project_id,
                database_id,
                favorites_collection_id: try_load("APPWRITE_FAVORITES_COLLECTION_ID", "favorites".to_string()),
                bookmarks_collection_id: try_load("APPWRITE_BOOKMARKS_COLLECTION_ID", "bookmarks".to_string()),
            }),
            _ => {
                warn!("Appwrite project/database not set, remote sync disabled");
                None
            }
        };

        Self {
            addr: try_load("NOOR_ADDR", DEFAULT_ADDR.to_string()),
            data_dir: PathBuf::from(try_load("NOOR_DATA_DIR", "./data".to_string())),
            appwrite,
            resend_api_key: optional("RESEND_API_KEY"),
            resend_api_url: try_load("RESEND_API_URL", DEFAULT_RESEND_API_URL.to_string()),
            email_from: try_load("EMAIL_FROM", DEFAULT_EMAIL_FROM.to_string()),
            revalidate_secret: optional("REVALIDATE_SECRET"),
            dua_api_url: try_load("DUA_API_URL", DEFAULT_DUA_API_URL.to_string()),
            azkar_api_url: try_load("AZKAR_API_URL", DEFAULT_AZKAR_API_URL.to_string()),
            remote_timeout: Duration::from_secs(try_load_nonzero(
                "REMOTE_TIMEOUT_SECS",
                DEFAULT_REMOTE_TIMEOUT_SECS,
            )),
            remote_max_attempts: try_load_nonzero("REMOTE_MAX_ATTEMPTS", DEFAULT_REMOTE_MAX_ATTEMPTS),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            data_dir: PathBuf::from("./data"),
            appwrite: None,
            resend_api_key: None,
            resend_api_url: DEFAULT_RESEND_API_URL.to_string(),
            email_from: DEFAULT_EMAIL_FROM.to_string(),
            revalidate_secret: None,
            dua_api_url: DEFAULT_DUA_API_URL.to_string(),
            azkar_api_url: DEFAULT_AZKAR_API_URL.to_string(),
            remote_timeout: Duration::from_secs(DEFAULT_REMOTE_TIMEOUT_SECS),
            remote_max_attempts: DEFAULT_REMOTE_MAX_ATTEMPTS,
        }
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn optional(key: &str) -> Option<String> {
    let value = var(key);
    if value.is_none() {
        info!("{key} not set");
    }
    value
}

/// Parse `key`, falling back to `default` when unset or malformed
fn try_load<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Some(raw) = var(key) else {
        return default;
    };
    match raw.parse() {
        Ok(value) => value,
        Err(e) => {
            warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
            default
        }
    }
}

/// Like `try_load`, but zero also falls back to `default`
fn try_load_nonzero<T>(key: &str, default: T) -> T
where
    T: FromStr + Display + Default + PartialEq,
    T::Err: Display,
{
    let Some(raw) = var(key) else {
        return default;
    };
    match raw.parse::<T>() {
        Ok(value) if value != T::default() => value,
        Ok(_) => {
            warn!("{key} must be greater than zero, using default: {default}");
            default
        }
        Err(e) => {
            warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_timeout_falls_back_to_default() {
        env::set_var("NOOR_TEST_TIMEOUT_SECS", "0");
        let secs: u64 = try_load_nonzero("NOOR_TEST_TIMEOUT_SECS", DEFAULT_REMOTE_TIMEOUT_SECS);
        assert_eq!(secs, DEFAULT_REMOTE_TIMEOUT_SECS);

        env::set_var("NOOR_TEST_TIMEOUT_SECS", "3");
        let secs: u64 = try_load_nonzero("NOOR_TEST_TIMEOUT_SECS", DEFAULT_REMOTE_TIMEOUT_SECS);
        assert_eq!(secs, 3);
        env::remove_var("NOOR_TEST_TIMEOUT_SECS");
    }

    #[test]
    fn test_try_load_falls_back_on_garbage() {
        env::set_var("NOOR_TEST_ATTEMPTS", "many");
        let attempts: u32 = try_load("NOOR_TEST_ATTEMPTS", 2);
        assert_eq!(attempts, 2);
        env::remove_var("NOOR_TEST_ATTEMPTS");
    }

    #[test]
    fn test_blank_variable_is_unset() {
        env::set_var("NOOR_TEST_BLANK", "   ");
        assert!(optional("NOOR_TEST_BLANK").is_none());
        env::remove_var("NOOR_TEST_BLANK");
    }

    #[test]
    fn test_default_config_has_no_secrets() {
        let config = Config::default();
        assert!(config.resend_api_key.is_none());
        assert!(config.revalidate_secret.is_none());
        assert_eq!(config.remote_max_attempts, DEFAULT_REMOTE_MAX_ATTEMPTS);
    }
}
