//! Content client
//!
//! Read-only access to the supplication (dua-dhikr) API and the azkar
//! dataset. Responses are cached in process under a tag (`duas`, `azkar`)
//! and the upstream path, until the revalidation endpoint drops them.

use crate::config::{Config, AZKAR_CACHE_TAG, DUAS_CACHE_TAG};
use crate::error::{AppError, Result};
use crate::http_client::{build_client, check};
use crate::remote::{Idempotency, RetryPolicy};
use reqwest::header::ACCEPT_LANGUAGE;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Languages served by the dua-dhikr API
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Id,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Id => "id",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Language::En),
            "id" => Ok(Language::Id),
            other => Err(AppError::Validation(format!("unsupported language: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuaCategory {
    pub title: String,
    pub slug: String,
    #[serde(default)]
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuaSummary {
    pub id: u32,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dua {
    pub id: u32,
    pub title: String,
    pub arabic: String,
    #[serde(default)]
    pub latin: Option<String>,
    #[serde(default)]
    pub translation: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub fawaid: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

/// One remembrance from the azkar dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zikr {
    #[serde(default)]
    pub category: String,
    /// How many times to repeat it
    #[serde(default = "default_count", deserialize_with = "flexible_count")]
    pub count: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub reference: String,
    pub content: String,
}

/// Azkar grouped by category name
pub type Azkar = BTreeMap<String, Vec<Zikr>>;

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

/// Some categories nest their entries one level deeper
#[derive(Deserialize)]
#[serde(untagged)]
enum ZikrEntry {
    One(Zikr),
    Many(Vec<Zikr>),
}

fn default_count() -> u32 {
    1
}

/// Counts arrive as numbers, numeric strings or empty strings
fn flexible_count<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Number(u32),
        Text(String),
    }

    Ok(match Count::deserialize(deserializer)? {
        Count::Number(n) => n,
        Count::Text(s) => s.trim().parse().unwrap_or(1),
    })
}

struct CacheEntry {
    tag: &'static str,
    path: String,
    body: Value,
}

#[derive(Clone)]
pub struct ContentClient {
    client: Client,
    dua_api_url: String,
    azkar_api_url: String,
    retry: RetryPolicy,
    cache: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl ContentClient {
    pub fn new(
        dua_api_url: impl Into<String>,
        azkar_api_url: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            dua_api_url: dua_api_url.into().trim_end_matches('/').to_string(),
            azkar_api_url: azkar_api_url.into(),
            retry,
            cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.dua_api_url.clone(),
            config.azkar_api_url.clone(),
            config.remote_timeout,
            RetryPolicy::new(config.remote_max_attempts),
        )
    }

    pub async fn categories(&self, lang: Language) -> Result<Vec<DuaCategory>> {
        self.duas("/categories".to_string(), lang).await
    }

    pub async fn category_duas(&self, slug: &str, lang: Language) -> Result<Vec<DuaSummary>> {
        self.duas(format!("/categories/{}/duas", validate_slug(slug)?), lang)
            .await
    }

    pub async fn dua(&self, slug: &str, id: u32, lang: Language) -> Result<Dua> {
        self.duas(format!("/categories/{}/duas/{}", validate_slug(slug)?, id), lang)
            .await
    }

    /// The full azkar dataset
    pub async fn azkar(&self) -> Result<Azkar> {
        let url = self.azkar_api_url.clone();
        let raw: BTreeMap<String, Vec<ZikrEntry>> =
            self.cached(AZKAR_CACHE_TAG, "/azkar", None, &url).await?;

        Ok(raw
            .into_iter()
            .map(|(category, entries)| {
                let flat = entries
                    .into_iter()
                    .flat_map(|entry| match entry {
                        ZikrEntry::One(zikr) => vec![zikr],
                        ZikrEntry::Many(many) => many,
                    })
                    .collect();
                (category, flat)
            })
            .collect())
    }

    async fn duas<T: DeserializeOwned>(&self, path: String, lang: Language) -> Result<T> {
        let url = format!("{}{}", self.dua_api_url, path);
        let envelope: Envelope<T> = self.cached(DUAS_CACHE_TAG, &path, Some(lang), &url).await?;
        Ok(envelope.data)
    }

    async fn cached<T: DeserializeOwned>(
        &self,
        tag: &'static str,
        path: &str,
        lang: Option<Language>,
        url: &str,
    ) -> Result<T> {
        let key = match lang {
            Some(lang) => format!("{}?lang={}", path, lang),
            None => path.to_string(),
        };

        let hit = self.cache.read().await.get(&key).map(|e| e.body.clone());
        if let Some(body) = hit {
            tracing::debug!("Content cache hit: {}", key);
            return Ok(serde_json::from_value(body)?);
        }

        let body = self
            .retry
            .run(&key, Idempotency::Idempotent, || self.fetch(url, lang))
            .await?;
        let parsed = serde_json::from_value(body.clone())?;

        self.cache.write().await.insert(
            key,
            CacheEntry {
                tag,
                path: path.to_string(),
                body,
            },
        );

        Ok(parsed)
    }

    async fn fetch(&self, url: &str, lang: Option<Language>) -> Result<Value> {
        tracing::debug!("Fetching {}", url);
        let mut request = self.client.get(url);
        if let Some(lang) = lang {
            request = request.header(ACCEPT_LANGUAGE, lang.as_str());
        }
        let response = check(request.send().await?).await?;
        Ok(response.json().await?)
    }

    /// Drop every cached response with this tag, returning how many
    pub async fn invalidate_tag(&self, tag: &str) -> usize {
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|_, entry| entry.tag != tag);
        let dropped = before - cache.len();
        tracing::info!("Revalidated tag {}: {} cached response(s) dropped", tag, dropped);
        dropped
    }

    /// Drop every cached response for this upstream path, in all languages
    pub async fn invalidate_path(&self, path: &str) -> usize {
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|_, entry| entry.path != path);
        let dropped = before - cache.len();
        tracing::info!("Revalidated path {}: {} cached response(s) dropped", path, dropped);
        dropped
    }
}

fn validate_slug(slug: &str) -> Result<&str> {
    let valid = !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(slug)
    } else {
        Err(AppError::Validation(format!("invalid category slug: {}", slug)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Upstream stand-in that counts hits and echoes the language
    async fn serve_upstream() -> (String, Arc<AtomicU32>) {
        let hits = Arc::new(AtomicU32::new(0));

        async fn categories(
            State(hits): State<Arc<AtomicU32>>,
            headers: HeaderMap,
        ) -> Json<Value> {
            hits.fetch_add(1, Ordering::SeqCst);
            let lang = headers
                .get("accept-language")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("none")
                .to_string();
            Json(json!({
                "statusCode": 200,
                "data": [{ "title": format!("Morning ({})", lang), "slug": "morning", "total": 2 }]
            }))
        }

        async fn dua(State(hits): State<Arc<AtomicU32>>) -> Json<Value> {
            hits.fetch_add(1, Ordering::SeqCst);
            Json(json!({
                "statusCode": 200,
                "data": {
                    "id": 1,
                    "title": "Upon waking",
                    "arabic": "الحمد لله الذي أحيانا",
                    "translation": "Praise be to Allah who gave us life"
                }
            }))
        }

        async fn azkar(State(hits): State<Arc<AtomicU32>>) -> Json<Value> {
            hits.fetch_add(1, Ordering::SeqCst);
            Json(json!({
                "أذكار الصباح": [
                    { "category": "أذكار الصباح", "count": "3", "description": "", "reference": "", "content": "سبحان الله" },
                    [{ "category": "أذكار الصباح", "count": "", "content": "الحمد لله" }]
                ],
                "أذكار المساء": [
                    { "category": "أذكار المساء", "count": 100, "content": "لا إله إلا الله" }
                ]
            }))
        }

        async fn broken() -> StatusCode {
            StatusCode::SERVICE_UNAVAILABLE
        }

        let app = Router::new()
            .route("/categories", get(categories))
            .route("/categories/morning/duas/1", get(dua))
            .route("/categories/broken/duas", get(broken))
            .route("/azkar.json", get(azkar))
            .with_state(Arc::clone(&hits));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}", addr), hits)
    }

    fn client(base: &str) -> ContentClient {
        ContentClient::new(
            base,
            format!("{}/azkar.json", base),
            Duration::from_secs(5),
            RetryPolicy::new(2).with_base_delay(Duration::from_millis(1)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_categories_are_cached_per_language() {
        let (base, hits) = serve_upstream().await;
        let content = client(&base);

        let en = content.categories(Language::En).await.unwrap();
        let again = content.categories(Language::En).await.unwrap();
        let id = content.categories(Language::Id).await.unwrap();

        assert_eq!(en, again);
        assert_eq!(en[0].title, "Morning (en)");
        assert_eq!(id[0].title, "Morning (id)");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_tag_refetches() {
        let (base, hits) = serve_upstream().await;
        let content = client(&base);

        content.categories(Language::En).await.unwrap();
        content.azkar().await.unwrap();

        assert_eq!(content.invalidate_tag(DUAS_CACHE_TAG).await, 1);
        content.categories(Language::En).await.unwrap();
        content.azkar().await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_invalidate_path_covers_all_languages() {
        let (base, _hits) = serve_upstream().await;
        let content = client(&base);

        content.categories(Language::En).await.unwrap();
        content.categories(Language::Id).await.unwrap();
        content.dua("morning", 1, Language::En).await.unwrap();

        assert_eq!(content.invalidate_path("/categories").await, 2);
        assert_eq!(content.invalidate_path("/unknown").await, 0);
    }

    #[tokio::test]
    async fn test_dua_detail() {
        let (base, _hits) = serve_upstream().await;
        let dua = client(&base).dua("morning", 1, Language::En).await.unwrap();

        assert_eq!(dua.id, 1);
        assert_eq!(dua.latin, None);
        assert!(dua.translation.unwrap().starts_with("Praise"));
    }

    #[tokio::test]
    async fn test_azkar_flattens_and_parses_counts() {
        let (base, _hits) = serve_upstream().await;
        let azkar = client(&base).azkar().await.unwrap();

        let morning = &azkar["أذكار الصباح"];
        assert_eq!(morning.len(), 2);
        assert_eq!(morning[0].count, 3);
        assert_eq!(morning[1].count, 1);
        assert_eq!(azkar["أذكار المساء"][0].count, 100);
    }

    #[tokio::test]
    async fn test_upstream_failure_is_transient_and_not_cached() {
        let (base, hits) = serve_upstream().await;
        let content = client(&base);

        let result = content.category_duas("broken", Language::En).await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(content.invalidate_tag(DUAS_CACHE_TAG).await, 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bad_slug_is_rejected_before_fetching() {
        let content = client("http://127.0.0.1:9");
        let result = content.category_duas("../admin", Language::En).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_language_parsing() {
        assert_eq!("EN".parse::<Language>().unwrap(), Language::En);
        assert_eq!("id".parse::<Language>().unwrap(), Language::Id);
        assert!("fr".parse::<Language>().is_err());
    }
}
