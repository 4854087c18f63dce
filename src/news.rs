//! Third-party news feed, proxied read-only with a 10-minute cache so a
//! burst of page loads costs one upstream call.

use reqwest::Client;
use serde_json::Value;
use std::env;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const CACHE_TTL: Duration = Duration::from_secs(600);

#[derive(Debug)]
pub enum NewsError {
    NotConfigured,
    Upstream(String),
}

impl std::fmt::Display for NewsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NewsError::NotConfigured => write!(f, "news feed not configured"),
            NewsError::Upstream(msg) => write!(f, "upstream error: {}", msg),
        }
    }
}

struct CachedNews {
    fetched_at: Instant,
    body: Value,
}

pub struct NewsFeed {
    client: Client,
    url: Option<String>,
    api_key: Option<String>,
    cache: Mutex<Option<CachedNews>>,
}

impl NewsFeed {
    pub fn new(url: Option<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            url,
            api_key,
            cache: Mutex::new(None),
        }
    }

    pub fn from_env() -> Self {
        Self::new(env::var("NEWS_API_URL").ok(), env::var("NEWS_API_KEY").ok())
    }

    /// Current headlines, served from cache while it is fresh.
    pub async fn headlines(&self) -> Result<Value, NewsError> {
        {
            let cache = self.cache.lock().unwrap();
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < CACHE_TTL {
                    return Ok(cached.body.clone());
                }
            }
        }

        let url = self.url.as_ref().ok_or(NewsError::NotConfigured)?;

        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.header("x-rapidapi-key", key.as_str());
        }

        let body: Value = request
            .send()
            .await
            .map_err(|e| NewsError::Upstream(e.to_string()))?
            .json()
            .await
            .map_err(|e| NewsError::Upstream(e.to_string()))?;

        let mut cache = self.cache.lock().unwrap();
        *cache = Some(CachedNews {
            fetched_at: Instant::now(),
            body: body.clone(),
        });

        Ok(body)
    }
}
