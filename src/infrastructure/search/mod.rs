//! Web-search client with rotating API keys.
//!
//! Multiple providers can be configured at once; each provider carries a
//! pool of keys that rotates on every call so no single key burns its
//! quota first. A provider that fails is skipped for the rest of the
//! batch; search failures never fail the pipeline.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::domain::analysis::NewsItem;
use crate::domain::ports::SearchService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provider {
    Bocha,
    Tavily,
    Brave,
    SerpApi,
}

struct KeyPool {
    provider: Provider,
    keys: Vec<String>,
    cursor: AtomicUsize,
}

impl KeyPool {
    fn next_key(&self) -> &str {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.keys.len();
        &self.keys[i]
    }
}

pub struct RotatingSearchService {
    client: reqwest::Client,
    pools: Vec<KeyPool>,
}

impl RotatingSearchService {
    pub fn from_config(config: &Config) -> Self {
        let mut pools = Vec::new();
        for (provider, keys) in [
            (Provider::Bocha, &config.bocha_api_keys),
            (Provider::Tavily, &config.tavily_api_keys),
            (Provider::Brave, &config.brave_api_keys),
            (Provider::SerpApi, &config.serpapi_keys),
        ] {
            if !keys.is_empty() {
                pools.push(KeyPool {
                    provider,
                    keys: keys.clone(),
                    cursor: AtomicUsize::new(0),
                });
            }
        }

        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(20))
                .build()
                .unwrap_or_default(),
            pools,
        }
    }

    async fn search_with(
        &self,
        pool: &KeyPool,
        query: &str,
        limit: usize,
    ) -> Result<Vec<NewsItem>> {
        let key = pool.next_key();
        match pool.provider {
            Provider::Bocha => {
                let resp = self
                    .client
                    .post("https://api.bochaai.com/v1/web-search")
                    .bearer_auth(key)
                    .json(&json!({ "query": query, "count": limit, "summary": true }))
                    .send()
                    .await
                    .context("bocha request failed")?;
                if !resp.status().is_success() {
                    bail!("bocha returned HTTP {}", resp.status());
                }
                let body: serde_json::Value = resp.json().await?;
                let items = body["data"]["webPages"]["value"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default();
                Ok(items
                    .iter()
                    .filter_map(|v| {
                        Some(NewsItem {
                            title: v["name"].as_str()?.to_string(),
                            url: v["url"].as_str().unwrap_or_default().to_string(),
                            snippet: v["snippet"].as_str().unwrap_or_default().to_string(),
                        })
                    })
                    .take(limit)
                    .collect())
            }
            Provider::Tavily => {
                let resp = self
                    .client
                    .post("https://api.tavily.com/search")
                    .json(&json!({
                        "api_key": key,
                        "query": query,
                        "max_results": limit,
                        "search_depth": "basic",
                    }))
                    .send()
                    .await
                    .context("tavily request failed")?;
                if !resp.status().is_success() {
                    bail!("tavily returned HTTP {}", resp.status());
                }
                let body: serde_json::Value = resp.json().await?;
                let items = body["results"].as_array().cloned().unwrap_or_default();
                Ok(items
                    .iter()
                    .filter_map(|v| {
                        Some(NewsItem {
                            title: v["title"].as_str()?.to_string(),
                            url: v["url"].as_str().unwrap_or_default().to_string(),
                            snippet: v["content"].as_str().unwrap_or_default().to_string(),
                        })
                    })
                    .take(limit)
                    .collect())
            }
            Provider::Brave => {
                let count = limit.to_string();
                let resp = self
                    .client
                    .get("https://api.search.brave.com/res/v1/web/search")
                    .header("X-Subscription-Token", key)
                    .query(&[("q", query), ("count", count.as_str())])
                    .send()
                    .await
                    .context("brave request failed")?;
                if !resp.status().is_success() {
                    bail!("brave returned HTTP {}", resp.status());
                }
                let body: serde_json::Value = resp.json().await?;
                let items = body["web"]["results"].as_array().cloned().unwrap_or_default();
                Ok(items
                    .iter()
                    .filter_map(|v| {
                        Some(NewsItem {
                            title: v["title"].as_str()?.to_string(),
                            url: v["url"].as_str().unwrap_or_default().to_string(),
                            snippet: v["description"].as_str().unwrap_or_default().to_string(),
                        })
                    })
                    .take(limit)
                    .collect())
            }
            Provider::SerpApi => {
                let num = limit.to_string();
                let resp = self
                    .client
                    .get("https://serpapi.com/search.json")
                    .query(&[("q", query), ("api_key", key), ("num", num.as_str())])
                    .send()
                    .await
                    .context("serpapi request failed")?;
                if !resp.status().is_success() {
                    bail!("serpapi returned HTTP {}", resp.status());
                }
                let body: serde_json::Value = resp.json().await?;
                let items = body["organic_results"].as_array().cloned().unwrap_or_default();
                Ok(items
                    .iter()
                    .filter_map(|v| {
                        Some(NewsItem {
                            title: v["title"].as_str()?.to_string(),
                            url: v["link"].as_str().unwrap_or_default().to_string(),
                            snippet: v["snippet"].as_str().unwrap_or_default().to_string(),
                        })
                    })
                    .take(limit)
                    .collect())
            }
        }
    }
}

#[async_trait]
impl SearchService for RotatingSearchService {
    fn is_available(&self) -> bool {
        !self.pools.is_empty()
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<NewsItem>> {
        for pool in &self.pools {
            match self.search_with(pool, query, limit).await {
                Ok(items) if !items.is_empty() => {
                    debug!("search: {:?} returned {} items", pool.provider, items.len());
                    return Ok(items);
                }
                Ok(_) => debug!("search: {:?} returned nothing", pool.provider),
                Err(e) => warn!("search: {:?} failed: {}", pool.provider, e),
            }
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_rotation_cycles_through_pool() {
        let pool = KeyPool {
            provider: Provider::Tavily,
            keys: vec!["a".into(), "b".into(), "c".into()],
            cursor: AtomicUsize::new(0),
        };
        let drawn: Vec<&str> = (0..6).map(|_| pool.next_key()).collect();
        assert_eq!(drawn, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn no_keys_means_unavailable() {
        let service = RotatingSearchService {
            client: reqwest::Client::new(),
            pools: Vec::new(),
        };
        assert!(!service.is_available());
    }
}
