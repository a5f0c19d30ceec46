//! News feed adapters.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use workbench_config::NewsSettings;
use workbench_core::{parse_utc, NewsArticle, WorkbenchError, WorkbenchResult};

/// One item of the feed. `symbols` tags general items; symbol-specific
/// requests may leave it empty.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedItem {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub symbols: Vec<String>,
}

impl FeedItem {
    /// Articles for every tagged symbol that is in `wanted`, or for
    /// `fallback` when the item is untagged.
    pub fn into_articles(self, wanted: &[String], fallback: Option<&str>) -> Vec<NewsArticle> {
        let published_at = self.published_at.as_deref().and_then(parse_utc);
        let created_at = Utc::now();
        let mut symbols: Vec<String> = Vec::new();
        for tag in &self.symbols {
            let tag = tag.trim().to_uppercase();
            if wanted.contains(&tag) && !symbols.contains(&tag) {
                symbols.push(tag);
            }
        }
        if symbols.is_empty() {
            if let Some(fallback) = fallback {
                symbols.push(fallback.to_uppercase());
            }
        }

        symbols
            .into_iter()
            .map(|symbol| NewsArticle {
                symbol,
                url: self.url.clone(),
                title: self.title.clone(),
                source: self.source.clone(),
                published_at,
                body: self.body.clone(),
                created_at,
            })
            .collect()
    }
}

/// Source of news pages.
#[async_trait]
pub trait NewsSource: Send + Sync {
    /// One page of items, newest first. `symbol` narrows to one ticker.
    async fn fetch_page(
        &self,
        symbol: Option<&str>,
        page: usize,
        page_size: usize,
    ) -> WorkbenchResult<Vec<FeedItem>>;

    fn is_enabled(&self) -> bool {
        true
    }

    fn name(&self) -> &str;
}

/// Feed served as a JSON array over HTTP.
pub struct HttpNewsSource {
    client: reqwest::Client,
    feed_url: String,
}

impl HttpNewsSource {
    pub fn new(feed_url: impl Into<String>, timeout: Duration) -> WorkbenchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WorkbenchError::Internal(format!("news client: {}", e)))?;
        Ok(Self {
            client,
            feed_url: feed_url.into(),
        })
    }
}

#[async_trait]
impl NewsSource for HttpNewsSource {
    async fn fetch_page(
        &self,
        symbol: Option<&str>,
        page: usize,
        page_size: usize,
    ) -> WorkbenchResult<Vec<FeedItem>> {
        let mut query = vec![
            ("page", page.to_string()),
            ("page_size", page_size.to_string()),
        ];
        if let Some(symbol) = symbol {
            query.push(("symbol", symbol.to_string()));
        }

        let response = self
            .client
            .get(&self.feed_url)
            .query(&query)
            .send()
            .await
            .map_err(|e| WorkbenchError::Upstream(format!("news feed request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(WorkbenchError::Upstream(format!(
                "news feed returned {}",
                response.status()
            )));
        }

        let rows: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| WorkbenchError::Upstream(format!("news feed body: {}", e)))?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_value::<FeedItem>(row) {
                Ok(item) if !item.url.is_empty() => items.push(item),
                Ok(_) => debug!("Skipping news item without url"),
                Err(e) => warn!(error = %e, "Skipping malformed news item"),
            }
        }
        Ok(items)
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Stand-in when no feed is configured.
pub struct DisabledNewsSource;

#[async_trait]
impl NewsSource for DisabledNewsSource {
    async fn fetch_page(
        &self,
        _symbol: Option<&str>,
        _page: usize,
        _page_size: usize,
    ) -> WorkbenchResult<Vec<FeedItem>> {
        Ok(Vec::new())
    }

    fn is_enabled(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "disabled"
    }
}

/// Build the news source described by the settings.
pub fn news_source(settings: &NewsSettings) -> WorkbenchResult<std::sync::Arc<dyn NewsSource>> {
    match settings.feed_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        Some(url) => Ok(std::sync::Arc::new(HttpNewsSource::new(
            url,
            Duration::from_secs(settings.timeout_secs.max(1)),
        )?)),
        None => Ok(std::sync::Arc::new(DisabledNewsSource)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(symbols: &[&str]) -> FeedItem {
        FeedItem {
            url: "https://news.example/a".into(),
            title: "Gold rallies".into(),
            source: Some("wire".into()),
            published_at: Some("2025-01-02T03:04:05Z".into()),
            body: None,
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_fan_out_to_wanted_symbols() {
        let wanted = vec!["XAUUSD".to_string(), "EURUSD".to_string()];
        let articles = item(&["xauusd", "AAPL", "EURUSD"]).into_articles(&wanted, None);
        let symbols: Vec<&str> = articles.iter().map(|a| a.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["XAUUSD", "EURUSD"]);
        assert_eq!(
            articles[0].published_at,
            Some(Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap())
        );
    }

    #[test]
    fn test_untagged_item_uses_fallback() {
        let articles = item(&[]).into_articles(&[], Some("aapl"));
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].symbol, "AAPL");
        assert!(item(&[]).into_articles(&[], None).is_empty());
    }

    #[test]
    fn test_feed_item_lenient_fields() {
        let parsed: FeedItem =
            serde_json::from_str(r#"{"url":"u","title":"t","published_at":"not a date"}"#).unwrap();
        let articles = parsed.into_articles(&[], Some("EURUSD"));
        assert_eq!(articles[0].published_at, None);
    }

    #[tokio::test]
    async fn test_disabled_source() {
        let source = DisabledNewsSource;
        assert!(!source.is_enabled());
        assert!(source.fetch_page(None, 0, 200).await.unwrap().is_empty());
    }
}
