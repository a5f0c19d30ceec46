//! News articles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A news item attached to a symbol. Identified by (symbol, url).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsArticle {
    pub symbol: String,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub body: Option<String>,
    /// Ingestion time; stands in for `published_at` when that is missing
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl NewsArticle {
    /// `COALESCE(published_at, created_at)`.
    pub fn effective_ts(&self) -> DateTime<Utc> {
        self.published_at.unwrap_or(self.created_at)
    }
}

/// Aggregate view of a symbol's stored news relative to a baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NewsStats {
    pub total: i64,
    pub latest_at: Option<DateTime<Utc>>,
    /// Articles strictly newer than the baseline (equals `total` without one)
    pub newer_than_baseline: i64,
}
