//! Persistence trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::error::StoreError;
use crate::types::{
    AnalysisRun, AnalysisRunFilter, BalanceSnapshot, Bar, BarCoverage, ClosedDeal, NewAnalysisRun,
    NewStlRun, NewsArticle, NewsStats, SignalTrade, StlPoint, StlRun, Timeframe,
};

/// Trait for the relational store that owns all persisted state.
///
/// Every write is transactional; a failed call leaves no partial rows behind.
#[async_trait]
pub trait Store: Send + Sync {
    // ----- bars -----

    /// Bulk upsert. On (symbol, timeframe, ts) conflict every non-key field
    /// is overwritten. Returns the number of rows submitted.
    async fn upsert_bars(&self, rows: &[Bar]) -> Result<usize, StoreError>;

    /// The last `limit` bars in ascending time. `limit < 1` is rejected.
    async fn fetch_bars(&self, symbol: &str, timeframe: Timeframe, limit: i64)
        -> Result<Vec<Bar>, StoreError>;

    /// Bars with `start <= ts <= end`, ascending.
    async fn fetch_bars_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, StoreError>;

    /// Extent of the stored series, `None` when empty.
    async fn ohlc_range(&self, symbol: &str, timeframe: Timeframe)
        -> Result<Option<BarCoverage>, StoreError>;

    /// Newest stored bar time.
    async fn latest_bar_ts(&self, symbol: &str, timeframe: Timeframe)
        -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Number of bars with `ts > after`.
    async fn count_bars_after(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        after: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    // ----- STL runs -----

    /// Create a run and insert its components in one transaction.
    async fn create_stl_run(&self, run: &NewStlRun, points: &[StlPoint]) -> Result<StlRun, StoreError>;

    /// Runs for a series, newest first.
    async fn list_stl_runs(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<StlRun>, StoreError>;

    async fn get_stl_run(&self, id: i64) -> Result<Option<StlRun>, StoreError>;

    /// Components of a run, ascending by ts.
    async fn fetch_stl_run_data(&self, id: i64) -> Result<Vec<StlPoint>, StoreError>;

    /// Delete a run and its components. Returns false when absent.
    async fn delete_stl_run(&self, id: i64) -> Result<bool, StoreError>;

    // ----- news -----

    /// Upsert on (symbol, url).
    async fn upsert_news_articles(&self, rows: &[NewsArticle]) -> Result<usize, StoreError>;

    /// Articles for a symbol, newest `COALESCE(published_at, created_at)` first.
    async fn fetch_news_db(
        &self,
        symbol: &str,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<NewsArticle>, StoreError>;

    /// Totals for a symbol and the count strictly newer than `baseline`.
    async fn news_stats(&self, symbol: &str, baseline: Option<DateTime<Utc>>)
        -> Result<NewsStats, StoreError>;

    /// `MAX(COALESCE(published_at, created_at))` over the given urls.
    async fn latest_news_ts_for_urls(&self, symbol: &str, urls: &[String])
        -> Result<Option<DateTime<Utc>>, StoreError>;

    // ----- balances -----

    async fn insert_balance_snapshot(&self, snapshot: &BalanceSnapshot) -> Result<(), StoreError>;

    /// Snapshots ascending by ts.
    async fn list_balance_snapshots(
        &self,
        user: &str,
        account_id: Option<i64>,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<BalanceSnapshot>, StoreError>;

    async fn latest_balance_at_or_before(
        &self,
        user: &str,
        account_id: i64,
        ts: DateTime<Utc>,
    ) -> Result<Option<BalanceSnapshot>, StoreError>;

    // ----- closed deals -----

    /// Upsert on (account_id, deal_id).
    async fn upsert_closed_deals(&self, account_id: i64, rows: &[ClosedDeal]) -> Result<usize, StoreError>;

    /// Deals with `from <= ts <= to`, ascending.
    async fn list_closed_deals(
        &self,
        account_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ClosedDeal>, StoreError>;

    // ----- preferences -----

    async fn set_prefs(&self, prefs: &HashMap<String, String>) -> Result<(), StoreError>;

    /// Values of the requested keys; absent keys are omitted.
    async fn get_prefs(&self, keys: &[&str]) -> Result<HashMap<String, String>, StoreError>;

    async fn set_pref(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut prefs = HashMap::new();
        prefs.insert(key.to_string(), value.to_string());
        self.set_prefs(&prefs).await
    }

    async fn get_pref(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut prefs = self.get_prefs(&[key]).await?;
        Ok(prefs.remove(key))
    }

    // ----- analysis runs / trade log -----

    async fn insert_signal_trade(&self, trade: &SignalTrade) -> Result<i64, StoreError>;

    async fn insert_health_run(&self, run: &NewAnalysisRun) -> Result<i64, StoreError>;

    /// Runs newest first.
    async fn list_health_runs(
        &self,
        filter: &AnalysisRunFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AnalysisRun>, StoreError>;
}

/// Reject non-positive row limits.
pub fn check_limit(limit: i64) -> Result<(), StoreError> {
    if limit < 1 {
        return Err(StoreError::invalid_argument(format!(
            "limit must be >= 1, got {}",
            limit
        )));
    }
    Ok(())
}
