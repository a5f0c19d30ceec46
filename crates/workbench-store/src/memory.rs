//! In-process store.
//!
//! Same contract as the Postgres store. Used when no database is configured
//! and as the store double in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use workbench_core::{
    check_limit, AnalysisRun, AnalysisRunFilter, BalanceSnapshot, Bar, BarCoverage, ClosedDeal,
    NewAnalysisRun, NewStlRun, NewsArticle, NewsStats, SignalTrade, StlPoint, StlRun, Store,
    StoreError, StoreErrorKind, Timeframe,
};

type SeriesKey = (String, Timeframe);

#[derive(Default)]
struct State {
    bars: HashMap<SeriesKey, BTreeMap<DateTime<Utc>, Bar>>,
    stl_runs: BTreeMap<i64, StlRun>,
    stl_points: HashMap<i64, Vec<StlPoint>>,
    news: HashMap<(String, String), NewsArticle>,
    balances: Vec<BalanceSnapshot>,
    deals: HashMap<i64, BTreeMap<i64, ClosedDeal>>,
    prefs: HashMap<String, String>,
    signal_trades: Vec<(i64, SignalTrade)>,
    runs: Vec<AnalysisRun>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with a connection error until reset.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::new(StoreErrorKind::Connection, "store offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_bars(&self, rows: &[Bar]) -> Result<usize, StoreError> {
        self.check_online()?;
        let mut state = self.state.write().await;
        for bar in rows {
            state
                .bars
                .entry((bar.symbol.clone(), bar.timeframe))
                .or_default()
                .insert(bar.ts, bar.clone());
        }
        Ok(rows.len())
    }

    async fn fetch_bars(&self, symbol: &str, timeframe: Timeframe, limit: i64) -> Result<Vec<Bar>, StoreError> {
        self.check_online()?;
        check_limit(limit)?;
        let state = self.state.read().await;
        let Some(series) = state.bars.get(&(symbol.to_string(), timeframe)) else {
            return Ok(Vec::new());
        };
        let skip = series.len().saturating_sub(limit as usize);
        Ok(series.values().skip(skip).cloned().collect())
    }

    async fn fetch_bars_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, StoreError> {
        self.check_online()?;
        if end < start {
            return Ok(Vec::new());
        }
        let state = self.state.read().await;
        Ok(state
            .bars
            .get(&(symbol.to_string(), timeframe))
            .map(|series| series.range(start..=end).map(|(_, b)| b.clone()).collect())
            .unwrap_or_default())
    }

    async fn ohlc_range(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<BarCoverage>, StoreError> {
        self.check_online()?;
        let state = self.state.read().await;
        let Some(series) = state.bars.get(&(symbol.to_string(), timeframe)) else {
            return Ok(None);
        };
        match (series.keys().next(), series.keys().next_back()) {
            (Some(start), Some(end)) => Ok(Some(BarCoverage {
                start_ts: *start,
                end_ts: *end,
                rows_count: series.len() as i64,
            })),
            _ => Ok(None),
        }
    }

    async fn latest_bar_ts(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.ohlc_range(symbol, timeframe).await?.map(|c| c.end_ts))
    }

    async fn count_bars_after(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        after: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        self.check_online()?;
        let state = self.state.read().await;
        Ok(state
            .bars
            .get(&(symbol.to_string(), timeframe))
            .map(|series| series.keys().filter(|ts| **ts > after).count() as i64)
            .unwrap_or(0))
    }

    async fn create_stl_run(&self, run: &NewStlRun, points: &[StlPoint]) -> Result<StlRun, StoreError> {
        self.check_online()?;
        if run.period < 3 {
            return Err(StoreError::invalid_argument(format!(
                "period must be >= 3, got {}",
                run.period
            )));
        }
        let mut state = self.state.write().await;
        let id = state.next_id();
        let mut sorted = points.to_vec();
        sorted.sort_by_key(|p| p.ts);
        sorted.dedup_by_key(|p| p.ts);

        let stored = StlRun {
            id,
            symbol: run.symbol.clone(),
            timeframe: run.timeframe,
            period: run.period,
            start_ts: run.start_ts,
            end_ts: run.end_ts,
            rows_count: sorted.len() as i64,
            created_at: Utc::now(),
        };
        state.stl_runs.insert(id, stored.clone());
        state.stl_points.insert(id, sorted);
        Ok(stored)
    }

    async fn list_stl_runs(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<StlRun>, StoreError> {
        self.check_online()?;
        let state = self.state.read().await;
        let mut runs: Vec<StlRun> = state
            .stl_runs
            .values()
            .filter(|r| r.symbol == symbol && r.timeframe == timeframe)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(runs)
    }

    async fn get_stl_run(&self, id: i64) -> Result<Option<StlRun>, StoreError> {
        self.check_online()?;
        Ok(self.state.read().await.stl_runs.get(&id).cloned())
    }

    async fn fetch_stl_run_data(&self, id: i64) -> Result<Vec<StlPoint>, StoreError> {
        self.check_online()?;
        Ok(self
            .state
            .read()
            .await
            .stl_points
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_stl_run(&self, id: i64) -> Result<bool, StoreError> {
        self.check_online()?;
        let mut state = self.state.write().await;
        state.stl_points.remove(&id);
        Ok(state.stl_runs.remove(&id).is_some())
    }

    async fn upsert_news_articles(&self, rows: &[NewsArticle]) -> Result<usize, StoreError> {
        self.check_online()?;
        let mut state = self.state.write().await;
        for article in rows {
            let key = (article.symbol.clone(), article.url.clone());
            let created_at = state
                .news
                .get(&key)
                .map(|existing| existing.created_at)
                .unwrap_or(article.created_at);
            let mut article = article.clone();
            article.created_at = created_at;
            state.news.insert(key, article);
        }
        Ok(rows.len())
    }

    async fn fetch_news_db(
        &self,
        symbol: &str,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<NewsArticle>, StoreError> {
        self.check_online()?;
        check_limit(limit)?;
        let state = self.state.read().await;
        let mut rows: Vec<NewsArticle> = state
            .news
            .values()
            .filter(|a| a.symbol == symbol)
            .filter(|a| since.map_or(true, |s| a.effective_ts() >= s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.effective_ts().cmp(&a.effective_ts()));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn news_stats(&self, symbol: &str, baseline: Option<DateTime<Utc>>) -> Result<NewsStats, StoreError> {
        self.check_online()?;
        let state = self.state.read().await;
        let mut stats = NewsStats::default();
        for article in state.news.values().filter(|a| a.symbol == symbol) {
            let ts = article.effective_ts();
            stats.total += 1;
            stats.latest_at = stats.latest_at.max(Some(ts));
            if baseline.map_or(true, |b| ts > b) {
                stats.newer_than_baseline += 1;
            }
        }
        Ok(stats)
    }

    async fn latest_news_ts_for_urls(&self, symbol: &str, urls: &[String]) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.check_online()?;
        let state = self.state.read().await;
        Ok(state
            .news
            .values()
            .filter(|a| a.symbol == symbol && urls.contains(&a.url))
            .map(NewsArticle::effective_ts)
            .max())
    }

    async fn insert_balance_snapshot(&self, snapshot: &BalanceSnapshot) -> Result<(), StoreError> {
        self.check_online()?;
        let mut state = self.state.write().await;
        let exists = state.balances.iter().any(|b| {
            b.user == snapshot.user && b.account_id == snapshot.account_id && b.ts == snapshot.ts
        });
        if !exists {
            state.balances.push(snapshot.clone());
        }
        Ok(())
    }

    async fn list_balance_snapshots(
        &self,
        user: &str,
        account_id: Option<i64>,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<BalanceSnapshot>, StoreError> {
        self.check_online()?;
        check_limit(limit)?;
        let state = self.state.read().await;
        let mut rows: Vec<BalanceSnapshot> = state
            .balances
            .iter()
            .filter(|b| b.user == user)
            .filter(|b| account_id.map_or(true, |a| b.account_id == a))
            .filter(|b| since.map_or(true, |s| b.ts >= s))
            .cloned()
            .collect();
        rows.sort_by_key(|b| b.ts);
        let skip = rows.len().saturating_sub(limit as usize);
        Ok(rows.split_off(skip))
    }

    async fn latest_balance_at_or_before(
        &self,
        user: &str,
        account_id: i64,
        ts: DateTime<Utc>,
    ) -> Result<Option<BalanceSnapshot>, StoreError> {
        self.check_online()?;
        let state = self.state.read().await;
        Ok(state
            .balances
            .iter()
            .filter(|b| b.user == user && b.account_id == account_id && b.ts <= ts)
            .max_by_key(|b| b.ts)
            .cloned())
    }

    async fn upsert_closed_deals(&self, account_id: i64, rows: &[ClosedDeal]) -> Result<usize, StoreError> {
        self.check_online()?;
        let mut state = self.state.write().await;
        let deals = state.deals.entry(account_id).or_default();
        for deal in rows {
            deals.insert(deal.deal_id, deal.clone());
        }
        Ok(rows.len())
    }

    async fn list_closed_deals(
        &self,
        account_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ClosedDeal>, StoreError> {
        self.check_online()?;
        let state = self.state.read().await;
        let mut rows: Vec<ClosedDeal> = state
            .deals
            .get(&account_id)
            .map(|deals| {
                deals
                    .values()
                    .filter(|d| d.ts >= from && d.ts <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by(|a, b| a.ts.cmp(&b.ts).then(a.deal_id.cmp(&b.deal_id)));
        Ok(rows)
    }

    async fn set_prefs(&self, prefs: &HashMap<String, String>) -> Result<(), StoreError> {
        self.check_online()?;
        let mut state = self.state.write().await;
        for (k, v) in prefs {
            state.prefs.insert(k.clone(), v.clone());
        }
        Ok(())
    }

    async fn get_prefs(&self, keys: &[&str]) -> Result<HashMap<String, String>, StoreError> {
        self.check_online()?;
        let state = self.state.read().await;
        Ok(keys
            .iter()
            .filter_map(|k| state.prefs.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    async fn insert_signal_trade(&self, trade: &SignalTrade) -> Result<i64, StoreError> {
        self.check_online()?;
        let mut state = self.state.write().await;
        let id = state.next_id();
        state.signal_trades.push((id, trade.clone()));
        Ok(id)
    }

    async fn insert_health_run(&self, run: &NewAnalysisRun) -> Result<i64, StoreError> {
        self.check_online()?;
        let mut state = self.state.write().await;
        let id = state.next_id();
        state.runs.push(AnalysisRun {
            id,
            kind: run.kind,
            symbol: run.symbol.clone(),
            base_ccy: run.base_ccy.clone(),
            quote_ccy: run.quote_ccy.clone(),
            strategy: run.strategy.clone(),
            created_at: run.created_at.unwrap_or_else(Utc::now),
            news_ids: run.news_ids.clone(),
            answers_json: run.answers_json.clone(),
        });
        Ok(id)
    }

    async fn list_health_runs(
        &self,
        filter: &AnalysisRunFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AnalysisRun>, StoreError> {
        self.check_online()?;
        check_limit(limit)?;
        if offset < 0 {
            return Err(StoreError::invalid_argument("offset must be >= 0"));
        }
        let state = self.state.read().await;
        let mut runs: Vec<AnalysisRun> = state.runs.iter().filter(|r| filter.matches(r)).cloned().collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(runs
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }
}
