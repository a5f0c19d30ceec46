//! Whether stored analysis runs are still current.
//!
//! A news-driven run goes stale once articles newer than the ones it used
//! arrive; a technical run goes stale once bars newer than its last bar are
//! stored.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use workbench_core::{
    classify_symbol, iso8601, AnalysisKind, AnalysisRun, AnalysisRunFilter, Store, Timeframe,
    WorkbenchResult, TECH_SNAPSHOT_STRATEGY,
};

const RUN_PAGE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessStatus {
    Fresh,
    Stale,
    Unknown,
}

impl FreshnessStatus {
    fn from_count(has_run: bool, count: i64) -> Self {
        match (has_run, count) {
            (_, c) if c > 0 => FreshnessStatus::Stale,
            (true, _) => FreshnessStatus::Fresh,
            (false, _) => FreshnessStatus::Unknown,
        }
    }
}

/// Where the baseline of a basic check came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineSource {
    Meta,
    NewsIds,
    CreatedAt,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewsFreshness {
    pub symbol: String,
    pub kind: AnalysisKind,
    pub status: FreshnessStatus,
    pub run_id: Option<i64>,
    pub strategy: Option<String>,
    pub run_created_at: Option<String>,
    pub baseline_ts: Option<String>,
    pub baseline_source: Option<BaselineSource>,
    pub latest_news_at: Option<String>,
    pub new_count: i64,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TechFreshness {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub status: FreshnessStatus,
    pub run_id: Option<i64>,
    pub strategy: Option<String>,
    pub baseline_ts: Option<String>,
    pub outdated_bars: Option<i64>,
}

pub struct FreshnessOracle {
    store: Arc<dyn Store>,
}

impl FreshnessOracle {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Newest run matching `filter` for which `pick` holds.
    async fn find_run(
        &self,
        filter: &AnalysisRunFilter,
        pick: impl Fn(&AnalysisRun) -> bool,
    ) -> WorkbenchResult<Option<AnalysisRun>> {
        let mut offset = 0;
        loop {
            let page = self.store.list_health_runs(filter, RUN_PAGE, offset).await?;
            if let Some(run) = page.iter().find(|r| pick(r)) {
                return Ok(Some(run.clone()));
            }
            if (page.len() as i64) < RUN_PAGE {
                return Ok(None);
            }
            offset += RUN_PAGE;
        }
    }

    async fn news_baseline(&self, run: &AnalysisRun) -> WorkbenchResult<(DateTime<Utc>, BaselineSource)> {
        if let Some(ts) = run.meta_ts("last_used_news_ts") {
            return Ok((ts, BaselineSource::Meta));
        }
        if !run.news_ids.is_empty() {
            if let Some(ts) = self
                .store
                .latest_news_ts_for_urls(&run.symbol, &run.news_ids)
                .await?
            {
                return Ok((ts, BaselineSource::NewsIds));
            }
        }
        Ok((run.created_at, BaselineSource::CreatedAt))
    }

    /// Freshness of the newest news-driven run for `symbol`.
    pub async fn basic(&self, symbol: &str, strategy: Option<&str>) -> WorkbenchResult<NewsFreshness> {
        let class = classify_symbol(symbol);
        let filter = AnalysisRunFilter {
            kind: Some(class.kind),
            symbol: Some(class.symbol.clone()),
            base: class.base.clone(),
            quote: class.quote.clone(),
            strategy: strategy.map(str::to_string),
        };
        let run = self.find_run(&filter, |r| !r.is_tech()).await?;

        let baseline = match &run {
            Some(run) => Some(self.news_baseline(run).await?),
            None => None,
        };
        let stats = self
            .store
            .news_stats(&class.symbol, baseline.map(|(ts, _)| ts))
            .await?;
        let status = FreshnessStatus::from_count(run.is_some(), stats.newer_than_baseline);
        debug!(symbol = %class.symbol, ?status, new_count = stats.newer_than_baseline, "Basic freshness");

        Ok(NewsFreshness {
            symbol: class.symbol,
            kind: class.kind,
            status,
            run_id: run.as_ref().map(|r| r.id),
            strategy: run.as_ref().map(|r| r.strategy.clone()),
            run_created_at: run.as_ref().map(|r| iso8601(r.created_at)),
            baseline_ts: baseline.map(|(ts, _)| iso8601(ts)),
            baseline_source: baseline.map(|(_, source)| source),
            latest_news_at: stats.latest_at.map(iso8601),
            new_count: stats.newer_than_baseline,
            total: stats.total,
        })
    }

    /// Freshness of the newest technical run for a series.
    pub async fn technical(&self, symbol: &str, timeframe: Timeframe) -> WorkbenchResult<TechFreshness> {
        let class = classify_symbol(symbol);
        let filter = AnalysisRunFilter {
            kind: Some(class.kind),
            symbol: Some(class.symbol.clone()),
            base: class.base.clone(),
            quote: class.quote.clone(),
            strategy: None,
        };
        let snapshot = self
            .find_run(&filter, |r| {
                r.strategy == TECH_SNAPSHOT_STRATEGY
                    && r.meta_str("timeframe")
                        .is_some_and(|tf| tf.eq_ignore_ascii_case(timeframe.as_str()))
            })
            .await?;
        let run = match snapshot {
            Some(run) => Some(run),
            None => self.find_run(&filter, AnalysisRun::is_tech).await?,
        };

        let Some(run) = run else {
            return Ok(TechFreshness {
                symbol: class.symbol,
                timeframe,
                status: FreshnessStatus::Unknown,
                run_id: None,
                strategy: None,
                baseline_ts: None,
                outdated_bars: None,
            });
        };

        let baseline = run.meta_ts("last_bar_ts").unwrap_or(run.created_at);
        let outdated = self
            .store
            .count_bars_after(&class.symbol, timeframe, baseline)
            .await?;
        Ok(TechFreshness {
            symbol: class.symbol,
            timeframe,
            status: FreshnessStatus::from_count(true, outdated),
            run_id: Some(run.id),
            strategy: Some(run.strategy),
            baseline_ts: Some(iso8601(baseline)),
            outdated_bars: Some(outdated),
        })
    }
}
