//! Bar ingestion: broker to store, with progress events.

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use workbench_analytics::aggregate_yearly;
use workbench_core::prefs::{PREF_LAST_COUNT, PREF_LAST_SYMBOL, PREF_LAST_TF};
use workbench_core::{Bar, Timeframe, WorkbenchError, WorkbenchResult};
use workbench_monitor::{Event, FetchEvent, FetchStatus};

use crate::context::Context;

/// Pause between consecutive tasks of a bulk or backfill run.
pub const BULK_GAP: Duration = Duration::from_millis(100);

/// Monthly lookback behind the newest stored yearly bar on `inc`.
const YEARLY_INC_LOOKBACK_DAYS: i64 = 370;
const YEARLY_MIN_MONTHS: usize = 120;
const YEARLY_MAX_MONTHS: usize = 1200;

pub const DEFAULT_FETCH_COUNT: usize = 500;

/// How a fetch decides which bars to pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// Bars newer than the newest stored one, `Full` when nothing is stored
    #[default]
    Inc,
    /// The last `count` bars
    Full,
    /// The default backfill window, always in the background
    FullAsync,
}

impl FetchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMode::Inc => "inc",
            FetchMode::Full => "full",
            FetchMode::FullAsync => "full_async",
        }
    }
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FetchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "inc" | "incremental" => Ok(FetchMode::Inc),
            "full" => Ok(FetchMode::Full),
            "full_async" => Ok(FetchMode::FullAsync),
            _ => Err(format!("Invalid fetch mode: {}", s)),
        }
    }
}

/// Task set of a bulk fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkScope {
    SymbolTf,
    SymbolAllTf,
    AllSymbols,
}

impl BulkScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkScope::SymbolTf => "symbol_tf",
            BulkScope::SymbolAllTf => "symbol_all_tf",
            BulkScope::AllSymbols => "all_symbols",
        }
    }
}

impl FromStr for BulkScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "symbol_tf" => Ok(BulkScope::SymbolTf),
            "symbol_all_tf" => Ok(BulkScope::SymbolAllTf),
            "all_symbols" => Ok(BulkScope::AllSymbols),
            _ => Err(format!("Invalid bulk scope: {}", s)),
        }
    }
}

/// One fetch of one (symbol, timeframe).
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub count: usize,
    pub mode: FetchMode,
    /// Run `inc`/`full` in the background and answer at once
    pub deferred: bool,
    /// Remember the selection in preferences
    pub persist: bool,
    /// Label carried by emitted events
    pub scope: String,
    pub background: bool,
}

impl FetchRequest {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            count: DEFAULT_FETCH_COUNT,
            mode: FetchMode::Inc,
            deferred: false,
            persist: false,
            scope: "single".to_string(),
            background: false,
        }
    }

    pub fn with_mode(mut self, mode: FetchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn in_background(mut self) -> Self {
        self.background = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchOutcome {
    pub ok: bool,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub mode: FetchMode,
    pub fetch_mode: Option<&'static str>,
    pub inserted: usize,
    pub fetched: usize,
    pub scheduled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BulkRequest {
    pub scope: BulkScope,
    pub symbols: Vec<String>,
    pub timeframes: Vec<Timeframe>,
    pub mode: FetchMode,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkOutcome {
    pub ok: bool,
    pub scheduled: bool,
    pub jobs: usize,
}

/// Expand a bulk request into (symbol, timeframe) tasks.
///
/// `symbol_tf` defaults its timeframes to H1; `all_symbols` takes the
/// configured symbols unless some are given, and every timeframe unless
/// some are given.
pub fn expand_bulk(req: &BulkRequest, configured: &[String]) -> WorkbenchResult<Vec<(String, Timeframe)>> {
    let symbols: Vec<String> = match req.scope {
        BulkScope::AllSymbols if req.symbols.is_empty() => configured.to_vec(),
        _ => req.symbols.clone(),
    };
    let timeframes: Vec<Timeframe> = match req.scope {
        BulkScope::SymbolAllTf => Timeframe::all().to_vec(),
        BulkScope::SymbolTf if req.timeframes.is_empty() => vec![Timeframe::H1],
        BulkScope::AllSymbols if req.timeframes.is_empty() => Timeframe::all().to_vec(),
        _ => req.timeframes.clone(),
    };

    let mut tasks = Vec::with_capacity(symbols.len() * timeframes.len());
    for symbol in &symbols {
        for tf in &timeframes {
            let task = (symbol.to_uppercase(), *tf);
            if !tasks.contains(&task) {
                tasks.push(task);
            }
        }
    }
    if tasks.is_empty() {
        return Err(WorkbenchError::InvalidArgument(format!(
            "bulk fetch scope {} expands to no tasks",
            req.scope.as_str()
        )));
    }
    Ok(tasks)
}

fn yearly_months(count: usize) -> usize {
    count
        .saturating_mul(12)
        .max(YEARLY_MIN_MONTHS)
        .min(YEARLY_MAX_MONTHS)
}

/// Pulls bars from the broker into the store.
#[derive(Clone)]
pub struct Ingestor {
    ctx: Context,
}

impl Ingestor {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Interactive entry point.
    ///
    /// `full_async` and deferred requests are answered with `scheduled` and
    /// run in the background; everything else runs inline.
    pub async fn fetch(&self, req: FetchRequest) -> WorkbenchResult<FetchOutcome> {
        let defer = req.mode == FetchMode::FullAsync || (req.deferred && !req.background);
        if !defer {
            return self.run(req).await;
        }

        self.emit(&req, None, 0, 0, FetchStatus::Scheduled, None);
        let outcome = FetchOutcome {
            ok: true,
            symbol: req.symbol.clone(),
            timeframe: req.timeframe,
            mode: req.mode,
            fetch_mode: None,
            inserted: 0,
            fetched: 0,
            scheduled: true,
        };

        let job = FetchRequest {
            deferred: false,
            background: true,
            ..req
        };
        let name = format!("fetch:{}:{}", job.symbol, job.timeframe);
        let this = self.clone();
        self.ctx
            .scheduler
            .spawn_callback(name, async move { this.run(job).await.map(|_| ()) });
        Ok(outcome)
    }

    /// Execute a fetch now, upsert, and report.
    pub async fn run(&self, req: FetchRequest) -> WorkbenchResult<FetchOutcome> {
        if req.persist {
            if let Err(e) = self.persist_selection(&req).await {
                warn!(symbol = %req.symbol, error = %e, "Failed to persist selection");
            }
        }

        let result = async {
            let (bars, fetch_mode) = self.execute(&req).await?;
            let inserted = if bars.is_empty() {
                0
            } else {
                self.ctx.store.upsert_bars(&bars).await?
            };
            Ok::<_, WorkbenchError>((fetch_mode, bars.len(), inserted))
        }
        .await;

        match result {
            Ok((fetch_mode, fetched, inserted)) => {
                let status = if req.background {
                    FetchStatus::Completed
                } else {
                    FetchStatus::Ok
                };
                info!(
                    symbol = %req.symbol,
                    timeframe = %req.timeframe,
                    mode = req.mode.as_str(),
                    fetch_mode,
                    fetched,
                    inserted,
                    "Fetch complete"
                );
                self.emit(&req, Some(fetch_mode), fetched, inserted, status, None);

                if req.mode == FetchMode::Inc && !req.background {
                    self.schedule_symbol_backfill(&req.symbol);
                }

                Ok(FetchOutcome {
                    ok: true,
                    symbol: req.symbol.clone(),
                    timeframe: req.timeframe,
                    mode: req.mode,
                    fetch_mode: Some(fetch_mode),
                    inserted,
                    fetched,
                    scheduled: false,
                })
            }
            Err(e) => {
                warn!(symbol = %req.symbol, timeframe = %req.timeframe, error = %e, "Fetch failed");
                self.emit(&req, None, 0, 0, FetchStatus::Error, Some(e.to_string()));
                Err(e)
            }
        }
    }

    async fn persist_selection(&self, req: &FetchRequest) -> WorkbenchResult<()> {
        let prefs: HashMap<String, String> = [
            (PREF_LAST_SYMBOL, req.symbol.clone()),
            (PREF_LAST_TF, req.timeframe.to_string()),
            (PREF_LAST_COUNT, req.count.to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        self.ctx.store.set_prefs(&prefs).await?;
        Ok(())
    }

    /// Pull bars for a request. Returns the bars and the mode actually used.
    async fn execute(&self, req: &FetchRequest) -> WorkbenchResult<(Vec<Bar>, &'static str)> {
        if req.timeframe.is_derived() {
            let bars = self.derive_yearly(&req.symbol, req.count, req.mode).await?;
            return Ok((bars, "derived_yearly"));
        }

        let broker = &self.ctx.broker;
        let (symbol, tf) = (req.symbol.as_str(), req.timeframe);
        match req.mode {
            FetchMode::Full => Ok((broker.fetch_bars(symbol, tf, req.count).await?, "full")),
            FetchMode::FullAsync => {
                let since = Utc::now() - ChronoDuration::days(tf.default_backfill_days());
                Ok((broker.fetch_bars_since(symbol, tf, since).await?, "since"))
            }
            FetchMode::Inc => match self.ctx.store.latest_bar_ts(symbol, tf).await? {
                None => Ok((broker.fetch_bars(symbol, tf, req.count).await?, "full")),
                Some(latest) => match broker.fetch_bars_since(symbol, tf, latest).await {
                    Ok(bars) => Ok((bars, "inc")),
                    Err(e) => {
                        warn!(symbol, timeframe = %tf, error = %e, "Incremental fetch failed, falling back to full");
                        Ok((broker.fetch_bars(symbol, tf, req.count).await?, "full"))
                    }
                },
            },
        }
    }

    /// Yearly bars aggregated from monthly ones.
    async fn derive_yearly(&self, symbol: &str, count: usize, mode: FetchMode) -> WorkbenchResult<Vec<Bar>> {
        let broker = &self.ctx.broker;
        let months = yearly_months(count);

        let monthly = match mode {
            FetchMode::FullAsync => {
                let since = Utc::now() - ChronoDuration::days(Timeframe::Y1.default_backfill_days());
                broker.fetch_bars_since(symbol, Timeframe::MN1, since).await?
            }
            FetchMode::Full => broker.fetch_bars(symbol, Timeframe::MN1, months).await?,
            FetchMode::Inc => match self.ctx.store.latest_bar_ts(symbol, Timeframe::Y1).await? {
                None => broker.fetch_bars(symbol, Timeframe::MN1, months).await?,
                Some(latest) => {
                    let since = latest - ChronoDuration::days(YEARLY_INC_LOOKBACK_DAYS);
                    match broker.fetch_bars_since(symbol, Timeframe::MN1, since).await {
                        Ok(bars) => bars,
                        Err(e) => {
                            warn!(symbol, error = %e, "Monthly since fetch failed, falling back to count");
                            broker.fetch_bars(symbol, Timeframe::MN1, months).await?
                        }
                    }
                }
            },
        };

        let keep = match mode {
            FetchMode::FullAsync => None,
            _ => Some(count),
        };
        let yearly = aggregate_yearly(&monthly, keep);
        debug!(symbol, months = monthly.len(), years = yearly.len(), "Derived yearly bars");
        Ok(yearly)
    }

    fn emit(
        &self,
        req: &FetchRequest,
        fetch_mode: Option<&str>,
        fetched: usize,
        inserted: usize,
        status: FetchStatus,
        error: Option<String>,
    ) {
        self.ctx.bus.broadcast(Event::FetchComplete(FetchEvent {
            symbol: req.symbol.clone(),
            timeframe: req.timeframe,
            mode: req.mode.as_str().to_string(),
            fetch_mode: fetch_mode.map(str::to_string),
            inserted,
            fetched,
            scope: req.scope.clone(),
            background: req.background,
            status,
            note: None,
            error,
        }));
    }

    pub fn schedule_symbol_backfill(&self, symbol: &str) -> JoinHandle<()> {
        let this = self.clone();
        let symbol = symbol.to_string();
        self.ctx
            .scheduler
            .spawn_callback(format!("symbol_backfill:{}", symbol), async move {
                this.symbol_backfill(&symbol).await;
                Ok(())
            })
    }

    /// Pull the default window of every timeframe of `symbol`. Returns the
    /// number of timeframes that succeeded.
    pub async fn symbol_backfill(&self, symbol: &str) -> usize {
        let mut ok = 0;
        for (i, tf) in Timeframe::all().iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(BULK_GAP).await;
            }
            let req = FetchRequest::new(symbol, *tf)
                .with_mode(FetchMode::FullAsync)
                .with_scope("symbol_backfill")
                .in_background();
            if self.run(req).await.is_ok() {
                ok += 1;
            }
        }
        info!(symbol, ok, total = Timeframe::all().len(), "Symbol backfill finished");
        ok
    }

    /// Schedule a bulk fetch. Fails when the scope expands to nothing.
    pub fn bulk(&self, req: BulkRequest) -> WorkbenchResult<BulkOutcome> {
        let tasks = expand_bulk(&req, &self.ctx.settings.symbols)?;
        let jobs = tasks.len();
        let this = self.clone();
        self.ctx.scheduler.spawn_callback("fetch_bulk", async move {
            this.run_bulk(&tasks, req.mode, req.count, req.scope).await;
            Ok(())
        });
        Ok(BulkOutcome {
            ok: true,
            scheduled: true,
            jobs,
        })
    }

    /// Run tasks one after another. Failures are reported and skipped.
    pub async fn run_bulk(
        &self,
        tasks: &[(String, Timeframe)],
        mode: FetchMode,
        count: usize,
        scope: BulkScope,
    ) -> usize {
        let mut ok = 0;
        for (i, (symbol, tf)) in tasks.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(BULK_GAP).await;
            }
            let req = FetchRequest::new(symbol.clone(), *tf)
                .with_mode(mode)
                .with_count(count)
                .with_scope(scope.as_str())
                .in_background();
            if self.run(req).await.is_ok() {
                ok += 1;
            }
        }
        info!(scope = scope.as_str(), ok, total = tasks.len(), "Bulk fetch finished");
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, monthly_bars, next_event};
    use chrono::{Datelike, TimeZone};
    use std::sync::Arc;
    use workbench_broker::SimBroker;
    use workbench_core::Store;
    use workbench_store::MemoryStore;

    #[test]
    fn test_mode_and_scope_parse() {
        assert_eq!("INC".parse::<FetchMode>().unwrap(), FetchMode::Inc);
        assert_eq!("full_async".parse::<FetchMode>().unwrap(), FetchMode::FullAsync);
        assert!("later".parse::<FetchMode>().is_err());
        assert_eq!("symbol_all_tf".parse::<BulkScope>().unwrap(), BulkScope::SymbolAllTf);
        assert!("everything".parse::<BulkScope>().is_err());
    }

    #[test]
    fn test_expand_bulk() {
        let configured = vec!["XAUUSD".to_string(), "EURUSD".to_string()];
        let req = BulkRequest {
            scope: BulkScope::SymbolTf,
            symbols: vec!["eurusd".into()],
            timeframes: vec![],
            mode: FetchMode::Inc,
            count: 500,
        };
        assert_eq!(
            expand_bulk(&req, &configured).unwrap(),
            vec![("EURUSD".to_string(), Timeframe::H1)]
        );

        let all = BulkRequest {
            scope: BulkScope::AllSymbols,
            symbols: vec![],
            timeframes: vec![Timeframe::D1, Timeframe::H4],
            ..req.clone()
        };
        assert_eq!(expand_bulk(&all, &configured).unwrap().len(), 4);

        let per_symbol = BulkRequest {
            scope: BulkScope::SymbolAllTf,
            ..req.clone()
        };
        assert_eq!(expand_bulk(&per_symbol, &configured).unwrap().len(), Timeframe::all().len());

        let empty = BulkRequest {
            symbols: vec![],
            ..req
        };
        assert!(matches!(
            expand_bulk(&empty, &configured),
            Err(WorkbenchError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_yearly_months() {
        assert_eq!(yearly_months(2), 120);
        assert_eq!(yearly_months(20), 240);
        assert_eq!(yearly_months(500), 1200);
    }

    #[tokio::test]
    async fn test_inc_on_empty_store_runs_full() {
        let sim = Arc::new(SimBroker::new());
        let store = Arc::new(MemoryStore::new());
        let ctx = context(sim.clone(), store.clone());
        let mut sub = ctx.bus.subscribe(None);

        let req = FetchRequest::new("EURUSD", Timeframe::H1).with_count(500);
        let outcome = ctx.ingestor().fetch(req).await.unwrap();
        assert_eq!(outcome.fetch_mode, Some("full"));
        assert_eq!(outcome.inserted, 500);
        assert_eq!(store.fetch_bars("EURUSD", Timeframe::H1, 1000).await.unwrap().len(), 500);

        match next_event(&mut sub).await {
            Event::FetchComplete(e) => {
                assert_eq!(e.status, FetchStatus::Ok);
                assert_eq!(e.inserted, 500);
                assert_eq!(e.fetch_mode.as_deref(), Some("full"));
            }
            other => panic!("unexpected {:?}", other),
        }
        // the chained backfill starts with the shortest timeframe
        match next_event(&mut sub).await {
            Event::FetchComplete(e) => {
                assert_eq!(e.scope, "symbol_backfill");
                assert_eq!(e.timeframe, Timeframe::M1);
                assert!(e.background);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_inc_with_stored_bars_and_fallback() {
        let sim = Arc::new(SimBroker::new());
        let store = Arc::new(MemoryStore::new());
        let ctx = context(sim.clone(), store.clone());
        let ingestor = ctx.ingestor();

        let full = FetchRequest::new("XAUUSD", Timeframe::H1)
            .with_mode(FetchMode::Full)
            .with_count(50);
        ingestor.fetch(full).await.unwrap();

        let inc = FetchRequest::new("XAUUSD", Timeframe::H1).in_background();
        let outcome = ingestor.fetch(inc.clone()).await.unwrap();
        assert_eq!(outcome.fetch_mode, Some("inc"));
        assert!(sim.calls().iter().any(|c| c.starts_with("since:XAUUSD:H1")));

        sim.set_fail_since(true);
        let outcome = ingestor.fetch(inc).await.unwrap();
        assert_eq!(outcome.fetch_mode, Some("full"));
        assert_eq!(outcome.fetched, DEFAULT_FETCH_COUNT);
    }

    #[tokio::test]
    async fn test_yearly_from_monthly() {
        let sim = Arc::new(SimBroker::new());
        let store = Arc::new(MemoryStore::new());
        sim.script_bars(monthly_bars("XAUUSD", 2023, 36));
        let ctx = context(sim.clone(), store.clone());

        let req = FetchRequest::new("XAUUSD", Timeframe::Y1).with_count(2).in_background();
        let outcome = ctx.ingestor().fetch(req).await.unwrap();
        assert_eq!(outcome.fetch_mode, Some("derived_yearly"));
        assert_eq!(outcome.inserted, 2);

        let years = store.fetch_bars("XAUUSD", Timeframe::Y1, 10).await.unwrap();
        let stamps: Vec<i32> = years.iter().map(|b| b.ts.year()).collect();
        assert_eq!(stamps, vec![2024, 2025]);

        let monthly = monthly_bars("XAUUSD", 2023, 36);
        let y2024: Vec<&Bar> = monthly.iter().filter(|b| b.ts.year() == 2024).collect();
        let bar = &years[0];
        assert_eq!(bar.ts, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(bar.open, y2024[0].open);
        assert_eq!(bar.close, y2024[11].close);
        assert_eq!(bar.high, y2024.iter().map(|b| b.high).max().unwrap());
        assert_eq!(bar.low, y2024.iter().map(|b| b.low).min().unwrap());
        assert!(sim.calls().iter().all(|c| !c.ends_with(":Y1")));
    }

    #[tokio::test]
    async fn test_full_async_is_scheduled() {
        let sim = Arc::new(SimBroker::new());
        let store = Arc::new(MemoryStore::new());
        let ctx = context(sim, store.clone());
        let mut sub = ctx.bus.subscribe(None);

        let req = FetchRequest::new("EURUSD", Timeframe::D1).with_mode(FetchMode::FullAsync);
        let outcome = ctx.ingestor().fetch(req).await.unwrap();
        assert!(outcome.scheduled);
        assert_eq!(outcome.fetch_mode, None);

        match next_event(&mut sub).await {
            Event::FetchComplete(e) => assert_eq!(e.status, FetchStatus::Scheduled),
            other => panic!("unexpected {:?}", other),
        }
        match next_event(&mut sub).await {
            Event::FetchComplete(e) => {
                assert_eq!(e.status, FetchStatus::Completed);
                assert_eq!(e.fetch_mode.as_deref(), Some("since"));
                assert!(e.inserted > 0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_persist_and_store_failure() {
        let sim = Arc::new(SimBroker::new());
        let store = Arc::new(MemoryStore::new());
        let ctx = context(sim, store.clone());
        let mut sub = ctx.bus.subscribe(None);

        let mut req = FetchRequest::new("GBPUSD", Timeframe::M15)
            .with_mode(FetchMode::Full)
            .with_count(20);
        req.persist = true;
        ctx.ingestor().fetch(req.clone()).await.unwrap();
        assert_eq!(store.get_pref(PREF_LAST_TF).await.unwrap().as_deref(), Some("M15"));
        assert_eq!(store.get_pref(PREF_LAST_COUNT).await.unwrap().as_deref(), Some("20"));
        let _ = next_event(&mut sub).await;

        store.set_offline(true);
        req.persist = false;
        assert!(ctx.ingestor().fetch(req).await.is_err());
        match next_event(&mut sub).await {
            Event::FetchComplete(e) => {
                assert_eq!(e.status, FetchStatus::Error);
                assert!(e.error.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_bulk_sequential() {
        let sim = Arc::new(SimBroker::new());
        let store = Arc::new(MemoryStore::new());
        let ctx = context(sim, store.clone());

        let tasks = vec![
            ("EURUSD".to_string(), Timeframe::H4),
            ("EURUSD".to_string(), Timeframe::D1),
        ];
        let ok = ctx
            .ingestor()
            .run_bulk(&tasks, FetchMode::Full, 10, BulkScope::SymbolTf)
            .await;
        assert_eq!(ok, 2);
        assert_eq!(store.fetch_bars("EURUSD", Timeframe::D1, 100).await.unwrap().len(), 10);
    }
}
