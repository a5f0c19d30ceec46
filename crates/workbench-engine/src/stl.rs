//! STL runs over stored bars.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{info, warn};
use workbench_analytics::{effective_period, Stl, MIN_SAMPLES};
use workbench_core::{
    iso8601, BarCoverage, NewStlRun, StlPoint, StlRun, Timeframe, WorkbenchError, WorkbenchResult,
};
use workbench_monitor::{Event, StlEvent, StlStatus};

use crate::context::Context;

/// What a compute request covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StlScope {
    Current,
    SymbolAllTf,
    TimeframeAllSymbols,
    All,
}

impl StlScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            StlScope::Current => "current",
            StlScope::SymbolAllTf => "symbol_all_tf",
            StlScope::TimeframeAllSymbols => "timeframe_all_symbols",
            StlScope::All => "all",
        }
    }
}

impl FromStr for StlScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "current" => Ok(StlScope::Current),
            "symbol_all_tf" => Ok(StlScope::SymbolAllTf),
            "timeframe_all_symbols" => Ok(StlScope::TimeframeAllSymbols),
            "all" => Ok(StlScope::All),
            _ => Err(format!("Invalid STL scope: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StlRequest {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Season length override, clamped like the default
    pub period: Option<usize>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl StlRequest {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            period: None,
            start: None,
            end: None,
        }
    }
}

/// One component row as served.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StlRow {
    pub ts: String,
    pub close: f64,
    pub trend: f64,
    pub seasonal: f64,
    pub resid: f64,
}

impl From<&StlPoint> for StlRow {
    fn from(p: &StlPoint) -> Self {
        Self {
            ts: iso8601(p.ts),
            close: p.close,
            trend: p.trend,
            seasonal: p.seasonal,
            resid: p.resid,
        }
    }
}

/// Answer to a read: known runs, the chosen one, and whether a new run is
/// due.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StlView {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub runs: Vec<StlRun>,
    pub selected: Option<StlRun>,
    pub rows: Vec<StlRow>,
    pub dataset: Option<BarCoverage>,
    pub needs_compute: bool,
    pub reason: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComputeOutcome {
    pub ok: bool,
    pub scheduled: bool,
    pub jobs: usize,
}

/// Pick the run to show and decide whether a compute is due.
///
/// With `all_data` the newest run covering the dataset wins and must hold at
/// least as many rows; otherwise the run must match `window` within a
/// second.
pub fn coverage_decision(
    runs: &[StlRun],
    dataset: Option<&BarCoverage>,
    all_data: bool,
    window: Option<(DateTime<Utc>, DateTime<Utc>)>,
) -> (Option<StlRun>, bool, Option<&'static str>) {
    let Some(dataset) = dataset else {
        return (None, false, Some("no_data"));
    };
    if runs.is_empty() {
        return (None, true, Some("missing_run"));
    }

    if all_data {
        return match runs.iter().find(|r| r.covers(dataset)) {
            Some(run) if run.rows_count >= dataset.rows_count => (Some(run.clone()), false, None),
            Some(run) => (Some(run.clone()), true, Some("dataset_extended")),
            None => (runs.first().cloned(), true, Some("dataset_extended")),
        };
    }

    let (start, end) = window.unwrap_or((dataset.start_ts, dataset.end_ts));
    match runs.iter().find(|r| r.matches_window(start, end)) {
        Some(run) => (Some(run.clone()), false, None),
        None => (None, true, Some("missing_run")),
    }
}

/// Computes, stores and serves STL runs.
#[derive(Clone)]
pub struct StlService {
    ctx: Context,
}

impl StlService {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Decompose the close series of a bar range and store it as a new run.
    pub async fn compute(&self, req: &StlRequest) -> WorkbenchResult<StlRun> {
        let store = &self.ctx.store;
        let dataset = store
            .ohlc_range(&req.symbol, req.timeframe)
            .await?
            .ok_or_else(|| WorkbenchError::NoData(format!("no bars for {} {}", req.symbol, req.timeframe)))?;

        let start = req.start.map_or(dataset.start_ts, |s| s.max(dataset.start_ts));
        let end = req.end.map_or(dataset.end_ts, |e| e.min(dataset.end_ts));
        if end < start {
            return Err(WorkbenchError::InvalidRange(format!(
                "end {} before start {}",
                iso8601(end),
                iso8601(start)
            )));
        }

        let bars = store
            .fetch_bars_range(&req.symbol, req.timeframe, start, end)
            .await?;
        let (stamps, closes): (Vec<DateTime<Utc>>, Vec<f64>) = bars
            .iter()
            .filter_map(|b| b.close_f64().map(|c| (b.ts, c)))
            .unzip();
        let n = closes.len();
        if n < MIN_SAMPLES {
            return Err(WorkbenchError::Insufficient {
                required: MIN_SAMPLES,
                available: n,
            });
        }

        let base = req.period.unwrap_or_else(|| req.timeframe.default_stl_period());
        let period = effective_period(base, n);
        let fit_input = closes.clone();
        let output = tokio::task::spawn_blocking(move || Stl::new(period).fit(&fit_input))
            .await
            .map_err(|e| WorkbenchError::Internal(format!("STL worker failed: {}", e)))??;

        let points: Vec<StlPoint> = (0..n)
            .map(|i| StlPoint {
                ts: stamps[i],
                close: closes[i],
                trend: output.trend[i],
                seasonal: output.seasonal[i],
                resid: output.resid[i],
            })
            .collect();
        let new_run = NewStlRun {
            symbol: req.symbol.clone(),
            timeframe: req.timeframe,
            period: period as i32,
            start_ts: start,
            end_ts: end,
        };
        let run = store.create_stl_run(&new_run, &points).await?;
        info!(
            symbol = %req.symbol,
            timeframe = %req.timeframe,
            run_id = run.id,
            period,
            points = n,
            "STL run stored"
        );
        Ok(run)
    }

    /// Runs for a series plus the coverage decision and the chosen rows.
    pub async fn read(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        all_data: bool,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
        run_id: Option<i64>,
    ) -> WorkbenchResult<StlView> {
        let store = &self.ctx.store;
        let runs = store.list_stl_runs(symbol, timeframe).await?;
        let dataset = store.ohlc_range(symbol, timeframe).await?;

        let (selected, needs_compute, reason) = match run_id {
            Some(id) => {
                let run = store
                    .get_stl_run(id)
                    .await?
                    .ok_or_else(|| WorkbenchError::NotFound(format!("STL run {}", id)))?;
                (Some(run), false, None)
            }
            None => coverage_decision(&runs, dataset.as_ref(), all_data, window),
        };

        let rows = match &selected {
            Some(run) => store
                .fetch_stl_run_data(run.id)
                .await?
                .iter()
                .map(StlRow::from)
                .collect(),
            None => Vec::new(),
        };

        Ok(StlView {
            symbol: symbol.to_string(),
            timeframe,
            runs,
            selected,
            rows,
            dataset,
            needs_compute,
            reason,
        })
    }

    pub async fn delete(&self, id: i64) -> WorkbenchResult<()> {
        if self.ctx.store.delete_stl_run(id).await? {
            info!(run_id = id, "STL run deleted");
            Ok(())
        } else {
            Err(WorkbenchError::NotFound(format!("STL run {}", id)))
        }
    }

    /// Expand a compute scope into (symbol, timeframe) tasks.
    pub fn expand_scope(&self, scope: StlScope, symbol: &str, timeframe: Timeframe) -> Vec<(String, Timeframe)> {
        let symbols = &self.ctx.settings.symbols;
        let mut tasks = Vec::new();
        match scope {
            StlScope::Current => tasks.push((symbol.to_string(), timeframe)),
            StlScope::SymbolAllTf => {
                tasks.extend(Timeframe::all().iter().map(|tf| (symbol.to_string(), *tf)))
            }
            StlScope::TimeframeAllSymbols => tasks.extend(symbols.iter().map(|s| (s.clone(), timeframe))),
            StlScope::All => {
                for s in symbols {
                    tasks.extend(Timeframe::all().iter().map(|tf| (s.clone(), *tf)));
                }
            }
        }
        tasks
    }

    /// Schedule computations for every task of `scope`. Each task takes
    /// its period and window from `base`.
    pub fn schedule(&self, scope: StlScope, base: StlRequest) -> ComputeOutcome {
        let period = base.period;
        let tasks = self.expand_scope(scope, &base.symbol, base.timeframe);
        for (symbol, tf) in &tasks {
            self.emit(StlEvent {
                symbol: symbol.clone(),
                timeframe: *tf,
                period,
                status: StlStatus::Scheduled,
                scope: scope.as_str().to_string(),
                background: true,
                ..Default::default()
            });
        }

        let jobs = tasks.len();
        let this = self.clone();
        self.ctx
            .scheduler
            .spawn_callback(format!("stl:{}", scope.as_str()), async move {
                for (symbol, timeframe) in tasks {
                    let req = StlRequest {
                        symbol,
                        timeframe,
                        ..base.clone()
                    };
                    this.compute_and_report(&req, scope).await;
                }
                Ok(())
            });

        ComputeOutcome {
            ok: true,
            scheduled: true,
            jobs,
        }
    }

    /// Compute one run and publish the outcome.
    pub async fn compute_and_report(&self, req: &StlRequest, scope: StlScope) -> Option<StlRun> {
        let mut event = StlEvent {
            symbol: req.symbol.clone(),
            timeframe: req.timeframe,
            period: req.period,
            scope: scope.as_str().to_string(),
            background: true,
            ..Default::default()
        };
        match self.compute(req).await {
            Ok(run) => {
                event.status = StlStatus::Completed;
                event.period = Some(run.period as usize);
                event.run_id = Some(run.id);
                event.points = Some(run.rows_count as usize);
                event.start_ts = Some(iso8601(run.start_ts));
                event.end_ts = Some(iso8601(run.end_ts));
                event.created_at = Some(iso8601(run.created_at));
                self.emit(event);
                Some(run)
            }
            Err(e) => {
                warn!(symbol = %req.symbol, timeframe = %req.timeframe, error = %e, "STL compute failed");
                event.status = StlStatus::Error;
                event.error = Some(e.to_string());
                self.emit(event);
                None
            }
        }
    }

    fn emit(&self, event: StlEvent) {
        self.ctx.bus.broadcast(Event::StlComplete(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, hourly_bars, next_event};
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;
    use workbench_broker::SimBroker;
    use workbench_core::Store;
    use workbench_store::MemoryStore;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 6, 0, 0, 0).unwrap()
    }

    fn run(id: i64, start: DateTime<Utc>, end: DateTime<Utc>, rows: i64) -> StlRun {
        StlRun {
            id,
            symbol: "XAUUSD".into(),
            timeframe: Timeframe::H1,
            period: 24,
            start_ts: start,
            end_ts: end,
            rows_count: rows,
            created_at: end,
        }
    }

    async fn seeded(n: usize) -> (Context, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.upsert_bars(&hourly_bars("XAUUSD", start(), n)).await.unwrap();
        (context(Arc::new(SimBroker::new()), store.clone()), store)
    }

    #[test]
    fn test_coverage_decision() {
        let end = start() + Duration::hours(499);
        let dataset = BarCoverage {
            start_ts: start(),
            end_ts: end,
            rows_count: 500,
        };

        assert_eq!(coverage_decision(&[], None, true, None), (None, false, Some("no_data")));
        assert_eq!(coverage_decision(&[], Some(&dataset), true, None).2, Some("missing_run"));

        let full = run(2, start(), end, 500);
        let (selected, needs, reason) = coverage_decision(&[full.clone()], Some(&dataset), true, None);
        assert_eq!(selected, Some(full));
        assert!(!needs);
        assert_eq!(reason, None);

        let stale = run(1, start(), end - Duration::hours(10), 490);
        let (selected, needs, reason) = coverage_decision(&[stale], Some(&dataset), true, None);
        assert_eq!(selected.map(|r| r.id), Some(1));
        assert!(needs);
        assert_eq!(reason, Some("dataset_extended"));

        let window = (start() + Duration::hours(10), end);
        let windowed = run(3, window.0, window.1, 490);
        let (selected, needs, _) = coverage_decision(&[windowed], Some(&dataset), false, Some(window));
        assert_eq!(selected.map(|r| r.id), Some(3));
        assert!(!needs);
    }

    #[tokio::test]
    async fn test_compute_then_read_covered() {
        let (ctx, store) = seeded(500).await;
        let service = ctx.stl();

        let mut req = StlRequest::new("XAUUSD", Timeframe::H1);
        req.period = Some(24);
        let stored = service.compute(&req).await.unwrap();
        assert_eq!(stored.period, 24);
        assert_eq!(stored.rows_count, 500);

        let points = store.fetch_stl_run_data(stored.id).await.unwrap();
        assert_eq!(points.len(), 500);
        assert!(points.iter().all(|p| p.ts >= stored.start_ts && p.ts <= stored.end_ts));
        for p in &points {
            assert!((p.trend + p.seasonal + p.resid - p.close).abs() < 1e-6);
        }

        let view = service.read("XAUUSD", Timeframe::H1, true, None, None).await.unwrap();
        assert!(!view.needs_compute);
        assert_eq!(view.selected.map(|r| r.id), Some(stored.id));
        assert_eq!(view.rows.len(), 500);
        assert_eq!(view.dataset.map(|d| d.rows_count), Some(500));
    }

    #[tokio::test]
    async fn test_read_flags_extended_dataset() {
        let (ctx, store) = seeded(100).await;
        let service = ctx.stl();
        service.compute(&StlRequest::new("XAUUSD", Timeframe::H1)).await.unwrap();

        store
            .upsert_bars(&hourly_bars("XAUUSD", start() + Duration::hours(100), 5))
            .await
            .unwrap();
        let view = service.read("XAUUSD", Timeframe::H1, true, None, None).await.unwrap();
        assert!(view.needs_compute);
        assert_eq!(view.reason, Some("dataset_extended"));
    }

    #[tokio::test]
    async fn test_period_clamped_to_half_samples() {
        let (ctx, _) = seeded(40).await;
        let mut req = StlRequest::new("XAUUSD", Timeframe::H1);
        req.period = Some(100);
        let stored = ctx.stl().compute(&req).await.unwrap();
        assert_eq!(stored.period, 20);
    }

    #[tokio::test]
    async fn test_compute_preconditions() {
        let (ctx, store) = seeded(11).await;
        let service = ctx.stl();

        let err = service.compute(&StlRequest::new("XAUUSD", Timeframe::H1)).await.unwrap_err();
        assert!(matches!(err, WorkbenchError::Insufficient { required: 12, available: 11 }));
        assert!(store.list_stl_runs("XAUUSD", Timeframe::H1).await.unwrap().is_empty());

        let err = service.compute(&StlRequest::new("EURUSD", Timeframe::H1)).await.unwrap_err();
        assert!(matches!(err, WorkbenchError::NoData(_)));

        let mut req = StlRequest::new("XAUUSD", Timeframe::H1);
        req.start = Some(start() + Duration::hours(8));
        req.end = Some(start() + Duration::hours(2));
        let err = service.compute(&req).await.unwrap_err();
        assert!(matches!(err, WorkbenchError::InvalidRange(_)));
    }

    #[tokio::test]
    async fn test_schedule_windowed_run_matches_window_read() {
        let (ctx, _) = seeded(200).await;
        let service = ctx.stl();
        let mut sub = ctx.bus.subscribe(None);
        let from = start() + Duration::hours(50);
        let to = start() + Duration::hours(150);

        let mut req = StlRequest::new("XAUUSD", Timeframe::H1);
        req.start = Some(from);
        req.end = Some(to);
        assert_eq!(service.schedule(StlScope::Current, req).jobs, 1);

        let _scheduled = next_event(&mut sub).await;
        match next_event(&mut sub).await {
            Event::StlComplete(e) => {
                assert_eq!(e.status, StlStatus::Completed);
                assert_eq!(e.points, Some(101));
                assert_eq!(e.start_ts, Some(iso8601(from)));
                assert_eq!(e.end_ts, Some(iso8601(to)));
            }
            other => panic!("unexpected {:?}", other),
        }

        let view = service
            .read("XAUUSD", Timeframe::H1, false, Some((from, to)), None)
            .await
            .unwrap();
        assert!(!view.needs_compute);
        assert_eq!(view.reason, None);
        assert_eq!(view.rows.len(), 101);

        // The same run does not cover the full dataset.
        let full = service.read("XAUUSD", Timeframe::H1, true, None, None).await.unwrap();
        assert!(full.needs_compute);
        assert_eq!(full.reason, Some("dataset_extended"));
    }

    #[tokio::test]
    async fn test_schedule_reports_and_delete() {
        let (ctx, _) = seeded(200).await;
        let service = ctx.stl();
        let mut sub = ctx.bus.subscribe(None);

        let mut req = StlRequest::new("XAUUSD", Timeframe::H1);
        req.period = Some(24);
        let outcome = service.schedule(StlScope::Current, req);
        assert_eq!(outcome.jobs, 1);

        match next_event(&mut sub).await {
            Event::StlComplete(e) => assert_eq!(e.status, StlStatus::Scheduled),
            other => panic!("unexpected {:?}", other),
        }
        let run_id = match next_event(&mut sub).await {
            Event::StlComplete(e) => {
                assert_eq!(e.status, StlStatus::Completed);
                assert_eq!(e.points, Some(200));
                e.run_id.unwrap()
            }
            other => panic!("unexpected {:?}", other),
        };

        service.delete(run_id).await.unwrap();
        assert!(matches!(service.delete(run_id).await, Err(WorkbenchError::NotFound(_))));
        assert!(matches!(
            service.read("XAUUSD", Timeframe::H1, true, None, Some(run_id)).await,
            Err(WorkbenchError::NotFound(_))
        ));
    }

    #[test]
    fn test_scope_parse() {
        assert_eq!("timeframe_all_symbols".parse::<StlScope>().unwrap(), StlScope::TimeframeAllSymbols);
        assert!("nearby".parse::<StlScope>().is_err());
    }
}
