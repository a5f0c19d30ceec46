//! Periodic jobs and their timers.
//!
//! Timer periods start from the configured settings and are overridden by
//! stored preferences, both at startup and whenever one of the scheduler
//! preferences is written.

use futures::FutureExt;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use workbench_config::SchedulerSettings;
use workbench_core::prefs::{
    parse_flag, PREF_AUTO_NEWS_BACKFILL, PREF_BALANCE_POLL_MIN, PREF_CLOSED_ORDERS_POLL_MIN,
    PREF_NEWS_BACKFILL_MIN, SCHEDULER_PREFS,
};
use workbench_core::{classify_symbol, AnalysisKind, NewsArticle, WorkbenchResult};
use workbench_monitor::{Event, NewsEvent, NewsStatus};

use crate::account::poll_balance;
use crate::context::Context;
use crate::ingest::{FetchMode, FetchRequest};
use crate::scheduler::JobFn;

pub const BALANCE_POLL: &str = "balance_poll";
pub const CLOSED_DEALS_POLL: &str = "closed_deals_poll";
pub const NEWS_BACKFILL: &str = "news_backfill";
pub const AUTO_FETCH: &str = "auto_fetch";

/// Effective timer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerPlan {
    pub balance_poll_min: u64,
    pub closed_orders_poll_min: u64,
    pub auto_news_backfill: bool,
    pub news_backfill_min: u32,
}

impl TimerPlan {
    pub fn from_settings(settings: &SchedulerSettings) -> Self {
        Self {
            balance_poll_min: settings.balance_poll_min,
            closed_orders_poll_min: settings.closed_orders_poll_min,
            auto_news_backfill: settings.auto_news_backfill,
            news_backfill_min: settings.news_backfill_min,
        }
    }

    /// Override with stored preference values. Unparsable or zero values are
    /// ignored with a warning.
    pub fn apply_prefs(&mut self, prefs: &HashMap<String, String>) {
        let minutes = |key: &str| -> Option<u64> {
            let raw = prefs.get(key)?;
            match raw.trim().parse::<u64>() {
                Ok(n) if n >= 1 => Some(n),
                _ => {
                    warn!(key, value = %raw, "Ignoring invalid timer preference");
                    None
                }
            }
        };

        if let Some(n) = minutes(PREF_BALANCE_POLL_MIN) {
            self.balance_poll_min = n;
        }
        if let Some(n) = minutes(PREF_CLOSED_ORDERS_POLL_MIN) {
            self.closed_orders_poll_min = n;
        }
        if let Some(n) = minutes(PREF_NEWS_BACKFILL_MIN) {
            self.news_backfill_min = n.min(60) as u32;
        }
        if let Some(raw) = prefs.get(PREF_AUTO_NEWS_BACKFILL) {
            match parse_flag(raw) {
                Some(flag) => self.auto_news_backfill = flag,
                None => warn!(value = %raw, "Ignoring invalid auto_news_backfill preference"),
            }
        }
    }
}

/// Wrap a job body as a timer tick. Errors are logged and the timer keeps
/// running.
fn tick<F, Fut>(ctx: &Context, name: &'static str, body: F) -> JobFn
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = WorkbenchResult<()>> + Send + 'static,
{
    let ctx = ctx.clone();
    Arc::new(move || {
        let fut = body(ctx.clone());
        async move {
            if let Err(e) = fut.await {
                warn!(job = name, kind = e.kind(), error = %e, "Scheduled job failed");
            }
        }
        .boxed()
    })
}

pub fn arm_balance_poll(ctx: &Context, minutes: u64) {
    let job = tick(ctx, BALANCE_POLL, |ctx| async move { poll_balance(&ctx).await.map(|_| ()) });
    ctx.scheduler
        .arm_fixed(BALANCE_POLL, Duration::from_secs(minutes.max(1) * 60), job);
}

pub fn arm_closed_deals_poll(ctx: &Context, minutes: u64) {
    let job = tick(ctx, CLOSED_DEALS_POLL, |ctx| async move {
        ctx.bus.broadcast(Event::ClosedDealsUpdate);
        Ok(())
    });
    ctx.scheduler
        .arm_fixed(CLOSED_DEALS_POLL, Duration::from_secs(minutes.max(1) * 60), job);
}

/// Arm or cancel the aligned news backfill.
pub fn arm_news_backfill(ctx: &Context, enabled: bool, minutes: u32) {
    if !enabled {
        if ctx.scheduler.cancel(NEWS_BACKFILL) {
            info!("News backfill disabled");
        }
        return;
    }
    let job = tick(ctx, NEWS_BACKFILL, |ctx| async move { backfill_news(&ctx).await.map(|_| ()) });
    ctx.scheduler.arm_aligned(NEWS_BACKFILL, minutes, job);
}

pub fn arm_auto_fetch(ctx: &Context) {
    let auto = &ctx.settings.scheduler.auto_fetch;
    let (symbol, timeframe, count) = (auto.symbol.clone(), auto.timeframe, auto.count);
    let job = tick(ctx, AUTO_FETCH, move |ctx| {
        let req = FetchRequest::new(symbol.clone(), timeframe)
            .with_count(count)
            .with_mode(FetchMode::Inc)
            .with_scope(AUTO_FETCH)
            .in_background();
        async move { ctx.ingestor().fetch(req).await.map(|_| ()) }
    });
    ctx.scheduler
        .arm_fixed(AUTO_FETCH, Duration::from_secs(auto.interval_sec.max(1)), job);
}

/// Current plan: settings overridden by stored preferences. A store failure
/// leaves the settings in force.
pub async fn current_plan(ctx: &Context) -> TimerPlan {
    let mut plan = TimerPlan::from_settings(&ctx.settings.scheduler);
    match ctx.store.get_prefs(SCHEDULER_PREFS).await {
        Ok(prefs) => plan.apply_prefs(&prefs),
        Err(e) => warn!(error = %e, "Could not read timer preferences, using configured defaults"),
    }
    plan
}

/// Arm every timer. Called once at startup.
pub async fn start(ctx: &Context) -> TimerPlan {
    let plan = current_plan(ctx).await;
    arm_balance_poll(ctx, plan.balance_poll_min);
    arm_closed_deals_poll(ctx, plan.closed_orders_poll_min);
    arm_news_backfill(ctx, plan.auto_news_backfill, plan.news_backfill_min);
    if ctx.settings.scheduler.auto_fetch.enabled {
        arm_auto_fetch(ctx);
    }
    info!(
        balance_poll_min = plan.balance_poll_min,
        closed_orders_poll_min = plan.closed_orders_poll_min,
        auto_news_backfill = plan.auto_news_backfill,
        news_backfill_min = plan.news_backfill_min,
        timers = ?ctx.scheduler.armed(),
        "Scheduler started"
    );
    plan
}

/// Re-arm the timers touched by `changed` preference keys. Returns the
/// names of the timers that were re-armed or cancelled.
pub async fn reconfigure(ctx: &Context, changed: &[String]) -> Vec<&'static str> {
    let touched = |key: &str| changed.iter().any(|k| k == key);
    if !SCHEDULER_PREFS.iter().any(|k| touched(k)) {
        return Vec::new();
    }

    let plan = current_plan(ctx).await;
    let mut rearmed = Vec::new();
    if touched(PREF_BALANCE_POLL_MIN) {
        arm_balance_poll(ctx, plan.balance_poll_min);
        rearmed.push(BALANCE_POLL);
    }
    if touched(PREF_CLOSED_ORDERS_POLL_MIN) {
        arm_closed_deals_poll(ctx, plan.closed_orders_poll_min);
        rearmed.push(CLOSED_DEALS_POLL);
    }
    if touched(PREF_AUTO_NEWS_BACKFILL) || touched(PREF_NEWS_BACKFILL_MIN) {
        arm_news_backfill(ctx, plan.auto_news_backfill, plan.news_backfill_min);
        rearmed.push(NEWS_BACKFILL);
    }
    info!(timers = ?rearmed, "Timers reconfigured");
    rearmed
}

/// Collect articles into `acc`, keyed by symbol.
fn collect(acc: &mut BTreeMap<String, Vec<NewsArticle>>, articles: Vec<NewsArticle>) {
    for article in articles {
        acc.entry(article.symbol.clone()).or_default().push(article);
    }
}

/// Page through the general feed, then one pass per equity symbol, and
/// store what came back. Returns the number of articles written.
pub async fn backfill_news(ctx: &Context) -> WorkbenchResult<usize> {
    if !ctx.news.is_enabled() {
        debug!("News source disabled, skipping backfill");
        return Ok(0);
    }
    let cfg = &ctx.settings.news;
    let symbols = &ctx.settings.symbols;
    let pause = Duration::from_millis(cfg.pause_ms);
    let mut by_symbol: BTreeMap<String, Vec<NewsArticle>> = BTreeMap::new();

    for page in 0..cfg.max_pages {
        match ctx.news.fetch_page(None, page, cfg.page_size).await {
            Ok(items) => {
                let last = items.len() < cfg.page_size;
                for item in items {
                    collect(&mut by_symbol, item.into_articles(symbols, None));
                }
                if last {
                    break;
                }
            }
            Err(e) => {
                warn!(page, error = %e, "News page failed");
                break;
            }
        }
        tokio::time::sleep(pause).await;
    }

    let equities = symbols
        .iter()
        .filter(|s| classify_symbol(s).kind == AnalysisKind::Stock);
    for symbol in equities {
        tokio::time::sleep(pause).await;
        match ctx.news.fetch_page(Some(symbol), 0, cfg.page_size).await {
            Ok(items) => {
                for item in items {
                    collect(&mut by_symbol, item.into_articles(&[], Some(symbol)));
                }
            }
            Err(e) => warn!(symbol = %symbol, error = %e, "News symbol pass failed"),
        }
    }

    let mut written = 0;
    for (symbol, articles) in by_symbol {
        let n = ctx.store.upsert_news_articles(&articles).await?;
        written += n;
        ctx.bus.broadcast(Event::NewsUpdate(NewsEvent {
            symbol,
            status: NewsStatus::Updated,
            scope: Some("backfill".to_string()),
            background: true,
            items: Some(n),
            note: None,
        }));
    }
    info!(source = ctx.news.name(), written, "News backfill finished");
    Ok(written)
}

/// Pull the newest page for one symbol on demand.
pub async fn refresh_news(ctx: &Context, symbol: &str) -> WorkbenchResult<usize> {
    let symbol = symbol.trim().to_uppercase();
    let items = ctx
        .news
        .fetch_page(Some(&symbol), 0, ctx.settings.news.page_size)
        .await?;
    let articles: Vec<NewsArticle> = items
        .into_iter()
        .flat_map(|item| item.into_articles(&[], Some(&symbol)))
        .collect();
    let n = if articles.is_empty() {
        0
    } else {
        ctx.store.upsert_news_articles(&articles).await?
    };
    ctx.bus.broadcast(Event::NewsUpdate(NewsEvent {
        symbol,
        status: NewsStatus::Refreshed,
        scope: None,
        background: false,
        items: Some(n),
        note: None,
    }));
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::news::{FeedItem, NewsSource};
    use crate::testing::{context, next_event};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use workbench_broker::SimBroker;
    use workbench_config::Settings;
    use workbench_core::{Broker, Store};
    use workbench_store::MemoryStore;

    #[test]
    fn test_plan_prefs_override_settings() {
        let mut plan = TimerPlan::from_settings(&SchedulerSettings::default());
        assert_eq!(plan.balance_poll_min, 60);

        let prefs: HashMap<String, String> = [
            (PREF_BALANCE_POLL_MIN, "15"),
            (PREF_CLOSED_ORDERS_POLL_MIN, "0"),
            (PREF_AUTO_NEWS_BACKFILL, "off"),
            (PREF_NEWS_BACKFILL_MIN, "abc"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        plan.apply_prefs(&prefs);

        assert_eq!(plan.balance_poll_min, 15);
        assert_eq!(plan.closed_orders_poll_min, 60);
        assert!(!plan.auto_news_backfill);
        assert_eq!(plan.news_backfill_min, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_arms_from_stored_prefs() {
        let store = Arc::new(MemoryStore::new());
        store.set_pref(PREF_AUTO_NEWS_BACKFILL, "0").await.unwrap();
        let ctx = context(Arc::new(SimBroker::new()), store);

        let plan = start(&ctx).await;
        assert!(!plan.auto_news_backfill);
        assert_eq!(
            ctx.scheduler.armed(),
            vec![BALANCE_POLL.to_string(), CLOSED_DEALS_POLL.to_string()]
        );

        ctx.store.set_pref(PREF_AUTO_NEWS_BACKFILL, "1").await.unwrap();
        let rearmed = reconfigure(&ctx, &[PREF_AUTO_NEWS_BACKFILL.to_string()]).await;
        assert_eq!(rearmed, vec![NEWS_BACKFILL]);
        assert!(ctx.scheduler.is_armed(NEWS_BACKFILL));
        assert!(reconfigure(&ctx, &["chart_theme".to_string()]).await.is_empty());
        ctx.scheduler.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_balance_timer_reconfigured_by_pref() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(Arc::new(SimBroker::new()), store.clone());
        start(&ctx).await;

        tokio::time::sleep(Duration::from_secs(10 * 60)).await;
        store.set_pref(PREF_BALANCE_POLL_MIN, "15").await.unwrap();
        reconfigure(&ctx, &[PREF_BALANCE_POLL_MIN.to_string()]).await;

        // fires at 25, 40 and 55 minutes; the original 60 minute tick never runs
        tokio::time::sleep(Duration::from_secs(51 * 60)).await;
        let snapshots = store
            .list_balance_snapshots("default", None, None, 100)
            .await
            .unwrap();
        assert_eq!(snapshots.len(), 3);
        ctx.scheduler.shutdown();
    }

    struct ScriptedFeed {
        pages: Mutex<Vec<Vec<FeedItem>>>,
        symbol_calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NewsSource for ScriptedFeed {
        async fn fetch_page(
            &self,
            symbol: Option<&str>,
            _page: usize,
            _page_size: usize,
        ) -> WorkbenchResult<Vec<FeedItem>> {
            if let Some(symbol) = symbol {
                self.symbol_calls.lock().unwrap().push(symbol.to_string());
                return Ok(vec![feed_item(&format!("https://n/{}", symbol), &[])]);
            }
            let mut pages = self.pages.lock().unwrap();
            Ok(if pages.is_empty() { Vec::new() } else { pages.remove(0) })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn feed_item(url: &str, symbols: &[&str]) -> FeedItem {
        FeedItem {
            url: url.into(),
            title: "headline".into(),
            source: None,
            published_at: Some("2025-01-02T03:04:05Z".into()),
            body: None,
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backfill_pages_then_equities() {
        let store = Arc::new(MemoryStore::new());
        let feed = Arc::new(ScriptedFeed {
            pages: Mutex::new(vec![vec![
                feed_item("https://n/1", &["EURUSD"]),
                feed_item("https://n/2", &["EURUSD", "AAPL"]),
            ]]),
            symbol_calls: Mutex::new(Vec::new()),
        });
        let mut settings = Settings::default();
        settings.symbols = vec!["EURUSD".into(), "AAPL".into()];
        let sim: Arc<dyn Broker> = Arc::new(SimBroker::new());
        let ctx = Context::new(store.clone(), sim, feed.clone(), settings);
        let mut sub = ctx.bus.subscribe(None);

        let written = backfill_news(&ctx).await.unwrap();
        assert_eq!(written, 4);
        assert_eq!(*feed.symbol_calls.lock().unwrap(), vec!["AAPL".to_string()]);
        assert_eq!(store.fetch_news_db("EURUSD", None, 10).await.unwrap().len(), 2);

        let mut seen = Vec::new();
        for _ in 0..2 {
            match next_event(&mut sub).await {
                Event::NewsUpdate(e) => {
                    assert_eq!(e.status, NewsStatus::Updated);
                    seen.push((e.symbol, e.items));
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(seen, vec![("AAPL".to_string(), Some(2)), ("EURUSD".to_string(), Some(2))]);
    }

    #[tokio::test]
    async fn test_backfill_skipped_when_disabled() {
        let ctx = context(Arc::new(SimBroker::new()), Arc::new(MemoryStore::new()));
        assert_eq!(backfill_news(&ctx).await.unwrap(), 0);
    }
}
