//! Balance snapshots and closed-deal history.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};
use workbench_core::{iso8601, BalanceSnapshot, ClosedDeal, WorkbenchError, WorkbenchResult};
use workbench_monitor::{BalanceEvent, Event};

use crate::context::Context;

/// Years walked by a full closed-deal sync.
pub const SYNC_YEARS: i64 = 5;
pub const DEFAULT_SYNC_STEP_DAYS: i64 = 90;
/// Widest window a sync step may ask for: the whole walk in one go.
pub const MAX_SYNC_STEP_DAYS: i64 = 365 * SYNC_YEARS;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalancePoint {
    pub ts: String,
    pub balance: f64,
    pub equity: f64,
    pub margin: f64,
    pub free_margin: f64,
    pub currency: String,
}

impl From<&BalanceSnapshot> for BalancePoint {
    fn from(s: &BalanceSnapshot) -> Self {
        Self {
            ts: iso8601(s.ts),
            balance: s.balance.to_f64().unwrap_or_default(),
            equity: s.equity.to_f64().unwrap_or_default(),
            margin: s.margin.to_f64().unwrap_or_default(),
            free_margin: s.free_margin.to_f64().unwrap_or_default(),
            currency: s.currency.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceSeries {
    pub user: String,
    pub account: Option<i64>,
    pub points: Vec<BalancePoint>,
}

/// One closed deal with the running net PnL up to and including it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DealPoint {
    pub deal_id: Option<i64>,
    pub ts: String,
    pub symbol: Option<String>,
    pub net: f64,
    pub cum: f64,
    /// Set on the point seeded from the balance history
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub synthetic: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosedDealsReport {
    pub account: i64,
    pub from: String,
    pub to: String,
    pub count: usize,
    pub total: f64,
    pub points: Vec<DealPoint>,
}

/// Union of stored and broker deals keyed by deal id; broker rows win.
pub fn merge_deals(stored: Vec<ClosedDeal>, fetched: &[ClosedDeal]) -> Vec<ClosedDeal> {
    let mut by_id: BTreeMap<i64, ClosedDeal> = stored.into_iter().map(|d| (d.deal_id, d)).collect();
    for deal in fetched {
        by_id.insert(deal.deal_id, deal.clone());
    }
    let mut deals: Vec<ClosedDeal> = by_id.into_values().collect();
    deals.sort_by(|a, b| a.ts.cmp(&b.ts).then(a.deal_id.cmp(&b.deal_id)));
    deals
}

/// Running net PnL over deals sorted by time, optionally seeded from a
/// starting balance.
pub fn cumulative_pnl(deals: &[ClosedDeal], seed: Option<(DateTime<Utc>, Decimal)>) -> Vec<DealPoint> {
    let mut points = Vec::with_capacity(deals.len() + 1);
    let mut cum = Decimal::ZERO;
    if let Some((ts, balance)) = seed {
        cum = balance;
        points.push(DealPoint {
            deal_id: None,
            ts: iso8601(ts),
            symbol: None,
            net: 0.0,
            cum: balance.to_f64().unwrap_or_default(),
            synthetic: true,
        });
    }
    for deal in deals {
        let net = deal.net();
        cum += net;
        points.push(DealPoint {
            deal_id: Some(deal.deal_id),
            ts: iso8601(deal.ts),
            symbol: Some(deal.symbol.clone()),
            net: net.to_f64().unwrap_or_default(),
            cum: cum.to_f64().unwrap_or_default(),
            synthetic: false,
        });
    }
    points
}

/// Read the account, store a snapshot and announce it.
pub async fn poll_balance(ctx: &Context) -> WorkbenchResult<BalanceSnapshot> {
    let account = ctx.broker.account_info().await?;
    let user = ctx.settings.server.user.clone();
    let snapshot = BalanceSnapshot::from_account(&user, &account, Utc::now());
    ctx.store.insert_balance_snapshot(&snapshot).await?;
    info!(user = %user, account = account.login, balance = %account.balance, "Balance snapshot stored");

    ctx.bus.broadcast(Event::BalanceUpdate(BalanceEvent {
        user,
        account: account.login,
        balance: account.balance.to_f64(),
    }));
    Ok(snapshot)
}

/// Stored snapshots for the configured user, refreshed first on request.
pub async fn balance_series(
    ctx: &Context,
    account: Option<i64>,
    since: Option<DateTime<Utc>>,
    limit: i64,
    refresh: bool,
) -> WorkbenchResult<BalanceSeries> {
    if refresh {
        if let Err(e) = poll_balance(ctx).await {
            warn!(error = %e, "Balance refresh failed, serving stored snapshots");
        }
    }
    let user = ctx.settings.server.user.clone();
    let snapshots = ctx
        .store
        .list_balance_snapshots(&user, account, since, limit)
        .await?;
    Ok(BalanceSeries {
        user,
        account,
        points: snapshots.iter().map(BalancePoint::from).collect(),
    })
}

/// Closed deals in `[from, to]` from the store and the broker, with the
/// broker's rows written back.
pub async fn closed_deals_report(
    ctx: &Context,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    with_baseline: bool,
) -> WorkbenchResult<ClosedDealsReport> {
    if to < from {
        return Err(WorkbenchError::InvalidRange(format!(
            "to {} before from {}",
            iso8601(to),
            iso8601(from)
        )));
    }
    let account = ctx.broker.account_info().await?.login;
    let fetched = ctx.broker.closed_deals(from, to).await?;
    if !fetched.is_empty() {
        ctx.store.upsert_closed_deals(account, &fetched).await?;
    }
    let stored = ctx.store.list_closed_deals(account, from, to).await?;
    let deals = merge_deals(stored, &fetched);

    let seed = if with_baseline {
        ctx.store
            .latest_balance_at_or_before(&ctx.settings.server.user, account, from)
            .await?
            .map(|s| (from, s.balance))
    } else {
        None
    };

    let total = deals.iter().map(ClosedDeal::net).sum::<Decimal>();
    Ok(ClosedDealsReport {
        account,
        from: iso8601(from),
        to: iso8601(to),
        count: deals.len(),
        total: total.to_f64().unwrap_or_default(),
        points: cumulative_pnl(&deals, seed),
    })
}

/// Walk back `SYNC_YEARS` in `step_days` windows, storing every deal the
/// broker reports. Announces `closed_deals_update` when done.
pub async fn sync_closed_deals(ctx: &Context, now: DateTime<Utc>, step_days: i64) -> WorkbenchResult<usize> {
    let step = Duration::days(step_days.clamp(1, MAX_SYNC_STEP_DAYS));
    let account = ctx.broker.account_info().await?.login;
    let start = now - Duration::days(MAX_SYNC_STEP_DAYS);

    let mut stored = 0;
    let mut window_start = start;
    while window_start < now {
        let window_end = window_start
            .checked_add_signed(step)
            .map_or(now, |end| end.min(now));
        match ctx.broker.closed_deals(window_start, window_end).await {
            Ok(deals) if !deals.is_empty() => {
                stored += ctx.store.upsert_closed_deals(account, &deals).await?;
            }
            Ok(_) => {}
            Err(e) => warn!(
                from = %iso8601(window_start),
                to = %iso8601(window_end),
                error = %e,
                "Closed-deal window failed"
            ),
        }
        window_start = window_end;
    }

    info!(account, stored, "Closed-deal sync finished");
    ctx.bus.broadcast(Event::ClosedDealsUpdate);
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, next_event};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use workbench_broker::SimBroker;
    use workbench_core::Store;
    use workbench_store::MemoryStore;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, d, 12, 0, 0).unwrap()
    }

    fn deal(id: i64, ts: DateTime<Utc>, profit: Decimal) -> ClosedDeal {
        ClosedDeal {
            deal_id: id,
            ts,
            symbol: "EURUSD".into(),
            profit,
            commission: dec!(-1),
            swap: dec!(0),
            volume: dec!(0.1),
            entry: 1,
            order: id * 10,
            comment: String::new(),
        }
    }

    #[test]
    fn test_cumulative_pnl_with_seed() {
        let deals = vec![deal(1, day(2), dec!(11)), deal(2, day(3), dec!(-4))];
        let points = cumulative_pnl(&deals, Some((day(1), dec!(1000))));
        assert_eq!(points.len(), 3);
        assert!(points[0].synthetic);
        assert_eq!(points[1].cum, 1010.0);
        assert_eq!(points[2].net, -5.0);
        assert_eq!(points[2].cum, 1005.0);
    }

    #[test]
    fn test_merge_prefers_broker_rows() {
        let stored = vec![deal(1, day(2), dec!(5)), deal(3, day(1), dec!(1))];
        let merged = merge_deals(stored, &[deal(1, day(2), dec!(7)), deal(2, day(4), dec!(2))]);
        let ids: Vec<i64> = merged.iter().map(|d| d.deal_id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
        assert_eq!(merged[1].profit, dec!(7));
    }

    #[tokio::test]
    async fn test_poll_balance_stores_and_announces() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(Arc::new(SimBroker::new()), store.clone());
        let mut sub = ctx.bus.subscribe(None);

        let snapshot = poll_balance(&ctx).await.unwrap();
        match next_event(&mut sub).await {
            Event::BalanceUpdate(e) => {
                assert_eq!(e.account, snapshot.account_id);
                assert_eq!(e.user, "default");
            }
            other => panic!("unexpected {:?}", other),
        }

        let series = balance_series(&ctx, None, None, 10, false).await.unwrap();
        assert_eq!(series.points.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_deals_report_upserts_broker_rows() {
        let store = Arc::new(MemoryStore::new());
        let sim = Arc::new(SimBroker::new());
        sim.script_deals(vec![deal(1, day(2), dec!(11)), deal(2, day(5), dec!(3))]);
        let ctx = context(sim, store.clone());

        let report = closed_deals_report(&ctx, day(1), day(4), false).await.unwrap();
        assert_eq!(report.count, 1);
        assert_eq!(report.total, 10.0);
        let account = report.account;
        assert_eq!(store.list_closed_deals(account, day(1), day(4)).await.unwrap().len(), 1);

        let err = closed_deals_report(&ctx, day(4), day(1), false).await.unwrap_err();
        assert!(matches!(err, WorkbenchError::InvalidRange(_)));
    }

    #[tokio::test]
    async fn test_sync_walks_windows_and_announces() {
        let store = Arc::new(MemoryStore::new());
        let sim = Arc::new(SimBroker::new());
        let now = day(20);
        sim.script_deals(vec![
            deal(1, now - Duration::days(700), dec!(2)),
            deal(2, now - Duration::days(3), dec!(1)),
        ]);
        let ctx = context(sim, store.clone());
        let mut sub = ctx.bus.subscribe(None);

        let stored = sync_closed_deals(&ctx, now, 90).await.unwrap();
        assert_eq!(stored, 2);
        assert_eq!(next_event(&mut sub).await, Event::ClosedDealsUpdate);
    }

    #[tokio::test]
    async fn test_sync_oversized_step_is_one_window() {
        let store = Arc::new(MemoryStore::new());
        let sim = Arc::new(SimBroker::new());
        let now = day(20);
        sim.script_deals(vec![
            deal(1, now - Duration::days(1500), dec!(2)),
            deal(2, now - Duration::days(3), dec!(1)),
        ]);
        let ctx = context(sim, store.clone());
        let mut sub = ctx.bus.subscribe(None);

        let stored = sync_closed_deals(&ctx, now, i64::MAX).await.unwrap();
        assert_eq!(stored, 2);
        assert_eq!(next_event(&mut sub).await, Event::ClosedDealsUpdate);
    }
}
