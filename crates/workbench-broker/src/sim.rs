//! Deterministic simulated terminal.
//!
//! Serves scripted bars where provided and otherwise synthesizes a smooth
//! series on the timeframe grid. Failures can be injected per operation.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use workbench_core::{
    AccountInfo, Bar, Broker, BrokerError, ClosedDeal, MarketOrder, OrderResult, Position, Side,
    Tick, Timeframe,
};

/// Most bars a single synthetic request produces.
const MAX_SYNTHETIC_BARS: usize = 50_000;

#[derive(Default)]
struct SimState {
    scripted: HashMap<(String, Timeframe), Vec<Bar>>,
    positions: Vec<Position>,
    deals: Vec<ClosedDeal>,
    calls: Vec<String>,
    next_ticket: i64,
    now: Option<DateTime<Utc>>,
    fail_init: usize,
}

/// Simulated broker used by tests and offline runs.
pub struct SimBroker {
    state: Mutex<SimState>,
    init_calls: AtomicUsize,
    unavailable: AtomicBool,
    fail_since: AtomicBool,
    account: AccountInfo,
}

impl Default for SimBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBroker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                next_ticket: 1000,
                ..Default::default()
            }),
            init_calls: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
            fail_since: AtomicBool::new(false),
            account: AccountInfo {
                login: 5001,
                balance: dec!(10000),
                equity: dec!(10000),
                margin: Decimal::ZERO,
                margin_free: dec!(10000),
                currency: "USD".to_string(),
            },
        }
    }

    /// Pin the terminal clock used for synthetic bars.
    pub fn with_now(self, now: DateTime<Utc>) -> Self {
        self.lock().now = Some(now);
        self
    }

    pub fn with_account(mut self, account: AccountInfo) -> Self {
        self.account = account;
        self
    }

    /// Serve exactly these bars for their (symbol, timeframe).
    pub fn script_bars(&self, bars: Vec<Bar>) {
        let mut state = self.lock();
        for bar in bars {
            state
                .scripted
                .entry((bar.symbol.clone(), bar.timeframe))
                .or_default()
                .push(bar);
        }
        for series in state.scripted.values_mut() {
            series.sort_by_key(|b| b.ts);
            series.dedup_by_key(|b| b.ts);
        }
    }

    pub fn script_deals(&self, deals: Vec<ClosedDeal>) {
        self.lock().deals.extend(deals);
    }

    /// Fail the next `times` initialization attempts.
    pub fn fail_init(&self, times: usize) {
        self.lock().fail_init = times;
    }

    /// Every call reports a lost terminal.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// `fetch_bars_since` fails with a request error.
    pub fn set_fail_since(&self, fail: bool) {
        self.fail_since.store(fail, Ordering::SeqCst);
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    /// Log of calls as `op:symbol:timeframe`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self) -> Result<(), BrokerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("terminal not connected".to_string()));
        }
        Ok(())
    }

    fn record(&self, op: &str, symbol: &str, timeframe: Timeframe) {
        self.lock()
            .calls
            .push(format!("{}:{}:{}", op, symbol, timeframe));
    }

    fn now(&self) -> DateTime<Utc> {
        self.lock().now.unwrap_or_else(Utc::now)
    }

    fn check_timeframe(timeframe: Timeframe) -> Result<(), BrokerError> {
        if timeframe.is_derived() {
            return Err(BrokerError::Rejected(format!(
                "timeframe {} not offered by the terminal",
                timeframe
            )));
        }
        Ok(())
    }

    /// Bars for (symbol, timeframe) with `start <= ts <= end`, capped to the
    /// newest `limit`.
    fn series(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: Option<DateTime<Utc>>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Vec<Bar> {
        let scripted = self
            .lock()
            .scripted
            .get(&(symbol.to_string(), timeframe))
            .cloned();

        let mut bars = match scripted {
            Some(bars) => bars
                .into_iter()
                .filter(|b| b.ts <= end && start.map_or(true, |s| b.ts >= s))
                .collect(),
            None => synthesize(symbol, timeframe, start, end, limit),
        };
        if bars.len() > limit {
            bars.drain(..bars.len() - limit);
        }
        bars
    }
}

fn base_price(symbol: &str) -> f64 {
    if symbol.starts_with("XAU") {
        2000.0
    } else if symbol.ends_with("JPY") {
        150.0
    } else if symbol.len() <= 5 {
        100.0
    } else {
        1.1
    }
}

fn price(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO).round_dp(5)
}

/// Grid-aligned synthetic bars ending at `end`.
fn synthesize(
    symbol: &str,
    timeframe: Timeframe,
    start: Option<DateTime<Utc>>,
    end: DateTime<Utc>,
    limit: usize,
) -> Vec<Bar> {
    let last = timeframe.floor(end);
    let first = match start {
        Some(start) => {
            let floored = timeframe.floor(start);
            if floored < start {
                timeframe.advance(floored, 1)
            } else {
                floored
            }
        }
        None => timeframe.advance(last, -(limit.saturating_sub(1) as i64)),
    };

    let base = base_price(symbol);
    let mut bars = Vec::new();
    let mut ts = first;
    while ts <= last && bars.len() < MAX_SYNTHETIC_BARS {
        let i = ts.timestamp() / timeframe.fixed_secs().unwrap_or(2_592_000);
        let phase = i as f64 * 0.3;
        let open = base * (1.0 + 0.01 * phase.sin());
        let close = base * (1.0 + 0.01 * (phase + 0.3).sin());
        let wiggle = base * 0.002;
        bars.push(
            Bar::new(
                symbol,
                timeframe,
                ts,
                price(open),
                price(open.max(close) + wiggle),
                price(open.min(close) - wiggle),
                price(close),
            )
            .with_volume(100 + (i.rem_euclid(50)), 2, 0),
        );
        ts = timeframe.advance(ts, 1);
    }
    bars
}

impl Broker for SimBroker {
    fn initialize(&self) -> Result<(), BrokerError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        if state.fail_init > 0 {
            state.fail_init -= 1;
            return Err(BrokerError::Unavailable("terminal refused connection".to_string()));
        }
        drop(state);
        self.check()
    }

    fn fetch_bars(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Bar>, BrokerError> {
        self.check()?;
        Self::check_timeframe(timeframe)?;
        self.record("count", symbol, timeframe);
        Ok(self.series(symbol, timeframe, None, self.now(), count))
    }

    fn fetch_bars_since(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: DateTime<Utc>,
    ) -> Result<Vec<Bar>, BrokerError> {
        self.check()?;
        Self::check_timeframe(timeframe)?;
        self.record("since", symbol, timeframe);
        if self.fail_since.load(Ordering::SeqCst) {
            return Err(BrokerError::Request("history request timed out".to_string()));
        }
        let bars = self.series(
            symbol,
            timeframe,
            Some(since + Duration::seconds(1)),
            self.now(),
            MAX_SYNTHETIC_BARS,
        );
        Ok(bars.into_iter().filter(|b| b.ts > since).collect())
    }

    fn fetch_bars_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, BrokerError> {
        self.check()?;
        Self::check_timeframe(timeframe)?;
        self.record("range", symbol, timeframe);
        let end = end.min(self.now());
        Ok(self.series(symbol, timeframe, Some(start), end, MAX_SYNTHETIC_BARS))
    }

    fn tick(&self, symbol: &str) -> Result<Tick, BrokerError> {
        self.check()?;
        let now = self.now();
        let last = self
            .series(symbol, Timeframe::M1, None, now, 1)
            .pop()
            .and_then(|b| b.close_f64())
            .unwrap_or_else(|| base_price(symbol));
        let digits = if base_price(symbol) >= 100.0 { 2 } else { 5 };
        let point = 10f64.powi(-(digits as i32));
        Ok(Tick {
            symbol: symbol.to_string(),
            bid: last,
            ask: last + 2.0 * point,
            last,
            time: now,
            digits,
            point,
            contract_size: if symbol.starts_with("XAU") { 100.0 } else { 100_000.0 },
            min_volume: 0.01,
            volume_step: 0.01,
        })
    }

    fn account_info(&self) -> Result<AccountInfo, BrokerError> {
        self.check()?;
        Ok(self.account.clone())
    }

    fn positions_for(&self, symbol: &str) -> Result<Vec<Position>, BrokerError> {
        self.check()?;
        Ok(self
            .lock()
            .positions
            .iter()
            .filter(|p| p.symbol == symbol)
            .cloned()
            .collect())
    }

    fn list_positions_all(&self) -> Result<Vec<Position>, BrokerError> {
        self.check()?;
        Ok(self.lock().positions.clone())
    }

    fn place_market(&self, order: &MarketOrder) -> Result<OrderResult, BrokerError> {
        self.check()?;
        if order.volume <= Decimal::ZERO {
            return Err(BrokerError::Rejected("volume must be positive".to_string()));
        }
        let tick = self.tick(&order.symbol)?;
        let fill = match order.side {
            Side::Buy => tick.ask,
            Side::Sell => tick.bid,
        };
        let fill = price(fill);

        let mut state = self.lock();
        state.next_ticket += 1;
        let ticket = state.next_ticket;
        state.positions.push(Position {
            ticket,
            symbol: order.symbol.clone(),
            side: order.side,
            volume: order.volume,
            price_open: fill,
            price_current: fill,
            sl: order.sl,
            tp: order.tp,
            profit: Decimal::ZERO,
            opened_at: tick.time,
        });
        Ok(OrderResult {
            retcode: 10009,
            order: Some(ticket),
            deal: Some(ticket),
            volume: order.volume,
            price: Some(fill),
            comment: "done".to_string(),
        })
    }

    fn close_all_for(&self, symbol: &str, side: Option<Side>) -> Result<Vec<OrderResult>, BrokerError> {
        self.check()?;
        let now = self.now();
        let mut state = self.lock();
        let (closing, keep): (Vec<Position>, Vec<Position>) = state
            .positions
            .drain(..)
            .partition(|p| p.symbol == symbol && side.map_or(true, |s| p.side == s));
        state.positions = keep;

        let mut results = Vec::with_capacity(closing.len());
        for p in closing {
            state.next_ticket += 1;
            let deal_id = state.next_ticket;
            state.deals.push(ClosedDeal {
                deal_id,
                ts: now,
                symbol: p.symbol.clone(),
                profit: p.profit,
                commission: Decimal::ZERO,
                swap: Decimal::ZERO,
                volume: p.volume,
                entry: 1,
                order: deal_id,
                comment: "close".to_string(),
            });
            results.push(OrderResult {
                retcode: 10009,
                order: Some(deal_id),
                deal: Some(deal_id),
                volume: p.volume,
                price: Some(p.price_current),
                comment: "closed".to_string(),
            });
        }
        Ok(results)
    }

    fn closed_deals(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<ClosedDeal>, BrokerError> {
        self.check()?;
        let mut deals: Vec<ClosedDeal> = self
            .lock()
            .deals
            .iter()
            .filter(|d| d.ts >= from && d.ts <= to)
            .cloned()
            .collect();
        deals.sort_by_key(|d| d.ts);
        Ok(deals)
    }

    fn name(&self) -> &str {
        "sim"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 12, 10, 37, 0).unwrap()
    }

    #[test]
    fn test_synthetic_bars_on_grid() {
        let sim = SimBroker::new().with_now(now());
        let bars = sim.fetch_bars("EURUSD", Timeframe::H1, 500).unwrap();
        assert_eq!(bars.len(), 500);
        assert!(bars.iter().all(|b| b.is_consistent()));
        assert_eq!(bars.last().unwrap().ts, Utc.with_ymd_and_hms(2025, 3, 12, 10, 0, 0).unwrap());
        assert!(bars.windows(2).all(|w| w[0].ts < w[1].ts));
    }

    #[test]
    fn test_since_is_exclusive() {
        let sim = SimBroker::new().with_now(now());
        let since = Utc.with_ymd_and_hms(2025, 3, 12, 7, 0, 0).unwrap();
        let bars = sim.fetch_bars_since("EURUSD", Timeframe::H1, since).unwrap();
        assert_eq!(bars.len(), 3);
        assert!(bars.iter().all(|b| b.ts > since));
    }

    #[test]
    fn test_scripted_monthly_bars() {
        let sim = SimBroker::new().with_now(now());
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        sim.script_bars(vec![Bar::new(
            "XAUUSD",
            Timeframe::MN1,
            ts,
            dec!(2000),
            dec!(2100),
            dec!(1990),
            dec!(2050),
        )]);
        let bars = sim.fetch_bars("XAUUSD", Timeframe::MN1, 10).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, dec!(2050));
        assert!(sim.fetch_bars("XAUUSD", Timeframe::Y1, 2).is_err());
    }

    #[test]
    fn test_faults() {
        let sim = SimBroker::new().with_now(now());
        sim.set_fail_since(true);
        assert!(matches!(
            sim.fetch_bars_since("EURUSD", Timeframe::H1, now() - Duration::hours(5)),
            Err(BrokerError::Request(_))
        ));
        sim.set_unavailable(true);
        assert!(sim.account_info().unwrap_err().is_unavailable());
    }

    #[test]
    fn test_order_round_trip() {
        let sim = SimBroker::new().with_now(now());
        let result = sim
            .place_market(&MarketOrder::new("EURUSD", Side::Buy, dec!(0.10)))
            .unwrap();
        assert_eq!(result.retcode, 10009);
        assert_eq!(sim.list_positions(Some("EURUSD")).unwrap().len(), 1);

        let closed = sim.close_all(None).unwrap();
        assert_eq!(closed.len(), 1);
        assert!(sim.list_positions_all().unwrap().is_empty());
        assert_eq!(sim.closed_deals(now() - Duration::hours(1), now()).unwrap().len(), 1);
    }
}
