//! Fixtures shared by the engine tests.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use workbench_broker::SimBroker;
use workbench_config::Settings;
use workbench_core::{Bar, Timeframe};
use workbench_monitor::{Event, EventMessage, Subscription};
use workbench_store::MemoryStore;

use crate::context::Context;
use crate::news::DisabledNewsSource;

pub(crate) fn context(sim: Arc<SimBroker>, store: Arc<MemoryStore>) -> Context {
    Context::new(store, sim, Arc::new(DisabledNewsSource), Settings::default())
}

fn price(i: usize) -> Decimal {
    // a saw-tooth over a slow drift so STL has something to separate
    Decimal::new(2000_00 + (i as i64) * 15 + ((i % 7) as i64) * 40, 2)
}

fn bar(symbol: &str, timeframe: Timeframe, ts: DateTime<Utc>, i: usize) -> Bar {
    let open = price(i);
    let close = price(i + 1);
    let high = open.max(close) + Decimal::new(250, 2);
    let low = open.min(close) - Decimal::new(250, 2);
    Bar::new(symbol, timeframe, ts, open, high, low, close).with_volume(100 + i as i64, 12, 0)
}

/// `n` monthly bars from January of `start_year`, first of each month.
pub(crate) fn monthly_bars(symbol: &str, start_year: i32, n: usize) -> Vec<Bar> {
    (0..n)
        .map(|i| {
            let months = start_year * 12 + i as i32;
            let ts = Utc
                .with_ymd_and_hms(months / 12, (months % 12) as u32 + 1, 1, 0, 0, 0)
                .unwrap();
            bar(symbol, Timeframe::MN1, ts, i)
        })
        .collect()
}

/// `n` consecutive H1 bars starting at `start`.
pub(crate) fn hourly_bars(symbol: &str, start: DateTime<Utc>, n: usize) -> Vec<Bar> {
    (0..n)
        .map(|i| bar(symbol, Timeframe::H1, start + Duration::hours(i as i64), i))
        .collect()
}

/// Next event delivered to `sub`, failing the test after ten seconds.
pub(crate) async fn next_event(sub: &mut Subscription) -> Event {
    let frame = tokio::time::timeout(std::time::Duration::from_secs(10), sub.frames.recv())
        .await
        .expect("timed out waiting for event")
        .expect("bus closed");
    let message: EventMessage = serde_json::from_str(&frame).expect("event frame");
    message.event
}
