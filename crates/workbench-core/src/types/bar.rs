//! OHLC bar types.

use chrono::{DateTime, Utc};
use num_traits::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{iso8601, Timeframe};

/// One timeframe-aligned OHLC record of a symbol.
///
/// Identified by (symbol, timeframe, ts). Prices are exact decimals as
/// delivered by the terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Bar open time, UTC, on the timeframe grid
    pub ts: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub tick_volume: Option<i64>,
    pub spread: Option<i32>,
    pub real_volume: Option<i64>,
}

impl Bar {
    /// Create a new bar without volume fields.
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        ts: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            ts,
            open,
            high,
            low,
            close,
            tick_volume: None,
            spread: None,
            real_volume: None,
        }
    }

    /// Attach volume and spread fields.
    pub fn with_volume(mut self, tick_volume: i64, spread: i32, real_volume: i64) -> Self {
        self.tick_volume = Some(tick_volume);
        self.spread = Some(spread);
        self.real_volume = Some(real_volume);
        self
    }

    /// Check `low <= open, close <= high` and grid alignment.
    pub fn is_consistent(&self) -> bool {
        self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
            && self.timeframe.is_aligned(self.ts)
    }

    /// Close as a float, `None` when it cannot be represented finitely.
    pub fn close_f64(&self) -> Option<f64> {
        self.close.to_f64().filter(|v| v.is_finite())
    }

    /// Transport form: floats and ISO-8601 timestamps.
    pub fn to_view(&self) -> BarView {
        BarView {
            ts: iso8601(self.ts),
            open: self.open.to_f64().unwrap_or(f64::NAN),
            high: self.high.to_f64().unwrap_or(f64::NAN),
            low: self.low.to_f64().unwrap_or(f64::NAN),
            close: self.close.to_f64().unwrap_or(f64::NAN),
            tick_volume: self.tick_volume,
            spread: self.spread,
            real_volume: self.real_volume,
        }
    }
}

/// Bar as served to the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarView {
    pub ts: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub tick_volume: Option<i64>,
    pub spread: Option<i32>,
    pub real_volume: Option<i64>,
}

/// Stored extent of a (symbol, timeframe) series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarCoverage {
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub rows_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn bar(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Bar {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        Bar::new("EURUSD", Timeframe::H1, ts, open, high, low, close)
    }

    #[test]
    fn test_bar_consistency() {
        assert!(bar(dec!(1.10), dec!(1.12), dec!(1.09), dec!(1.11)).is_consistent());
        assert!(!bar(dec!(1.10), dec!(1.105), dec!(1.09), dec!(1.11)).is_consistent());

        let mut off_grid = bar(dec!(1.10), dec!(1.12), dec!(1.09), dec!(1.11));
        off_grid.ts = off_grid.ts + chrono::Duration::minutes(7);
        assert!(!off_grid.is_consistent());
    }

    #[test]
    fn test_bar_view() {
        let view = bar(dec!(1.10), dec!(1.12), dec!(1.09), dec!(1.11))
            .with_volume(120, 3, 0)
            .to_view();
        assert_eq!(view.ts, "2024-03-01T10:00:00Z");
        assert!((view.close - 1.11).abs() < 1e-12);
        assert_eq!(view.tick_volume, Some(120));
        assert_eq!(view.spread, Some(3));
    }
}
