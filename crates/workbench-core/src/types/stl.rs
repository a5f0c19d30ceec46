//! Persisted STL decomposition runs.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{BarCoverage, Timeframe};

/// Metadata for a run about to be created.
#[derive(Debug, Clone, PartialEq)]
pub struct NewStlRun {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub period: i32,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
}

/// An immutable, stored decomposition of a close series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StlRun {
    pub id: i64,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub period: i32,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub rows_count: i64,
    pub created_at: DateTime<Utc>,
}

impl StlRun {
    /// Whether the run's window encloses the whole stored dataset.
    pub fn covers(&self, coverage: &BarCoverage) -> bool {
        self.start_ts <= coverage.start_ts && self.end_ts >= coverage.end_ts
    }

    /// Whether the run was computed over (almost exactly) the given window.
    pub fn matches_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        let tolerance = Duration::seconds(1);
        (self.start_ts - start).abs() <= tolerance && (self.end_ts - end).abs() <= tolerance
    }
}

/// One decomposed sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StlPoint {
    pub ts: DateTime<Utc>,
    pub close: f64,
    pub trend: f64,
    pub seasonal: f64,
    pub resid: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn run(start: DateTime<Utc>, end: DateTime<Utc>) -> StlRun {
        StlRun {
            id: 1,
            symbol: "XAUUSD".into(),
            timeframe: Timeframe::H1,
            period: 24,
            start_ts: start,
            end_ts: end,
            rows_count: 100,
            created_at: end,
        }
    }

    #[test]
    fn test_covers_and_matches() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let r = run(start, end);

        let inner = BarCoverage {
            start_ts: start + Duration::hours(1),
            end_ts: end,
            rows_count: 90,
        };
        assert!(r.covers(&inner));

        let extended = BarCoverage {
            start_ts: start,
            end_ts: end + Duration::hours(1),
            rows_count: 101,
        };
        assert!(!r.covers(&extended));

        assert!(r.matches_window(start + Duration::milliseconds(500), end));
        assert!(!r.matches_window(start + Duration::seconds(2), end));
    }
}
