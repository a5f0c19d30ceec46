//! Timeframe definitions for market data.

use chrono::{DateTime, Datelike, Duration, Months, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Timeframe for bars/candles.
///
/// `Y1` does not exist at the broker; it is materialized from `MN1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    #[default]
    H1,
    H4,
    D1,
    W1,
    MN1,
    Y1,
}

impl Timeframe {
    /// Canonical tag, as stored and as sent over the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "M1",
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::M30 => "M30",
            Timeframe::H1 => "H1",
            Timeframe::H4 => "H4",
            Timeframe::D1 => "D1",
            Timeframe::W1 => "W1",
            Timeframe::MN1 => "MN1",
            Timeframe::Y1 => "Y1",
        }
    }

    /// Get all available timeframes, shortest first.
    pub fn all() -> &'static [Timeframe] {
        &[
            Timeframe::M1,
            Timeframe::M5,
            Timeframe::M15,
            Timeframe::M30,
            Timeframe::H1,
            Timeframe::H4,
            Timeframe::D1,
            Timeframe::W1,
            Timeframe::MN1,
            Timeframe::Y1,
        ]
    }

    /// Whether the timeframe is derived locally rather than fetched.
    pub fn is_derived(&self) -> bool {
        matches!(self, Timeframe::Y1)
    }

    /// Check if this is an intraday timeframe.
    pub fn is_intraday(&self) -> bool {
        matches!(
            self,
            Timeframe::M1
                | Timeframe::M5
                | Timeframe::M15
                | Timeframe::M30
                | Timeframe::H1
                | Timeframe::H4
        )
    }

    /// Fixed bar length in seconds for grid-regular timeframes.
    ///
    /// Calendar timeframes (MN1, Y1) have no fixed length.
    pub fn fixed_secs(&self) -> Option<i64> {
        match self {
            Timeframe::M1 => Some(60),
            Timeframe::M5 => Some(300),
            Timeframe::M15 => Some(900),
            Timeframe::M30 => Some(1800),
            Timeframe::H1 => Some(3600),
            Timeframe::H4 => Some(14400),
            Timeframe::D1 => Some(86400),
            Timeframe::W1 => Some(604800),
            Timeframe::MN1 | Timeframe::Y1 => None,
        }
    }

    /// Default history window pulled by a backfill.
    pub fn default_backfill_days(&self) -> i64 {
        match self {
            Timeframe::Y1 => 3650,
            Timeframe::MN1 => 1825,
            Timeframe::W1 => 1000,
            Timeframe::D1 => 2000,
            Timeframe::H1 | Timeframe::H4 => 365,
            Timeframe::M1 | Timeframe::M5 | Timeframe::M15 | Timeframe::M30 => 30,
        }
    }

    /// Default STL season length in bars.
    pub fn default_stl_period(&self) -> usize {
        match self {
            Timeframe::M1 => 1440,
            Timeframe::M5 => 288,
            Timeframe::M15 => 96,
            Timeframe::M30 => 48,
            Timeframe::H1 => 24,
            Timeframe::H4 => 6,
            Timeframe::D1 => 30,
            Timeframe::W1 => 26,
            Timeframe::MN1 => 12,
            Timeframe::Y1 => 10,
        }
    }

    /// Quantize a timestamp down to the start of its bar.
    ///
    /// W1 bars open Monday 00:00 UTC, MN1 on the first of the month and Y1
    /// on the first of January.
    pub fn floor(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Timeframe::D1 => midnight(ts.year(), ts.month(), ts.day()).unwrap_or(ts),
            Timeframe::W1 => {
                let back = i64::from(ts.weekday().num_days_from_monday());
                let monday = ts - Duration::days(back);
                midnight(monday.year(), monday.month(), monday.day()).unwrap_or(ts)
            }
            Timeframe::MN1 => midnight(ts.year(), ts.month(), 1).unwrap_or(ts),
            Timeframe::Y1 => midnight(ts.year(), 1, 1).unwrap_or(ts),
            _ => {
                let secs = self.fixed_secs().unwrap_or(60);
                let epoch = ts.timestamp();
                DateTime::from_timestamp(epoch - epoch.rem_euclid(secs), 0).unwrap_or(ts)
            }
        }
    }

    /// Move `n` bars forward (negative `n` moves backward) from a grid point.
    pub fn advance(&self, ts: DateTime<Utc>, n: i64) -> DateTime<Utc> {
        let months = match self {
            Timeframe::MN1 => n,
            Timeframe::Y1 => n * 12,
            _ => {
                let secs = self.fixed_secs().unwrap_or(60);
                return ts + Duration::seconds(secs * n);
            }
        };
        let step = Months::new(months.unsigned_abs().min(u64::from(u32::MAX)) as u32);
        let moved = if months >= 0 {
            ts.checked_add_months(step)
        } else {
            ts.checked_sub_months(step)
        };
        moved.unwrap_or(ts)
    }

    /// Whether a timestamp sits exactly on this timeframe's grid.
    pub fn is_aligned(&self, ts: DateTime<Utc>) -> bool {
        self.floor(ts) == ts
    }
}

fn midnight(year: i32, month: u32, day: u32) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).single()
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "M1" => Ok(Timeframe::M1),
            "M5" => Ok(Timeframe::M5),
            "M15" => Ok(Timeframe::M15),
            "M30" => Ok(Timeframe::M30),
            "H1" => Ok(Timeframe::H1),
            "H4" => Ok(Timeframe::H4),
            "D1" => Ok(Timeframe::D1),
            "W1" => Ok(Timeframe::W1),
            "MN1" | "MN" => Ok(Timeframe::MN1),
            "Y1" => Ok(Timeframe::Y1),
            _ => Err(format!("Invalid timeframe: {}", s)),
        }
    }
}
