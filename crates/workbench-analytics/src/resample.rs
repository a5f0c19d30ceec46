//! Calendar resampling of bar series.

use chrono::Datelike;
use std::collections::BTreeMap;
use workbench_core::{Bar, Timeframe};

/// Aggregate monthly bars into one bar per UTC calendar year.
///
/// Open is the first month's open, close the last month's close, high and
/// low the extremes, volumes are summed and spread is the last non-zero
/// value. Each yearly bar is stamped 1 January 00:00 UTC. Input order does
/// not matter. When `count` is given only the newest `count` years are kept.
pub fn aggregate_yearly(monthly: &[Bar], count: Option<usize>) -> Vec<Bar> {
    let mut sorted: Vec<&Bar> = monthly.iter().collect();
    sorted.sort_by_key(|b| b.ts);

    let mut years: BTreeMap<i32, Bar> = BTreeMap::new();
    for bar in sorted {
        match years.get_mut(&bar.ts.year()) {
            Some(acc) => {
                acc.high = acc.high.max(bar.high);
                acc.low = acc.low.min(bar.low);
                acc.close = bar.close;
                acc.tick_volume = add_volume(acc.tick_volume, bar.tick_volume);
                acc.real_volume = add_volume(acc.real_volume, bar.real_volume);
                if let Some(spread) = bar.spread.filter(|s| *s != 0) {
                    acc.spread = Some(spread);
                }
            }
            None => {
                let mut first = bar.clone();
                first.timeframe = Timeframe::Y1;
                first.ts = Timeframe::Y1.floor(bar.ts);
                first.spread = bar.spread.filter(|s| *s != 0);
                years.insert(bar.ts.year(), first);
            }
        }
    }

    let mut bars: Vec<Bar> = years.into_values().collect();
    if let Some(count) = count {
        if bars.len() > count {
            bars.drain(..bars.len() - count);
        }
    }
    bars
}

fn add_volume(acc: Option<i64>, next: Option<i64>) -> Option<i64> {
    match (acc, next) {
        (Some(a), Some(b)) => Some(a.saturating_add(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn month(year: i32, month: u32, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Bar {
        let ts = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).unwrap();
        Bar::new("XAUUSD", Timeframe::MN1, ts, open, high, low, close).with_volume(100, 0, 10)
    }

    fn three_years() -> Vec<Bar> {
        let mut bars = Vec::new();
        for year in 2023..=2025 {
            for m in 1..=12u32 {
                let base = Decimal::from(year - 2000) * dec!(100) + Decimal::from(m);
                bars.push(month(year, m, base, base + dec!(5), base - dec!(5), base + dec!(1)));
            }
        }
        bars
    }

    #[test]
    fn test_yearly_last_two() {
        let yearly = aggregate_yearly(&three_years(), Some(2));
        assert_eq!(yearly.len(), 2);

        let y2024 = &yearly[0];
        assert_eq!(y2024.timeframe, Timeframe::Y1);
        assert_eq!(y2024.ts, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(y2024.open, dec!(2401));
        assert_eq!(y2024.close, dec!(2413));
        assert_eq!(y2024.high, dec!(2417));
        assert_eq!(y2024.low, dec!(2396));
        assert_eq!(y2024.tick_volume, Some(1200));
        assert_eq!(y2024.real_volume, Some(120));

        assert_eq!(yearly[1].ts.year(), 2025);
        assert_eq!(yearly[1].close, dec!(2513));
    }

    #[test]
    fn test_unsorted_input_and_spread() {
        let mut bars = vec![
            month(2024, 3, dec!(3), dec!(9), dec!(1), dec!(4)),
            month(2024, 1, dec!(1), dec!(2), dec!(0.5), dec!(2)),
            month(2024, 2, dec!(2), dec!(3), dec!(1.5), dec!(3)),
        ];
        bars[1].spread = Some(7);
        bars[0].spread = Some(0);

        let yearly = aggregate_yearly(&bars, None);
        assert_eq!(yearly.len(), 1);
        assert_eq!(yearly[0].open, dec!(1));
        assert_eq!(yearly[0].close, dec!(4));
        assert_eq!(yearly[0].high, dec!(9));
        assert_eq!(yearly[0].low, dec!(0.5));
        assert_eq!(yearly[0].spread, Some(7));
        assert!(yearly[0].is_consistent());
    }

    #[test]
    fn test_empty_input() {
        assert!(aggregate_yearly(&[], Some(3)).is_empty());
    }
}
