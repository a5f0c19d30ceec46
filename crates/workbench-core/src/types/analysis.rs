//! LLM analysis runs and the signal-trade log.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{parse_utc, AnalysisKind, Side};

/// Strategy file that produces the technical snapshot runs.
pub const TECH_SNAPSHOT_STRATEGY: &str = "tech_snapshot_10q.json";

/// A stored analysis ("health check") run.
///
/// `answers_json` is opaque except for `meta.last_used_news_ts`,
/// `meta.last_bar_ts` and `meta.timeframe`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub id: i64,
    pub kind: AnalysisKind,
    pub symbol: String,
    pub base_ccy: Option<String>,
    pub quote_ccy: Option<String>,
    pub strategy: String,
    pub created_at: DateTime<Utc>,
    /// Urls of the news articles the run consumed
    #[serde(default)]
    pub news_ids: Vec<String>,
    #[serde(default)]
    pub answers_json: Value,
}

impl AnalysisRun {
    /// Runs produced from bar snapshots rather than news.
    pub fn is_tech(&self) -> bool {
        self.strategy.to_lowercase().starts_with("tech")
    }

    /// String field under `answers_json.meta`.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.answers_json.get("meta")?.get(key)?.as_str()
    }

    /// Timestamp field under `answers_json.meta`, if present and parseable.
    pub fn meta_ts(&self, key: &str) -> Option<DateTime<Utc>> {
        self.meta_str(key).and_then(parse_utc)
    }
}

/// Insert form of [`AnalysisRun`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAnalysisRun {
    pub kind: AnalysisKind,
    pub symbol: String,
    pub base_ccy: Option<String>,
    pub quote_ccy: Option<String>,
    pub strategy: String,
    #[serde(default)]
    pub news_ids: Vec<String>,
    #[serde(default)]
    pub answers_json: Value,
    /// Defaults to now when absent
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Filter for listing runs.
///
/// `symbol` matches either the run's symbol or, when `base`/`quote` are set,
/// the run's currency legs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisRunFilter {
    pub kind: Option<AnalysisKind>,
    pub symbol: Option<String>,
    pub base: Option<String>,
    pub quote: Option<String>,
    pub strategy: Option<String>,
}

impl AnalysisRunFilter {
    pub fn matches(&self, run: &AnalysisRun) -> bool {
        if self.kind.is_some_and(|k| k != run.kind) {
            return false;
        }
        if let Some(strategy) = &self.strategy {
            if &run.strategy != strategy {
                return false;
            }
        }
        match (&self.symbol, &self.base, &self.quote) {
            (None, _, _) => true,
            (Some(symbol), base, quote) => {
                let by_symbol = run.symbol.eq_ignore_ascii_case(symbol);
                let by_legs = base.is_some()
                    && quote.is_some()
                    && run.base_ccy.as_deref() == base.as_deref()
                    && run.quote_ccy.as_deref() == quote.as_deref();
                by_symbol || by_legs
            }
        }
    }
}

/// Entry of the strategy signal-trade log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalTrade {
    pub ts: DateTime<Utc>,
    pub symbol: String,
    pub strategy: String,
    pub side: Side,
    pub volume: Decimal,
    pub price: Option<Decimal>,
    pub sl: Option<Decimal>,
    pub tp: Option<Decimal>,
    pub retcode: Option<i32>,
    pub comment: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn run(strategy: &str, answers: Value) -> AnalysisRun {
        AnalysisRun {
            id: 1,
            kind: AnalysisKind::ForexPair,
            symbol: "EURUSD".into(),
            base_ccy: Some("EUR".into()),
            quote_ccy: Some("USD".into()),
            strategy: strategy.into(),
            created_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            news_ids: vec![],
            answers_json: answers,
        }
    }

    #[test]
    fn test_meta_access() {
        let r = run(
            "health_basic.json",
            json!({"meta": {"last_used_news_ts": "2024-06-01T08:00:00Z", "timeframe": "H1"}}),
        );
        assert_eq!(
            r.meta_ts("last_used_news_ts"),
            Some(Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap())
        );
        assert_eq!(r.meta_str("timeframe"), Some("H1"));
        assert_eq!(r.meta_ts("last_bar_ts"), None);
        assert!(!r.is_tech());
        assert!(run(TECH_SNAPSHOT_STRATEGY, Value::Null).is_tech());
    }

    #[test]
    fn test_filter_by_legs() {
        let mut r = run("basic.json", Value::Null);
        r.symbol = "EURUSDm".into();
        let filter = AnalysisRunFilter {
            kind: Some(AnalysisKind::ForexPair),
            symbol: Some("EURUSD".into()),
            base: Some("EUR".into()),
            quote: Some("USD".into()),
            strategy: None,
        };
        assert!(filter.matches(&r));

        let stock_filter = AnalysisRunFilter {
            kind: Some(AnalysisKind::Stock),
            ..Default::default()
        };
        assert!(!stock_filter.matches(&r));
    }
}
