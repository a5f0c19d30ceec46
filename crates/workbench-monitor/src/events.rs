//! Push events sent to websocket subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use workbench_core::{iso8601, Timeframe};

/// Outcome of a bar fetch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Scheduled,
    #[default]
    Ok,
    Completed,
    Error,
}

/// Outcome of an STL job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StlStatus {
    Scheduled,
    #[default]
    Completed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NewsStatus {
    Refreshed,
    #[default]
    Updated,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FetchEvent {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Requested mode
    pub mode: String,
    /// Mode actually executed, unknown until the job ran
    pub fetch_mode: Option<String>,
    pub inserted: usize,
    pub fetched: usize,
    pub scope: String,
    pub background: bool,
    pub status: FetchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StlEvent {
    pub symbol: String,
    pub timeframe: Timeframe,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<usize>,
    pub status: StlStatus,
    pub scope: String,
    pub background: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_ts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_ts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NewsEvent {
    pub symbol: String,
    pub status: NewsStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub background: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BalanceEvent {
    pub user: String,
    pub account: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
}

/// Event payload, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Hello { symbols: Vec<String> },
    FetchComplete(FetchEvent),
    StlComplete(StlEvent),
    NewsUpdate(NewsEvent),
    BalanceUpdate(BalanceEvent),
    /// Prompt to refetch the closed-deal list
    ClosedDealsUpdate,
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Hello { .. } => "hello",
            Event::FetchComplete(_) => "fetch_complete",
            Event::StlComplete(_) => "stl_complete",
            Event::NewsUpdate(_) => "news_update",
            Event::BalanceUpdate(_) => "balance_update",
            Event::ClosedDealsUpdate => "closed_deals_update",
        }
    }
}

/// Wire frame: the event plus its send time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    pub ts: String,
    #[serde(flatten)]
    pub event: Event,
}

impl EventMessage {
    pub fn at(event: Event, ts: DateTime<Utc>) -> Self {
        Self {
            ts: iso8601(ts),
            event,
        }
    }

    pub fn now(event: Event) -> Self {
        Self::at(event, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::{json, Value};

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn test_fetch_complete_shape() {
        let event = Event::FetchComplete(FetchEvent {
            symbol: "EURUSD".into(),
            timeframe: Timeframe::H1,
            mode: "inc".into(),
            fetch_mode: Some("full".into()),
            inserted: 500,
            fetched: 500,
            scope: "single".into(),
            background: false,
            status: FetchStatus::Ok,
            note: None,
            error: None,
        });
        let value: Value = serde_json::to_value(EventMessage::at(event, ts())).unwrap();
        assert_eq!(value["type"], "fetch_complete");
        assert_eq!(value["ts"], "2025-01-02T03:04:05Z");
        assert_eq!(value["timeframe"], "H1");
        assert_eq!(value["status"], "ok");
        assert_eq!(value["inserted"], 500);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_unit_and_hello_shapes() {
        let value = serde_json::to_value(EventMessage::at(Event::ClosedDealsUpdate, ts())).unwrap();
        assert_eq!(value, json!({"type": "closed_deals_update", "ts": "2025-01-02T03:04:05Z"}));

        let hello = Event::Hello {
            symbols: vec!["XAUUSD".into()],
        };
        let value = serde_json::to_value(EventMessage::at(hello, ts())).unwrap();
        assert_eq!(value["symbols"], json!(["XAUUSD"]));
    }

    #[test]
    fn test_decode_frame() {
        let raw = r#"{"type":"stl_complete","ts":"2025-01-02T03:04:05Z","symbol":"XAUUSD",
            "timeframe":"H1","period":24,"status":"completed","scope":"current",
            "background":true,"run_id":7,"points":500}"#;
        let message: EventMessage = serde_json::from_str(raw).unwrap();
        match message.event {
            Event::StlComplete(stl) => {
                assert_eq!(stl.run_id, Some(7));
                assert_eq!(stl.status, StlStatus::Completed);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
