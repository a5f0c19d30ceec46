//! HTTP bridge to the broker terminal.
//!
//! The terminal itself only exposes a local API; a small bridge process
//! translates it to JSON over HTTP. Every call here blocks and must run on
//! the executor's worker threads.

use chrono::{DateTime, Duration, Utc};
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;
use tracing::{debug, warn};
use workbench_core::{
    AccountInfo, Bar, Broker, BrokerError, ClosedDeal, MarketOrder, OrderResult, Position, Side,
    Tick, Timeframe,
};

/// Bridge connection configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub base_url: String,
    pub timeout: std::time::Duration,
    /// Added past the requested end of range fetches
    pub history_forward: Duration,
    /// Subtracted from the start of closed-deal queries
    pub history_back: Duration,
}

impl BridgeConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: std::time::Duration::from_secs(30),
            history_forward: Duration::hours(12),
            history_back: Duration::hours(12),
        }
    }

    pub fn with_history_buffers(mut self, forward_hours: i64, back_hours: i64) -> Self {
        self.history_forward = Duration::hours(forward_hours.max(0));
        self.history_back = Duration::hours(back_hours.max(0));
        self
    }
}

#[derive(Debug, Deserialize)]
struct BridgeBar {
    time: i64,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    #[serde(default)]
    tick_volume: Option<i64>,
    #[serde(default)]
    spread: Option<i32>,
    #[serde(default)]
    real_volume: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct BridgeTick {
    bid: f64,
    ask: f64,
    #[serde(default)]
    last: f64,
    time: i64,
    digits: u32,
    point: f64,
    trade_contract_size: f64,
    volume_min: f64,
    volume_step: f64,
}

#[derive(Debug, Deserialize)]
struct BridgeAccount {
    login: i64,
    balance: Decimal,
    equity: Decimal,
    margin: Decimal,
    margin_free: Decimal,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct BridgePosition {
    ticket: i64,
    symbol: String,
    /// 0 = buy, 1 = sell
    #[serde(rename = "type")]
    kind: i32,
    volume: Decimal,
    price_open: Decimal,
    price_current: Decimal,
    #[serde(default)]
    sl: Option<Decimal>,
    #[serde(default)]
    tp: Option<Decimal>,
    profit: Decimal,
    time: i64,
}

#[derive(Debug, Deserialize)]
struct BridgeDeal {
    ticket: i64,
    time: i64,
    symbol: String,
    profit: Decimal,
    #[serde(default)]
    commission: Decimal,
    #[serde(default)]
    swap: Decimal,
    volume: Decimal,
    entry: i32,
    #[serde(default)]
    order: i64,
    #[serde(default)]
    comment: String,
}

#[derive(Debug, Deserialize)]
struct BridgeOrderResult {
    retcode: i32,
    #[serde(default)]
    order: Option<i64>,
    #[serde(default)]
    deal: Option<i64>,
    #[serde(default)]
    volume: Decimal,
    #[serde(default)]
    price: Option<Decimal>,
    #[serde(default)]
    comment: String,
}

impl From<BridgeOrderResult> for OrderResult {
    fn from(r: BridgeOrderResult) -> Self {
        OrderResult {
            retcode: r.retcode,
            order: r.order.filter(|o| *o != 0),
            deal: r.deal.filter(|d| *d != 0),
            volume: r.volume,
            price: r.price.filter(|p| !p.is_zero()),
            comment: r.comment,
        }
    }
}

#[derive(Debug, Serialize)]
struct MarketOrderRequest<'a> {
    symbol: &'a str,
    side: Side,
    volume: Decimal,
    sl: Option<Decimal>,
    tp: Option<Decimal>,
}

#[derive(Debug, Serialize)]
struct CloseRequest<'a> {
    symbol: Option<&'a str>,
    side: Option<Side>,
}

fn utc(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

/// Decode each element on its own and drop the ones that do not parse.
fn lenient_rows<T: DeserializeOwned>(rows: Vec<Value>, what: &str) -> Vec<T> {
    let total = rows.len();
    let parsed: Vec<T> = rows
        .into_iter()
        .filter_map(|row| match serde_json::from_value(row) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(what, error = %e, "Skipping malformed row from bridge");
                None
            }
        })
        .collect();
    if parsed.len() < total {
        debug!(what, total, kept = parsed.len(), "Bridge rows filtered");
    }
    parsed
}

fn to_bar(symbol: &str, timeframe: Timeframe, row: BridgeBar) -> Option<Bar> {
    let ts = utc(row.time)?;
    let bar = Bar {
        symbol: symbol.to_string(),
        timeframe,
        ts,
        open: row.open,
        high: row.high,
        low: row.low,
        close: row.close,
        tick_volume: row.tick_volume,
        spread: row.spread,
        real_volume: row.real_volume,
    };
    if bar.low > bar.high {
        warn!(symbol, %timeframe, ts = %ts, "Skipping bar with low above high");
        return None;
    }
    Some(bar)
}

/// Broker adapter speaking to the terminal bridge.
pub struct BridgeBroker {
    config: BridgeConfig,
    client: OnceLock<Client>,
}

impl BridgeBroker {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            client: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The blocking client owns a runtime of its own, so it is only ever
    /// built on a worker thread.
    fn client(&self) -> Result<&Client, BrokerError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = Client::builder()
            .timeout(self.config.timeout)
            .build()
            .map_err(|e| BrokerError::Internal(e.to_string()))?;
        Ok(self.client.get_or_init(|| client))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn check(resp: Response) -> Result<Response, BrokerError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().unwrap_or_default();
        let message = format!("{}: {}", status, text);
        Err(match status {
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => BrokerError::Unavailable(message),
            s if s.is_client_error() => BrokerError::Rejected(message),
            _ => BrokerError::Request(message),
        })
    }

    fn send_err(e: reqwest::Error) -> BrokerError {
        if e.is_connect() || e.is_timeout() {
            BrokerError::Unavailable(e.to_string())
        } else {
            BrokerError::Request(e.to_string())
        }
    }

    fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, BrokerError> {
        let resp = self
            .client()?
            .get(self.url(path))
            .query(query)
            .send()
            .map_err(Self::send_err)?;
        Self::check(resp)?
            .json()
            .map_err(|e| BrokerError::Protocol(e.to_string()))
    }

    fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, BrokerError> {
        let resp = self
            .client()?
            .post(self.url(path))
            .json(body)
            .send()
            .map_err(Self::send_err)?;
        Self::check(resp)?
            .json()
            .map_err(|e| BrokerError::Protocol(e.to_string()))
    }

    fn bars(&self, symbol: &str, timeframe: Timeframe, query: &[(&str, String)]) -> Result<Vec<Bar>, BrokerError> {
        let rows: Vec<Value> = self.get("/bars", query)?;
        let mut bars: Vec<Bar> = lenient_rows::<BridgeBar>(rows, "bar")
            .into_iter()
            .filter_map(|row| to_bar(symbol, timeframe, row))
            .collect();
        bars.sort_by_key(|b| b.ts);
        bars.dedup_by_key(|b| b.ts);
        Ok(bars)
    }

    fn range_query(symbol: &str, timeframe: Timeframe, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<(&'static str, String)> {
        vec![
            ("symbol", symbol.to_string()),
            ("timeframe", timeframe.to_string()),
            ("start", start.timestamp().to_string()),
            ("end", end.timestamp().to_string()),
        ]
    }

    fn reject_derived(timeframe: Timeframe) -> Result<(), BrokerError> {
        if timeframe.is_derived() {
            return Err(BrokerError::Rejected(format!(
                "timeframe {} is derived locally",
                timeframe
            )));
        }
        Ok(())
    }
}

impl Broker for BridgeBroker {
    fn initialize(&self) -> Result<(), BrokerError> {
        let _: Value = self.post("/initialize", &serde_json::json!({}))?;
        Ok(())
    }

    fn fetch_bars(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Bar>, BrokerError> {
        Self::reject_derived(timeframe)?;
        self.bars(
            symbol,
            timeframe,
            &[
                ("symbol", symbol.to_string()),
                ("timeframe", timeframe.to_string()),
                ("count", count.to_string()),
            ],
        )
    }

    fn fetch_bars_since(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: DateTime<Utc>,
    ) -> Result<Vec<Bar>, BrokerError> {
        Self::reject_derived(timeframe)?;
        let end = Utc::now() + self.config.history_forward;
        let start = since + Duration::seconds(1);
        let bars = self.bars(symbol, timeframe, &Self::range_query(symbol, timeframe, start, end))?;
        Ok(bars.into_iter().filter(|b| b.ts > since).collect())
    }

    fn fetch_bars_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, BrokerError> {
        Self::reject_derived(timeframe)?;
        let padded = end + self.config.history_forward;
        let bars = self.bars(symbol, timeframe, &Self::range_query(symbol, timeframe, start, padded))?;
        Ok(bars
            .into_iter()
            .filter(|b| b.ts >= start && b.ts <= end)
            .collect())
    }

    fn tick(&self, symbol: &str) -> Result<Tick, BrokerError> {
        let raw: BridgeTick = self.get("/tick", &[("symbol", symbol.to_string())])?;
        Ok(Tick {
            symbol: symbol.to_string(),
            bid: raw.bid,
            ask: raw.ask,
            last: raw.last,
            time: utc(raw.time).unwrap_or_else(Utc::now),
            digits: raw.digits,
            point: raw.point,
            contract_size: raw.trade_contract_size,
            min_volume: raw.volume_min,
            volume_step: raw.volume_step,
        })
    }

    fn account_info(&self) -> Result<AccountInfo, BrokerError> {
        let raw: BridgeAccount = self.get("/account", &[])?;
        Ok(AccountInfo {
            login: raw.login,
            balance: raw.balance,
            equity: raw.equity,
            margin: raw.margin,
            margin_free: raw.margin_free,
            currency: raw.currency,
        })
    }

    fn positions_for(&self, symbol: &str) -> Result<Vec<Position>, BrokerError> {
        let rows: Vec<Value> = self.get("/positions", &[("symbol", symbol.to_string())])?;
        Ok(positions(rows))
    }

    fn list_positions_all(&self) -> Result<Vec<Position>, BrokerError> {
        let rows: Vec<Value> = self.get("/positions", &[])?;
        Ok(positions(rows))
    }

    fn place_market(&self, order: &MarketOrder) -> Result<OrderResult, BrokerError> {
        let raw: BridgeOrderResult = self.post(
            "/orders/market",
            &MarketOrderRequest {
                symbol: &order.symbol,
                side: order.side,
                volume: order.volume,
                sl: order.sl,
                tp: order.tp,
            },
        )?;
        Ok(raw.into())
    }

    fn close_all_for(&self, symbol: &str, side: Option<Side>) -> Result<Vec<OrderResult>, BrokerError> {
        let raw: Vec<BridgeOrderResult> = self.post(
            "/positions/close",
            &CloseRequest {
                symbol: Some(symbol),
                side,
            },
        )?;
        Ok(raw.into_iter().map(OrderResult::from).collect())
    }

    fn close_all(&self, side: Option<Side>) -> Result<Vec<OrderResult>, BrokerError> {
        let raw: Vec<BridgeOrderResult> =
            self.post("/positions/close", &CloseRequest { symbol: None, side })?;
        Ok(raw.into_iter().map(OrderResult::from).collect())
    }

    /// The terminal reports deal times in server-local time, so the window
    /// is widened by the history buffers and trimmed after conversion.
    fn closed_deals(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<ClosedDeal>, BrokerError> {
        let start = from - self.config.history_back;
        let end = to + self.config.history_forward;
        let rows: Vec<Value> = self.get(
            "/deals",
            &[
                ("from", start.timestamp().to_string()),
                ("to", end.timestamp().to_string()),
            ],
        )?;

        let mut deals: Vec<ClosedDeal> = lenient_rows::<BridgeDeal>(rows, "deal")
            .into_iter()
            .filter_map(|d| {
                let ts = utc(d.time)?;
                Some(ClosedDeal {
                    deal_id: d.ticket,
                    ts,
                    symbol: d.symbol,
                    profit: d.profit,
                    commission: d.commission,
                    swap: d.swap,
                    volume: d.volume,
                    entry: d.entry,
                    order: d.order,
                    comment: d.comment,
                })
            })
            .filter(|d| d.ts >= from && d.ts <= to)
            .collect();
        deals.sort_by_key(|d| d.ts);
        Ok(deals)
    }

    fn name(&self) -> &str {
        "bridge"
    }
}

fn positions(rows: Vec<Value>) -> Vec<Position> {
    lenient_rows::<BridgePosition>(rows, "position")
        .into_iter()
        .filter_map(|p| {
            let side = match p.kind {
                0 => Side::Buy,
                1 => Side::Sell,
                other => {
                    warn!(ticket = p.ticket, kind = other, "Skipping position of unknown type");
                    return None;
                }
            };
            Some(Position {
                ticket: p.ticket,
                symbol: p.symbol,
                side,
                volume: p.volume,
                price_open: p.price_open,
                price_current: p.price_current,
                sl: p.sl.filter(|v| !v.is_zero()),
                tp: p.tp.filter(|v| !v.is_zero()),
                profit: p.profit,
                opened_at: utc(p.time)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_lenient_bar_rows() {
        let rows = vec![
            json!({"time": 1_704_067_200, "open": 1.1, "high": 1.2, "low": 1.0, "close": 1.15, "tick_volume": 10}),
            json!({"time": "yesterday", "open": 1.1}),
            json!({"time": 1_704_070_800, "open": "1.15", "high": "1.16", "low": "1.14", "close": "1.155"}),
        ];
        let parsed: Vec<BridgeBar> = lenient_rows(rows, "bar");
        assert_eq!(parsed.len(), 2);

        let bars: Vec<Bar> = parsed
            .into_iter()
            .filter_map(|row| to_bar("EURUSD", Timeframe::H1, row))
            .collect();
        assert_eq!(bars[0].close, dec!(1.15));
        assert_eq!(bars[1].close, dec!(1.155));
        assert_eq!(bars[0].tick_volume, Some(10));
    }

    #[test]
    fn test_inverted_bar_skipped() {
        let row: BridgeBar = serde_json::from_value(
            json!({"time": 1_704_067_200, "open": 1.1, "high": 1.0, "low": 1.2, "close": 1.1}),
        )
        .unwrap();
        assert!(to_bar("EURUSD", Timeframe::H1, row).is_none());
    }

    #[test]
    fn test_positions_decode() {
        let rows = vec![
            json!({"ticket": 1, "symbol": "XAUUSD", "type": 1, "volume": 0.1, "price_open": 2000.5,
                   "price_current": 1999.0, "sl": 0.0, "tp": 1990.0, "profit": 15.0, "time": 1_704_067_200}),
            json!({"ticket": 2, "symbol": "XAUUSD", "type": 4, "volume": 0.1, "price_open": 2000.5,
                   "price_current": 1999.0, "profit": 0.0, "time": 1_704_067_200}),
        ];
        let positions = positions(rows);
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].side, Side::Sell);
        assert!(positions[0].sl.is_none());
        assert_eq!(positions[0].tp, Some(dec!(1990.0)));
    }

    #[test]
    fn test_config_buffers() {
        let config = BridgeConfig::new("http://127.0.0.1:5005/").with_history_buffers(12, 6);
        assert_eq!(config.base_url, "http://127.0.0.1:5005");
        assert_eq!(config.history_forward, Duration::hours(12));
        assert_eq!(config.history_back, Duration::hours(6));
    }

    #[test]
    fn test_unreachable_bridge_is_unavailable() {
        let mut config = BridgeConfig::new("http://127.0.0.1:9");
        config.timeout = std::time::Duration::from_millis(500);
        let broker = BridgeBroker::new(config);
        let err = broker.account_info().unwrap_err();
        assert!(err.is_unavailable(), "{:?}", err);
    }
}
