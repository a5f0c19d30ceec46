//! Terminal account, position, deal and balance records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Get the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" | "long" => Ok(Side::Buy),
            "sell" | "short" => Ok(Side::Sell),
            _ => Err(format!("Invalid side: {}", s)),
        }
    }
}

/// Latest quote plus the contract metadata needed for sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub time: DateTime<Utc>,
    pub digits: u32,
    pub point: f64,
    pub contract_size: f64,
    pub min_volume: f64,
    pub volume_step: f64,
}

impl Tick {
    /// Get the mid price.
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    /// Spread in points.
    pub fn spread_points(&self) -> f64 {
        if self.point > 0.0 {
            ((self.ask - self.bid) / self.point).round()
        } else {
            0.0
        }
    }
}

/// Trading account summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub login: i64,
    pub balance: Decimal,
    pub equity: Decimal,
    pub margin: Decimal,
    pub margin_free: Decimal,
    pub currency: String,
}

/// An open terminal position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticket: i64,
    pub symbol: String,
    pub side: Side,
    pub volume: Decimal,
    pub price_open: Decimal,
    pub price_current: Decimal,
    pub sl: Option<Decimal>,
    pub tp: Option<Decimal>,
    pub profit: Decimal,
    pub opened_at: DateTime<Utc>,
}

/// Market order submitted through the adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOrder {
    pub symbol: String,
    pub side: Side,
    pub volume: Decimal,
    pub sl: Option<Decimal>,
    pub tp: Option<Decimal>,
}

impl MarketOrder {
    pub fn new(symbol: impl Into<String>, side: Side, volume: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            volume,
            sl: None,
            tp: None,
        }
    }

    pub fn with_stops(mut self, sl: Option<Decimal>, tp: Option<Decimal>) -> Self {
        self.sl = sl;
        self.tp = tp;
        self
    }
}

/// Terminal answer to an order or close request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub retcode: i32,
    pub order: Option<i64>,
    pub deal: Option<i64>,
    pub volume: Decimal,
    pub price: Option<Decimal>,
    pub comment: String,
}

/// Append-only account balance sample. Keyed by (user, account_id, ts).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub user: String,
    pub account_id: i64,
    pub ts: DateTime<Utc>,
    pub balance: Decimal,
    pub equity: Decimal,
    pub margin: Decimal,
    pub free_margin: Decimal,
    pub currency: String,
}

impl BalanceSnapshot {
    /// Build a snapshot from the account summary at `ts`.
    pub fn from_account(user: impl Into<String>, account: &AccountInfo, ts: DateTime<Utc>) -> Self {
        Self {
            user: user.into(),
            account_id: account.login,
            ts,
            balance: account.balance,
            equity: account.equity,
            margin: account.margin,
            free_margin: account.margin_free,
            currency: account.currency.clone(),
        }
    }
}

/// A closed deal from the terminal history. Keyed by (account_id, deal_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedDeal {
    pub deal_id: i64,
    pub ts: DateTime<Utc>,
    pub symbol: String,
    pub profit: Decimal,
    pub commission: Decimal,
    pub swap: Decimal,
    pub volume: Decimal,
    /// Terminal entry flag (0 = in, 1 = out, 2 = in/out, 3 = out by)
    pub entry: i32,
    pub order: i64,
    pub comment: String,
}

impl ClosedDeal {
    /// Profit net of commission and swap.
    pub fn net(&self) -> Decimal {
        self.profit + self.commission + self.swap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_parse() {
        assert_eq!("BUY".parse::<Side>().unwrap(), Side::Buy);
        assert_eq!("short".parse::<Side>().unwrap(), Side::Sell);
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert!("hold".parse::<Side>().is_err());
    }

    #[test]
    fn test_tick_calculations() {
        let tick = Tick {
            symbol: "EURUSD".into(),
            bid: 1.10000,
            ask: 1.10020,
            last: 0.0,
            time: Utc::now(),
            digits: 5,
            point: 0.00001,
            contract_size: 100000.0,
            min_volume: 0.01,
            volume_step: 0.01,
        };
        assert!((tick.mid() - 1.1001).abs() < 1e-9);
        assert_eq!(tick.spread_points(), 20.0);
    }

    #[test]
    fn test_deal_net() {
        let deal = ClosedDeal {
            deal_id: 7,
            ts: Utc::now(),
            symbol: "XAUUSD".into(),
            profit: dec!(120.50),
            commission: dec!(-3.5),
            swap: dec!(-1),
            volume: dec!(0.10),
            entry: 1,
            order: 70,
            comment: String::new(),
        };
        assert_eq!(deal.net(), dec!(116.00));
    }
}
