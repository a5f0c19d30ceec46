//! Broker terminal adapter trait.

use chrono::{DateTime, Utc};

use crate::error::BrokerError;
use crate::types::{
    AccountInfo, Bar, ClosedDeal, MarketOrder, OrderResult, Position, Side, Tick, Timeframe,
};

/// Trait for broker terminal integrations.
///
/// Every method may block on the terminal. Callers on the async runtime go
/// through `workbench_broker::BrokerExecutor`, never call these directly.
pub trait Broker: Send + Sync {
    /// Connect to the terminal. Called lazily before the first request and
    /// again after the connection was reported lost.
    fn initialize(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    /// Fetch the last `count` bars, oldest first.
    fn fetch_bars(&self, symbol: &str, timeframe: Timeframe, count: usize)
        -> Result<Vec<Bar>, BrokerError>;

    /// Fetch bars strictly newer than `since`. An empty result is valid.
    fn fetch_bars_since(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: DateTime<Utc>,
    ) -> Result<Vec<Bar>, BrokerError>;

    /// Fetch bars with `start <= ts <= end`.
    ///
    /// Implementations pad `end` by their forward history buffer before
    /// asking the terminal, then trim.
    fn fetch_bars_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, BrokerError>;

    /// Get the latest tick with contract metadata.
    fn tick(&self, symbol: &str) -> Result<Tick, BrokerError>;

    /// Get account information.
    fn account_info(&self) -> Result<AccountInfo, BrokerError>;

    /// Get open positions for one symbol.
    fn positions_for(&self, symbol: &str) -> Result<Vec<Position>, BrokerError>;

    /// Get all open positions.
    fn list_positions_all(&self) -> Result<Vec<Position>, BrokerError>;

    /// Get open positions, optionally narrowed to a symbol.
    fn list_positions(&self, symbol: Option<&str>) -> Result<Vec<Position>, BrokerError> {
        match symbol {
            Some(symbol) => self.positions_for(symbol),
            None => self.list_positions_all(),
        }
    }

    /// Submit a market order.
    fn place_market(&self, order: &MarketOrder) -> Result<OrderResult, BrokerError>;

    /// Close positions of one symbol, optionally only one side.
    fn close_all_for(&self, symbol: &str, side: Option<Side>) -> Result<Vec<OrderResult>, BrokerError>;

    /// Close every open position, optionally only one side.
    fn close_all(&self, side: Option<Side>) -> Result<Vec<OrderResult>, BrokerError> {
        let mut symbols: Vec<String> = self
            .list_positions_all()?
            .into_iter()
            .map(|p| p.symbol)
            .collect();
        symbols.sort();
        symbols.dedup();

        let mut results = Vec::new();
        for symbol in symbols {
            results.extend(self.close_all_for(&symbol, side)?);
        }
        Ok(results)
    }

    /// Closed deals with `from <= ts <= to`.
    fn closed_deals(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<ClosedDeal>, BrokerError>;

    /// Get the broker name.
    fn name(&self) -> &str;
}
