//! Core data types for the workbench.

mod account;
mod analysis;
mod bar;
mod news;
pub mod prefs;
mod stl;
mod symbol;
mod time;
mod timeframe;

pub use account::{
    AccountInfo, BalanceSnapshot, ClosedDeal, MarketOrder, OrderResult, Position, Side, Tick,
};
pub use analysis::{AnalysisRun, AnalysisRunFilter, NewAnalysisRun, SignalTrade, TECH_SNAPSHOT_STRATEGY};
pub use bar::{Bar, BarCoverage, BarView};
pub use news::{NewsArticle, NewsStats};
pub use stl::{NewStlRun, StlPoint, StlRun};
pub use symbol::{classify_symbol, AnalysisKind, SymbolClass};
pub use time::{iso8601, parse_utc};
pub use timeframe::Timeframe;
