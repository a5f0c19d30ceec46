//! Core types and traits for the market data workbench.
//!
//! This crate provides the foundational building blocks including:
//! - Market data types (Bar, Timeframe, STL runs)
//! - News, account, closed-deal and analysis-run records
//! - Symbol classification used by the freshness checks
//! - The `Store` and `Broker` capability traits

pub mod error;
pub mod traits;
pub mod types;

pub use error::{BrokerError, StoreError, StoreErrorKind, WorkbenchError, WorkbenchResult};
pub use traits::*;
pub use types::*;
