//! Core traits for the workbench.

mod broker;
mod store;

pub use broker::Broker;
pub use store::{check_limit, Store};
