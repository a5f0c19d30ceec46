//! Broker integrations.
//!
//! Adapters implement the blocking `Broker` trait; async code reaches them
//! only through [`BrokerExecutor`].

mod bridge;
mod executor;
mod sim;

pub use bridge::{BridgeBroker, BridgeConfig};
pub use executor::{BrokerExecutor, InitGate, DEFAULT_INIT_COOLDOWN, DEFAULT_WORKERS};
pub use sim::SimBroker;
