//! Process monitoring: logging setup and the push-event bus.

mod bus;
mod events;
mod logging;

pub use bus::{EventBus, SessionId, Subscription, DEFAULT_SESSION_QUEUE};
pub use events::{
    BalanceEvent, Event, EventMessage, FetchEvent, FetchStatus, NewsEvent, NewsStatus, StlEvent,
    StlStatus,
};
pub use logging::{normalize_level, setup_logging};
