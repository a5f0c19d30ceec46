//! Ingestion, STL runs, freshness checks and scheduled jobs.
//!
//! Everything here works off a [`Context`], the single runtime handle that
//! owns the store, the broker executor, the event bus and the timers.

pub mod account;
mod context;
mod freshness;
mod ingest;
pub mod jobs;
mod news;
mod scheduler;
mod stl;

#[cfg(test)]
mod testing;

pub use context::Context;
pub use freshness::{BaselineSource, FreshnessOracle, FreshnessStatus, NewsFreshness, TechFreshness};
pub use ingest::{
    expand_bulk, BulkOutcome, BulkRequest, BulkScope, FetchMode, FetchOutcome, FetchRequest, Ingestor,
    DEFAULT_FETCH_COUNT,
};
pub use news::{news_source, DisabledNewsSource, FeedItem, HttpNewsSource, NewsSource};
pub use scheduler::{next_aligned_delay, JobFn, Scheduler};
pub use stl::{coverage_decision, ComputeOutcome, StlRequest, StlRow, StlScope, StlService, StlView};
