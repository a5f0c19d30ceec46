//! Numerical analytics over bar series.
//!
//! This crate provides:
//! - A LOESS smoother (local linear, tricube weights)
//! - Robust STL decomposition into trend, seasonal and residual parts
//! - Calendar resampling of monthly bars into yearly bars

pub mod loess;
pub mod resample;
pub mod stl;

pub use loess::Loess;
pub use resample::aggregate_yearly;
pub use stl::{effective_period, Stl, StlOutput, StlParams, MIN_PERIOD, MIN_SAMPLES};
