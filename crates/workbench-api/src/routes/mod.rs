//! Request handlers, one module per area.

pub mod account;
pub mod health;
pub mod market;
pub mod news;
pub mod prefs;
pub mod stl;
pub mod ws;
