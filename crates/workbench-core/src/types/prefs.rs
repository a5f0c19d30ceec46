//! Preference keys understood by the core.

/// Last interactive selection, written when a fetch asks to persist.
pub const PREF_LAST_SYMBOL: &str = "last_symbol";
pub const PREF_LAST_TF: &str = "last_tf";
pub const PREF_LAST_COUNT: &str = "last_count";

/// Keys that re-arm scheduler timers when written.
pub const PREF_BALANCE_POLL_MIN: &str = "balance_poll_min";
pub const PREF_CLOSED_ORDERS_POLL_MIN: &str = "closed_orders_poll_min";
pub const PREF_AUTO_NEWS_BACKFILL: &str = "auto_news_backfill";
pub const PREF_NEWS_BACKFILL_MIN: &str = "news_backfill_min";

/// Keys accepted by the preferences endpoint.
pub const WHITELISTED_PREFS: &[&str] = &[
    PREF_LAST_SYMBOL,
    PREF_LAST_TF,
    PREF_LAST_COUNT,
    PREF_BALANCE_POLL_MIN,
    PREF_CLOSED_ORDERS_POLL_MIN,
    PREF_AUTO_NEWS_BACKFILL,
    PREF_NEWS_BACKFILL_MIN,
    "stl_period",
    "stl_all_data",
    "chart_theme",
    "news_window_hours",
];

/// Keys whose change reconfigures the scheduler.
pub const SCHEDULER_PREFS: &[&str] = &[
    PREF_BALANCE_POLL_MIN,
    PREF_CLOSED_ORDERS_POLL_MIN,
    PREF_AUTO_NEWS_BACKFILL,
    PREF_NEWS_BACKFILL_MIN,
];

/// Lenient truthiness used for preference and environment flags.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
