//! Configuration management.
//!
//! Sources, lowest precedence first: built-in defaults, an optional TOML
//! file, `WORKBENCH__SECTION__KEY` environment variables, then the flat
//! environment names older deployments use (`DATABASE_URL`, `PORT`, ...).

mod settings;

pub use settings::{
    AutoFetchSettings, BrokerSettings, DatabaseSettings, LoggingConfig, NewsSettings,
    SchedulerSettings, ServerSettings, Settings,
};

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use std::collections::HashMap;
use std::path::Path;
use workbench_core::prefs::parse_flag;

/// Flat variables mapped onto settings keys.
const LEGACY_INTS: &[(&str, &str)] = &[
    ("PORT", "server.port"),
    ("MT5_HISTORY_FUTURE_HOURS", "broker.history_future_hours"),
    ("MT5_HISTORY_BACK_HOURS", "broker.history_back_hours"),
    ("BALANCE_POLL_MIN", "scheduler.balance_poll_min"),
    ("CLOSED_ORDERS_POLL_MIN", "scheduler.closed_orders_poll_min"),
    ("NEWS_BACKFILL_MIN", "scheduler.news_backfill_min"),
    ("AUTO_FETCH_COUNT", "scheduler.auto_fetch.count"),
    ("AUTO_FETCH_SEC", "scheduler.auto_fetch.interval_sec"),
];

const LEGACY_FLAGS: &[(&str, &str)] = &[
    ("TRADING_ENABLED", "server.trading_enabled"),
    ("PIN_DEFAULTS_TO_XAU_H1", "server.pin_defaults_to_xau_h1"),
    ("AUTO_NEWS_BACKFILL", "scheduler.auto_news_backfill"),
    ("AUTO_FETCH", "scheduler.auto_fetch.enabled"),
];

const LEGACY_STRINGS: &[(&str, &str)] = &[
    ("LOG_LEVEL", "logging.level"),
    ("MT5_BRIDGE_URL", "broker.bridge_url"),
    ("NEWS_FEED_URL", "news.feed_url"),
];

const LEGACY_UPPER: &[(&str, &str)] = &[
    ("AUTO_FETCH_SYMBOL", "scheduler.auto_fetch.symbol"),
    ("AUTO_FETCH_TF", "scheduler.auto_fetch.timeframe"),
];

const DATABASE_URL_VARS: &[&str] = &["DATABASE_URL", "DATABASE_MT_URL", "DATABASE_QT_URL"];
const SYMBOL_LIST_VARS: &[&str] = &["MT5_SYMBOL_LIST", "SUPPORTED_SYMBOLS", "SYMBOL_LIST"];

/// Load settings from an optional file and the process environment.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let env: HashMap<String, String> = std::env::vars().collect();
    load_settings_from(path, &env)
}

/// Load settings against an explicit environment map.
pub fn load_settings_from(
    path: Option<&Path>,
    env: &HashMap<String, String>,
) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder().add_source(Config::try_from(&Settings::default())?);
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(true));
    }
    builder = builder.add_source(
        Environment::with_prefix("WORKBENCH")
            .separator("__")
            .try_parsing(true)
            .source(Some(env.clone())),
    );
    builder = apply_legacy_env(builder, |name| env.get(name).cloned())?;

    let settings: Settings = builder.build()?.try_deserialize()?;
    validate(&settings)?;
    Ok(settings)
}

fn first_non_empty(lookup: &impl Fn(&str) -> Option<String>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| lookup(name))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

/// Comma separated symbols, trimmed and upper-cased, blanks dropped.
pub fn parse_symbol_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Overlay the flat legacy variables found through `lookup`.
pub fn apply_legacy_env(
    mut builder: ConfigBuilder<DefaultState>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let present = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    builder = builder.set_override_option("database.url", first_non_empty(&lookup, DATABASE_URL_VARS))?;

    if let Some(raw) = first_non_empty(&lookup, SYMBOL_LIST_VARS) {
        let symbols = parse_symbol_list(&raw);
        if !symbols.is_empty() {
            builder = builder.set_override("symbols", symbols)?;
        }
    }

    for (name, key) in LEGACY_INTS {
        if let Some(raw) = present(name) {
            let value: i64 = raw
                .parse()
                .map_err(|_| ConfigError::Message(format!("{} must be an integer, got {:?}", name, raw)))?;
            builder = builder.set_override(*key, value)?;
        }
    }

    for (name, key) in LEGACY_FLAGS {
        if let Some(raw) = present(name) {
            let value = parse_flag(&raw)
                .ok_or_else(|| ConfigError::Message(format!("{} must be a boolean, got {:?}", name, raw)))?;
            builder = builder.set_override(*key, value)?;
        }
    }

    for (name, key) in LEGACY_STRINGS {
        builder = builder.set_override_option(*key, present(name))?;
    }

    for (name, key) in LEGACY_UPPER {
        builder = builder.set_override_option(*key, present(name).map(|v| v.to_uppercase()))?;
    }

    Ok(builder)
}

fn validate(settings: &Settings) -> Result<(), ConfigError> {
    let fail = |msg: &str| Err(ConfigError::Message(msg.to_string()));

    if settings.server.port == 0 {
        return fail("server.port must be non-zero");
    }
    let db = &settings.database;
    if db.max_connections == 0 || db.min_connections > db.max_connections {
        return fail("database connections must satisfy 0 < min <= max");
    }
    if settings.broker.workers == 0 {
        return fail("broker.workers must be at least 1");
    }
    if settings.broker.history_future_hours < 0 || settings.broker.history_back_hours() < 0 {
        return fail("broker history buffers must not be negative");
    }
    let sched = &settings.scheduler;
    if sched.balance_poll_min == 0 || sched.closed_orders_poll_min == 0 || sched.news_backfill_min == 0 {
        return fail("scheduler intervals must be at least 1 minute");
    }
    if sched.auto_fetch.count == 0 || sched.auto_fetch.interval_sec == 0 {
        return fail("auto_fetch count and interval must be positive");
    }
    if sched.auto_fetch.timeframe.is_derived() {
        return fail("auto_fetch timeframe must be fetchable from the broker");
    }
    if settings.symbols.is_empty() {
        return fail("at least one symbol must be configured");
    }
    Ok(())
}
