//! Configuration structures.

use serde::{Deserialize, Serialize};
use workbench_core::Timeframe;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub broker: BrokerSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub news: NewsSettings,
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
}

fn default_symbols() -> Vec<String> {
    ["XAUUSD", "EURUSD", "GBPUSD", "USDJPY"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            logging: LoggingConfig::default(),
            database: DatabaseSettings::default(),
            broker: BrokerSettings::default(),
            scheduler: SchedulerSettings::default(),
            news: NewsSettings::default(),
            symbols: default_symbols(),
        }
    }
}

impl Settings {
    /// Symbol preselected in the UI.
    pub fn default_symbol(&self) -> String {
        if self.server.pin_defaults_to_xau_h1 {
            return "XAUUSD".to_string();
        }
        self.symbols
            .first()
            .cloned()
            .unwrap_or_else(|| "XAUUSD".to_string())
    }

    /// Timeframe preselected in the UI.
    pub fn default_timeframe(&self) -> Timeframe {
        Timeframe::H1
    }

    pub fn is_supported(&self, symbol: &str) -> bool {
        self.symbols.iter().any(|s| s.eq_ignore_ascii_case(symbol))
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Surfaced to the UI only; order entry is not served over HTTP
    pub trading_enabled: bool,
    pub pin_defaults_to_xau_h1: bool,
    /// Owner of balance snapshots
    pub user: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8888,
            trading_enabled: false,
            pin_defaults_to_xau_h1: false,
            user: "default".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file: None,
        }
    }
}

impl LoggingConfig {
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

/// Database pool settings. Without a url the in-memory store is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub min_connections: u32,
    pub max_connections: u32,
    /// External schema file replacing the embedded one
    pub schema_path: Option<String>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            min_connections: 1,
            max_connections: 5,
            schema_path: None,
        }
    }
}

/// Broker terminal settings. Without a bridge url the simulated broker is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSettings {
    pub bridge_url: Option<String>,
    pub workers: usize,
    pub init_cooldown_secs: u64,
    pub request_timeout_secs: u64,
    pub history_future_hours: i64,
    /// Defaults to `history_future_hours`
    pub history_back_hours: Option<i64>,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            bridge_url: None,
            workers: 2,
            init_cooldown_secs: 5,
            request_timeout_secs: 30,
            history_future_hours: 12,
            history_back_hours: None,
        }
    }
}

impl BrokerSettings {
    pub fn history_back_hours(&self) -> i64 {
        self.history_back_hours.unwrap_or(self.history_future_hours)
    }
}

/// Periodic job settings. Stored preferences override these at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    pub balance_poll_min: u64,
    pub closed_orders_poll_min: u64,
    pub auto_news_backfill: bool,
    pub news_backfill_min: u32,
    #[serde(default)]
    pub auto_fetch: AutoFetchSettings,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            balance_poll_min: 60,
            closed_orders_poll_min: 60,
            auto_news_backfill: true,
            news_backfill_min: 30,
            auto_fetch: AutoFetchSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoFetchSettings {
    pub enabled: bool,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub count: usize,
    pub interval_sec: u64,
}

impl Default for AutoFetchSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            symbol: "EURUSD".to_string(),
            timeframe: Timeframe::H1,
            count: 500,
            interval_sec: 60,
        }
    }
}

/// News feed settings. Without a feed url news backfill is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsSettings {
    pub feed_url: Option<String>,
    pub timeout_secs: u64,
    pub page_size: usize,
    pub max_pages: usize,
    pub pause_ms: u64,
}

impl Default for NewsSettings {
    fn default() -> Self {
        Self {
            feed_url: None,
            timeout_secs: 5,
            page_size: 200,
            max_pages: 5,
            pause_ms: 50,
        }
    }
}
