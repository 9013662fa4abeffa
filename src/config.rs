//! Application configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;

/// Seconds in one recording day.
const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Recording ===
    /// Trading pairs to record (exchange display format, e.g. `BTC-ZAR`).
    #[serde(default = "default_trading_pairs")]
    pub trading_pairs: Vec<String>,

    /// Number of ladder levels retained per side.
    #[serde(default = "default_depth_levels")]
    pub depth_levels: usize,

    /// Recording duration in days.
    #[serde(default = "default_duration_days")]
    pub duration_days: u64,

    /// Directory holding one SQLite file per trading pair.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    // === Feed ===
    /// VALR trade WebSocket endpoint.
    #[serde(default = "default_ws_url")]
    pub valr_ws_url: String,

    /// Fixed delay between reconnect attempts.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    /// Minimum interval between progress reports.
    #[serde(default = "default_progress_interval")]
    pub progress_interval_secs: u64,

    // === Observability ===
    /// Prometheus exporter port (disabled when unset).
    #[serde(default)]
    pub metrics_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub rust_log: String,
}

fn default_trading_pairs() -> Vec<String> {
    ["USDT-ZAR", "SOL-ZAR", "ETH-ZAR", "BTC-ZAR", "XRP-ZAR", "BNB-ZAR"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}

fn default_depth_levels() -> usize {
    10
}

fn default_duration_days() -> u64 {
    90
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_ws_url() -> String {
    "wss://api.valr.com/ws/trade".to_string()
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_progress_interval() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            trading_pairs: default_trading_pairs(),
            depth_levels: default_depth_levels(),
            duration_days: default_duration_days(),
            data_dir: default_data_dir(),
            valr_ws_url: default_ws_url(),
            reconnect_delay_secs: default_reconnect_delay(),
            progress_interval_secs: default_progress_interval(),
            metrics_port: None,
            rust_log: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trading_pairs.is_empty() {
            return Err(ConfigError::NoTradingPairs);
        }
        if self.trading_pairs.iter().any(|p| p.trim().is_empty()) {
            return Err(ConfigError::EmptyTradingPair);
        }
        if self.depth_levels == 0 {
            return Err(ConfigError::InvalidDepth(self.depth_levels));
        }
        if self.duration_days == 0 {
            return Err(ConfigError::InvalidDuration);
        }
        if self.reconnect_delay_secs == 0 {
            return Err(ConfigError::InvalidReconnectDelay);
        }
        if self.progress_interval_secs == 0 {
            return Err(ConfigError::InvalidProgressInterval);
        }
        validate_ws_url(&self.valr_ws_url)
    }

    /// Total recording duration.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_days.saturating_mul(SECS_PER_DAY))
    }

    /// Database path for a trading pair, e.g. `data/btc_zar_orderbook.db`.
    pub fn db_path(&self, trading_pair: &str) -> PathBuf {
        self.data_dir.join(db_file_name(trading_pair))
    }

    /// Per-pair collector settings derived from this configuration.
    pub fn collector_config(&self, trading_pair: &str) -> CollectorConfig {
        CollectorConfig {
            trading_pair: trading_pair.to_string(),
            depth_levels: self.depth_levels,
            duration: self.duration(),
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            progress_interval: Duration::from_secs(self.progress_interval_secs),
        }
    }
}

/// Settings for a single [`Collector`](crate::collector::Collector) run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    /// Trading pair in display format (`BTC-ZAR`).
    pub trading_pair: String,
    /// Ladder levels retained per side.
    pub depth_levels: usize,
    /// Wall-clock bound on the whole run.
    pub duration: Duration,
    /// Fixed wait between a failed cycle and the next attempt.
    pub reconnect_delay: Duration,
    /// Minimum spacing of progress reports.
    pub progress_interval: Duration,
}

impl CollectorConfig {
    /// Settings with the recorder's default delays.
    pub fn new(trading_pair: impl Into<String>, depth_levels: usize, duration: Duration) -> Self {
        Self {
            trading_pair: trading_pair.into(),
            depth_levels,
            duration,
            reconnect_delay: Duration::from_secs(default_reconnect_delay()),
            progress_interval: Duration::from_secs(default_progress_interval()),
        }
    }

    /// Check if the settings are valid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trading_pair.trim().is_empty() {
            return Err(ConfigError::EmptyTradingPair);
        }
        if self.depth_levels == 0 {
            return Err(ConfigError::InvalidDepth(self.depth_levels));
        }
        if self.duration.is_zero() {
            return Err(ConfigError::InvalidDuration);
        }
        if self.reconnect_delay.is_zero() {
            return Err(ConfigError::InvalidReconnectDelay);
        }
        if self.progress_interval.is_zero() {
            return Err(ConfigError::InvalidProgressInterval);
        }
        Ok(())
    }

    /// Pair symbol as the exchange expects it (`BTC-ZAR` -> `BTCZAR`).
    pub fn exchange_pair(&self) -> String {
        exchange_symbol(&self.trading_pair)
    }
}

/// Convert a display pair to the exchange's hyphen-free upper-case symbol.
pub fn exchange_symbol(trading_pair: &str) -> String {
    trading_pair.replace('-', "").to_uppercase()
}

/// File name of a pair's store (`BTC-ZAR` -> `btc_zar_orderbook.db`).
pub fn db_file_name(trading_pair: &str) -> String {
    format!("{}_orderbook.db", trading_pair.to_lowercase().replace('-', "_"))
}

fn validate_ws_url(raw: &str) -> Result<(), ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(ConfigError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme {other}"),
        }),
    }
}
