/// Runtime configuration for the screener client
///
/// Values come from environment variables, falling back to defaults that
/// match a locally running backend.

use crate::shared::websocket::ConnectionConfig;
use std::{path::PathBuf, time::Duration};

const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8000/ws";
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 15 * 60;
const DEFAULT_SETTINGS_PATH: &str = "screener-settings.json";
const DEFAULT_LOG_PATH: &str = "signal-screener.log";

#[derive(Debug, Clone)]
pub struct ScreenerConfig {
    /// Base URL of the request/response endpoints
    pub api_base_url: String,
    /// Push channel connection settings
    pub connection: ConnectionConfig,
    /// Periodic full snapshot interval
    pub refresh_interval: Duration,
    /// Settings file location
    pub settings_path: PathBuf,
    /// Log file location
    pub log_path: PathBuf,
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            connection: ConnectionConfig::new(DEFAULT_WS_URL),
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
            settings_path: PathBuf::from(DEFAULT_SETTINGS_PATH),
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
        }
    }
}

impl ScreenerConfig {
    /// Build from `API_BASE_URL`, `WS_URL`, `REFRESH_INTERVAL_SECS`,
    /// `SETTINGS_PATH` and `SCREENER_LOG`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let api_base_url = lookup("API_BASE_URL").unwrap_or(defaults.api_base_url);
        let ws_url = lookup("WS_URL").unwrap_or_else(|| DEFAULT_WS_URL.to_string());
        let refresh_interval = lookup("REFRESH_INTERVAL_SECS")
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.refresh_interval);
        let settings_path = lookup("SETTINGS_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.settings_path);
        let log_path = lookup("SCREENER_LOG")
            .map(PathBuf::from)
            .unwrap_or(defaults.log_path);

        Self {
            api_base_url,
            connection: ConnectionConfig {
                url: ws_url,
                ..defaults.connection
            },
            refresh_interval,
            settings_path,
            log_path,
        }
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_settings_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings_path = path.into();
        self
    }
}
