//! Configuration parsing for the reconnecting socket.
//!
//! Settings come from a single JSON file with a logging block and one
//! `socket` block describing the endpoint, auto-send messages and reconnect
//! bounds.
//!
//! # Example config
//!
//! ```json
//! {
//!   "logging": { "module_name": "rews", "log_path": "/tmp/log", "level": "info", "json": false },
//!   "socket": {
//!     "url": "wss://example.com/ws",
//!     "autosend": ["subscribe:A"],
//!     "periodic": { "messages": ["ping"], "interval_sec": 5 },
//!     "reconnect": { "enabled": true, "delay_min_sec": 1, "delay_max_sec": 10 }
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::error::RewsError;
use crate::logging::LogSettings;

/// Default lower reconnect delay bound, in seconds.
pub const DEFAULT_DELAY_MIN_SEC: u64 = 1;

/// Default upper reconnect delay bound, in seconds.
pub const DEFAULT_DELAY_MAX_SEC: u64 = 10;

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Logging metadata (name, path, level).
    #[serde(default)]
    pub logging: Option<LoggingConfig>,

    /// The socket to run.
    pub socket: SocketConfig,
}

/// Logging block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    pub module_name: Option<String>,
    pub log_path: Option<String>,
    pub level: Option<String>,
    /// Write log files as JSON lines.
    #[serde(default)]
    pub json: bool,
}

/// One reconnecting socket.
#[derive(Debug, Clone, Deserialize)]
pub struct SocketConfig {
    /// Full WebSocket URL (`ws://` or `wss://`).
    pub url: String,

    /// Extra HTTP headers for the handshake (e.g. API key).
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,

    /// Messages sent once after every successful connection.
    #[serde(default)]
    pub autosend: Vec<String>,

    /// Messages re-sent on a fixed interval while connected.
    pub periodic: Option<PeriodicConfig>,

    /// Reconnect policy.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Transport keep-alive ping interval in seconds (default 30, 0 disables).
    pub ping_interval_sec: Option<u64>,
}

/// Periodic auto-send block.
#[derive(Debug, Clone, Deserialize)]
pub struct PeriodicConfig {
    pub messages: Vec<String>,
    pub interval_sec: u64,
}

/// Reconnect bounds and switch.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_delay_min")]
    pub delay_min_sec: u64,
    #[serde(default = "default_delay_max")]
    pub delay_max_sec: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_min_sec: DEFAULT_DELAY_MIN_SEC,
            delay_max_sec: DEFAULT_DELAY_MAX_SEC,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_delay_min() -> u64 {
    DEFAULT_DELAY_MIN_SEC
}

fn default_delay_max() -> u64 {
    DEFAULT_DELAY_MAX_SEC
}

impl SocketConfig {
    /// Check the URL scheme, delay bounds and periodic interval.
    pub fn validate(&self) -> Result<(), RewsError> {
        validate_url(&self.url)?;
        validate_delay_range(self.reconnect.delay_min_sec, self.reconnect.delay_max_sec)?;
        if let Some(periodic) = &self.periodic {
            if !periodic.messages.is_empty() && periodic.interval_sec == 0 {
                return Err(RewsError::Config("periodic interval_sec must be > 0".into()));
            }
        }
        Ok(())
    }

    /// Keep-alive ping interval for the default transport. `None` disables pings.
    pub fn ping_interval(&self) -> Option<Duration> {
        match self.ping_interval_sec {
            Some(0) => None,
            Some(sec) => Some(Duration::from_secs(sec)),
            None => Some(crate::ws::tungstenite::DEFAULT_PING_INTERVAL),
        }
    }
}

impl AppConfig {
    /// Module name used as log file prefix.
    pub fn module_name(&self) -> String {
        self.logging.as_ref().and_then(|l| l.module_name.clone()).unwrap_or_else(|| "rews".to_string())
    }

    /// Returns the log path.
    pub fn log_path(&self) -> Option<String> {
        self.logging.as_ref().and_then(|l| l.log_path.clone())
    }

    /// Log level from the config file, if any.
    pub fn log_level(&self) -> Option<String> {
        self.logging.as_ref().and_then(|l| l.level.clone())
    }

    /// Logging settings from the file, with CLI overrides for level and dir.
    pub fn log_settings(&self, level: Option<String>, dir: Option<String>) -> LogSettings {
        LogSettings {
            level: level.or_else(|| self.log_level()).unwrap_or_else(|| "info".to_string()),
            dir: dir.or_else(|| self.log_path()),
            module_name: self.module_name(),
            json: self.logging.as_ref().is_some_and(|l| l.json),
        }
    }
}

/// Require a parseable `ws://` or `wss://` URL.
pub fn validate_url(raw: &str) -> Result<(), RewsError> {
    let parsed = url::Url::parse(raw).map_err(|e| RewsError::Config(format!("invalid url {raw:?}: {e}")))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(RewsError::Config(format!("unsupported url scheme {other:?}, expected ws or wss"))),
    }
}

/// Require `min <= max` for the reconnect delay bounds.
pub fn validate_delay_range(min: u64, max: u64) -> Result<(), RewsError> {
    if min > max {
        return Err(RewsError::Config(format!("reconnect delay min ({min}) > max ({max})")));
    }
    Ok(())
}

/// Load and parse a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    config.socket.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"{
        "logging": { "module_name": "feed", "log_path": "/tmp/log", "level": "debug" },
        "socket": {
            "url": "wss://example.com/ws",
            "extra_headers": { "X-Key": "abc" },
            "autosend": ["subscribe:A", "subscribe:B"],
            "periodic": { "messages": ["ping"], "interval_sec": 5 },
            "reconnect": { "enabled": false, "delay_min_sec": 2, "delay_max_sec": 4 },
            "ping_interval_sec": 0
        }
    }"#;

    #[test]
    fn parses_full_config() {
        let cfg: AppConfig = serde_json::from_str(FULL).unwrap();
        cfg.socket.validate().unwrap();
        assert_eq!(cfg.module_name(), "feed");
        assert_eq!(cfg.log_level().as_deref(), Some("debug"));
        assert_eq!(cfg.socket.autosend, vec!["subscribe:A", "subscribe:B"]);
        assert_eq!(cfg.socket.extra_headers.get("X-Key").map(String::as_str), Some("abc"));
        assert!(!cfg.socket.reconnect.enabled);
        assert_eq!(cfg.socket.reconnect.delay_min_sec, 2);
        assert_eq!(cfg.socket.ping_interval(), None);

        let log = cfg.log_settings(Some("warn".into()), None);
        assert_eq!(log.level, "warn");
        assert_eq!(log.dir.as_deref(), Some("/tmp/log"));
        assert!(!log.json);
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg: AppConfig = serde_json::from_str(r#"{ "socket": { "url": "ws://localhost:9000" } }"#).unwrap();
        cfg.socket.validate().unwrap();
        assert_eq!(cfg.module_name(), "rews");
        assert!(cfg.log_path().is_none());
        assert_eq!(cfg.log_settings(None, None).level, "info");
        assert!(cfg.socket.reconnect.enabled);
        assert_eq!(cfg.socket.reconnect.delay_min_sec, DEFAULT_DELAY_MIN_SEC);
        assert_eq!(cfg.socket.reconnect.delay_max_sec, DEFAULT_DELAY_MAX_SEC);
        assert_eq!(cfg.socket.ping_interval(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(validate_url("http://example.com").is_err());
        assert!(validate_url("not a url").is_err());
        assert!(validate_delay_range(5, 1).is_err());
        assert!(validate_delay_range(0, 0).is_ok());

        let cfg: AppConfig = serde_json::from_str(
            r#"{ "socket": { "url": "ws://h", "periodic": { "messages": ["p"], "interval_sec": 0 } } }"#,
        )
        .unwrap();
        assert!(matches!(cfg.socket.validate(), Err(RewsError::Config(_))));
    }
}
