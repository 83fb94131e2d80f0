//! Logging initialization using the `tracing` ecosystem.
//!
//! Console output is always human-readable. An optional daily-rotating file
//! (via `tracing-appender`) can be written as plain text or JSON lines.
//! `RUST_LOG` overrides the configured level.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Resolved logging settings (CLI flags layered over the config file).
#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Default level if `RUST_LOG` is not set (e.g. `"info"`).
    pub level: String,
    /// Directory for daily-rotating log files.
    pub dir: Option<String>,
    /// Log file prefix.
    pub module_name: String,
    /// Write the file layer as JSON lines.
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self { level: "info".to_string(), dir: None, module_name: "rews".to_string(), json: false }
    }
}

/// Install the global tracing subscriber.
///
/// Should be called once at program start; later calls are ignored and the
/// first subscriber stays installed.
pub fn init_logging(settings: &LogSettings) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let console_layer = fmt::layer().with_target(true).with_thread_ids(true).with_ansi(true);
    let registry = tracing_subscriber::registry().with(env_filter).with(console_layer);

    let result = match settings.dir.as_deref() {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, &settings.module_name);
            let file_layer = fmt::layer().with_writer(file_appender).with_ansi(false).with_target(true);
            if settings.json {
                registry.with(file_layer.json()).try_init()
            } else {
                registry.with(file_layer.with_thread_ids(true)).try_init()
            }
        }
        None => registry.try_init(),
    };

    if let Err(e) = result {
        tracing::debug!("logging already initialized: {e}");
    }
}
