//! Optional tracing initialization helper.
//!
//! The library only emits `tracing` events; applications that already
//! install a subscriber can ignore this module.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub default_filter: String,
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_filter: "restmap=info".to_string(),
            json_logs: false,
        }
    }
}

impl TelemetryConfig {
    pub fn new(default_filter: impl Into<String>) -> Self {
        Self {
            default_filter: default_filter.into(),
            ..Default::default()
        }
    }

    pub fn with_json_logs(mut self, enabled: bool) -> Self {
        self.json_logs = enabled;
        self
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_filter))
    }
}

/// Installs a global subscriber. Fails if one is already installed.
pub fn init(config: TelemetryConfig) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(config.env_filter());

    if config.json_logs {
        let fmt_layer = tracing_subscriber::fmt::layer().json().flatten_event(true);
        registry.with(fmt_layer).try_init()?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer();
        registry.with(fmt_layer).try_init()?;
    }

    Ok(())
}
