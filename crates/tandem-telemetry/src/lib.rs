//! Tracing subscriber setup for the tandem binary.
//!
//! One fmt layer (JSON lines or text) behind an `EnvFilter`. `RUST_LOG`
//! replaces the configured directives when set.

use tandem_settings::LoggingSettings;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level.
    pub log_level: Level,
    /// Per-target overrides (e.g. "tandem_store" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines on stdout; text otherwise.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::from_settings(&LoggingSettings::default())
    }
}

impl TelemetryConfig {
    /// Build from the `logging` settings section. Unknown level names fall
    /// back to INFO; unknown module levels are dropped.
    pub fn from_settings(settings: &LoggingSettings) -> Self {
        Self {
            log_level: settings.level.parse().unwrap_or(Level::INFO),
            module_levels: settings
                .modules
                .iter()
                .filter_map(|(target, level)| Some((target.clone(), level.parse().ok()?)))
                .collect(),
            json: settings.json,
        }
    }

    fn filter_directives(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.filter_directives()))
    }
}

/// Install the global subscriber. Call once at startup; a second call
/// leaves the first subscriber in place.
pub fn init_telemetry(config: &TelemetryConfig) {
    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_filter(config.env_filter())
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(config.env_filter())
            .boxed()
    };

    if let Err(e) = tracing_subscriber::registry().with(fmt_layer).try_init() {
        eprintln!("tandem-telemetry: subscriber already installed: {e}");
    }
}
