//! Logging setup and stage timing for the triage service.

mod timing;

pub use timing::{StageClock, StageSpan};

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "triage_llm" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of the compact human format.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Build from string levels as found in settings files. Unparseable
    /// levels fall back to INFO (global) or are dropped (per module).
    pub fn from_levels<'a, I>(level: &str, modules: I, json: bool) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let log_level = Level::from_str(level).unwrap_or(Level::INFO);
        let module_levels = modules
            .into_iter()
            .filter_map(|(m, l)| Level::from_str(l).ok().map(|l| (m.clone(), l)))
            .collect();
        Self {
            log_level,
            module_levels,
            json,
        }
    }

    /// Filter directive string, e.g. `info,triage_llm=debug`.
    pub fn filter_directives(&self) -> String {
        let mut filter_str = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter_str
    }
}

/// Initialize the global subscriber. Call once at startup.
///
/// Logs go to stderr so stdout stays free for command output.
/// Returns `false` if a subscriber was already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()
        .is_ok()
}
