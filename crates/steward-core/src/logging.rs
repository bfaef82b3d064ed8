//! Tracing subscriber bootstrap
//!
//! Libraries only emit events; binaries call [`init_logging`] once.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

const STEWARD_TARGETS: [&str; 5] = [
    "steward_core",
    "steward_store",
    "steward_validation",
    "steward_model",
    "steward_cli",
];

/// Filter used when `RUST_LOG` is unset
fn default_filter(level: &str) -> EnvFilter {
    let directives = STEWARD_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::new(format!("warn,{directives}"))
}

/// Install the global subscriber
///
/// `RUST_LOG` wins over the configured level. Fails if a subscriber is
/// already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(&config.level));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init()
    }
}
