//! Logging setup for the server binary

use crate::error::AuthError;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Parse a `LOG_LEVEL` value, falling back to `info`
pub fn level_filter(level: &str) -> LevelFilter {
    level.trim().parse().unwrap_or(LevelFilter::INFO)
}

/// Install the global subscriber
///
/// `RUST_LOG` directives take precedence over `default_level`.
pub fn init(default_level: &str) -> Result<(), AuthError> {
    let fmt_layer = fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .with_target(false);

    // RUST_LOG=
    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter(default_level).into())
        .from_env_lossy();

    let subscriber = Registry::default().with(fmt_layer).with(env_filter);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| AuthError::Config(format!("logging already initialized: {err}")))
}
