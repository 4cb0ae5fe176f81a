//! Tracing subscriber installation for the binary.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber. The base level is `info`, or `debug`
/// when `debug` is set; `RUST_LOG` directives take precedence.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init(debug: bool) -> Result<(), tracing_subscriber::util::TryInitError> {
    let level = if debug { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(debug))
        .try_init()
}
