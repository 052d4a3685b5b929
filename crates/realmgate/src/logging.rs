//! Tracing subscriber setup.

use tracing::info;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence over `level` when set. `json` switches to
/// one JSON object per line for log shippers.
///
/// # Errors
/// Fails if a global subscriber is already installed.
pub fn init(level: &str, json: bool) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().json().with_thread_ids(true).with_target(true))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_thread_ids(true).with_target(false))
            .try_init()?;
    }

    info!(level, json, "logging initialized");
    Ok(())
}
