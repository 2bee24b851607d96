//! Tracing setup for harness runs.

use crate::error::{Error, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global `tracing` subscriber with an env-filterable format
/// layer. Safe to call more than once; only the first call installs.
pub fn setup_observability(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|err| Error::Configuration {
            message: format!("invalid trace filter: {err}"),
        })?;

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init();

    // An already-installed subscriber (another test, an embedding binary)
    // is not an error.
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}
