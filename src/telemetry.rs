//! Logging setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{PipelineError, Result};

/// Build the filter, letting `RUST_LOG` win over the configured directive.
pub fn env_filter(cfg: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&cfg.filter).map_err(|err| {
            PipelineError::Config(format!("invalid log filter `{}`: {err}", cfg.filter))
        }),
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(cfg: &LoggingConfig) -> Result<()> {
    let filter = env_filter(cfg)?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = if cfg.json {
        registry.with(fmt::layer().json().with_target(true).with_writer(std::io::stderr)).try_init()
    } else {
        registry.with(fmt::layer().with_target(false).with_writer(std::io::stderr)).try_init()
    };
    installed.map_err(|err| PipelineError::Config(format!("failed to install tracing: {err}")))
}
