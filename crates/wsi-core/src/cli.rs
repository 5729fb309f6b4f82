//! Logging and config-file helpers shared by the pipeline tools.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{Error, Result};

/// Environment variable that overrides the log filter
pub const LOG_ENV: &str = "RUST_LOG";

/// Filter directives: `RUST_LOG` when set and non-empty, otherwise
/// `debug` or `info` depending on `verbose`
pub fn log_directives(verbose: bool, from_env: Option<&str>) -> String {
    match from_env.map(str::trim) {
        Some(directives) if !directives.is_empty() => directives.to_string(),
        _ if verbose => "debug".to_string(),
        _ => "info".to_string(),
    }
}

/// Installs the global tracing subscriber for a CLI run
pub fn setup_cli_logging(verbose: bool) -> Result<()> {
    let from_env = std::env::var(LOG_ENV).ok();
    let directives = log_directives(verbose, from_env.as_deref());
    let filter = EnvFilter::try_new(&directives)
        .map_err(|e| Error::Config(format!("Invalid {} filter '{}': {e}", LOG_ENV, directives)))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(verbose))
        .with(filter)
        .try_init()
        .map_err(|e| Error::Config(format!("Logger already initialized: {e}")))?;

    Ok(())
}

/// Reads and deserializes a TOML file; every failure is a configuration error
pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let content = fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Cannot read config file {}: {e}", path.display()))
    })?;

    toml::from_str(&content).map_err(|e| {
        Error::Config(format!("Config file {} is not valid: {e}", path.display()))
    })
}
