//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::{Config, ConfigError, LogFormat};

/// Builds the log filter: `RUST_LOG` when set, otherwise the configured
/// level.
pub fn env_filter(config: &Config) -> Result<EnvFilter, ConfigError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.log_level).map_err(|source| ConfigError::InvalidLogLevel {
        level: config.log_level.clone(),
        source,
    })
}

/// Installs the global tracing subscriber. Fails if one is already set.
pub fn init(config: &Config) -> Result<(), ConfigError> {
    let filter = env_filter(config)?;
    let result = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).try_init(),
    };
    result.map_err(ConfigError::Telemetry)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_format = ?config.log_format,
        "telemetry initialised"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn invalid_level_is_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = Config::try_parse_from(["courier", "--log-level", "courier=loud"]).unwrap();
        let err = env_filter(&config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLogLevel { .. }));
    }

    #[test]
    fn second_init_fails() {
        let config = Config::try_parse_from(["courier", "--log-level", "warn"]).unwrap();
        let _ = init(&config);
        assert!(matches!(init(&config), Err(ConfigError::Telemetry(_))));
    }
}
