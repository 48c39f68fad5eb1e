//! Runtime configuration via CLI args and environment variables.

use std::sync::Arc;

use clap::{Parser, ValueEnum};
use courier_service::codec::{CodecRegistry, JsonCodec, XmlCodec, normalize_media_type};
use courier_service::{RuntimeConfig, ServiceRuntime};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no built-in codec serves the default media type {0:?}")]
    UnsupportedDefaultMediaType(String),

    #[error("invalid log level {level:?}: {source}")]
    InvalidLogLevel {
        level: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("failed to install tracing subscriber: {0}")]
    Telemetry(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Courier RPC runtime.
#[derive(Parser, Debug, Clone)]
#[command(name = "courier", version, about)]
pub struct Config {
    /// Log level (overridden by RUST_LOG).
    #[arg(long, default_value = "info", env = "COURIER_LOG_LEVEL")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "COURIER_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Media type served by the default (`*/*`) codecs.
    #[arg(long, default_value = "application/json", env = "COURIER_DEFAULT_MEDIA_TYPE")]
    pub default_media_type: String,

    /// Register the XML codecs.
    #[arg(long, env = "COURIER_XML")]
    pub xml: bool,

    /// Log payload details for every request.
    #[arg(long, env = "COURIER_VERBOSE_LOGGING")]
    pub verbose_logging: bool,
}

impl Config {
    /// Parses configuration from CLI args and env vars.
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Builds the codec registry: JSON always, XML when enabled or when it
    /// is the default media type.
    pub fn codec_registry(&self) -> Result<CodecRegistry, ConfigError> {
        let default = normalize_media_type(&self.default_media_type);
        let json_default = JsonCodec::MEDIA_TYPES.iter().any(|m| *m == default);
        let xml_default = XmlCodec::MEDIA_TYPES.iter().any(|m| *m == default);
        if !json_default && !xml_default {
            return Err(ConfigError::UnsupportedDefaultMediaType(
                self.default_media_type.clone(),
            ));
        }

        let mut registry = CodecRegistry::new();
        registry
            .set_decoder(Arc::new(JsonCodec), json_default, JsonCodec::MEDIA_TYPES)
            .set_encoder(Arc::new(JsonCodec), json_default, JsonCodec::MEDIA_TYPES);
        if self.xml || xml_default {
            registry.register_xml(xml_default);
        }
        Ok(registry)
    }

    /// Builds the shared runtime state.
    pub fn runtime(&self) -> Result<ServiceRuntime, ConfigError> {
        let codecs = self.codec_registry()?;
        Ok(ServiceRuntime::new(
            codecs,
            &RuntimeConfig {
                verbose_logging: self.verbose_logging,
            },
        ))
    }
}
