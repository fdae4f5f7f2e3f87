//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use crate::config::schema::ServiceConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable overriding `listener.port`.
pub const PORT_ENV: &str = "PORT";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid {name} value '{value}'")]
    InvalidEnv { name: &'static str, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: ServiceConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply environment overrides (`PORT`) on top of a loaded configuration.
pub fn apply_env_overrides(config: &mut ServiceConfig) -> Result<(), ConfigError> {
    let port = std::env::var(PORT_ENV).ok();
    apply_port_override(config, port.as_deref())
}

/// Override the listener port; unset or empty keeps the configured port.
pub fn apply_port_override(config: &mut ServiceConfig, value: Option<&str>) -> Result<(), ConfigError> {
    let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(());
    };

    match raw.parse::<u16>() {
        Ok(port) if port != 0 => {
            config.listener.port = port;
            Ok(())
        }
        _ => Err(ConfigError::InvalidEnv {
            name: PORT_ENV,
            value: raw.to_string(),
        }),
    }
}
