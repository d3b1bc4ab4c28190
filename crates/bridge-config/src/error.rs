//! Configuration errors.

use std::path::PathBuf;
use thiserror::Error;

/// Error raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The configuration file could not be parsed
    #[error("Failed to parse config file {path}: {message}")]
    Parse {
        /// File path
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// The file extension is not a supported format
    #[error("Unsupported config format: {0} (expected .yaml, .yml or .toml)")]
    UnsupportedFormat(PathBuf),

    /// An environment override could not be parsed
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Environment variable name
        key: String,
        /// Raw value
        value: String,
    },

    /// The merged configuration is inconsistent
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

impl From<ConfigError> for bridge_core::BridgeError {
    fn from(err: ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}
