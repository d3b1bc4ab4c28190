//! # Bridge Config
//!
//! Flat startup configuration for the LLM bridge.
//!
//! Configuration is read once at process start, in this order:
//! 1. Built-in defaults
//! 2. Optional YAML or TOML file named by `BRIDGE_CONFIG`
//! 3. `BRIDGE_*` environment overrides
//!
//! The merged value is validated and then treated as immutable.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod loader;

pub use config::BridgeConfig;
pub use error::ConfigError;
pub use loader::{apply_env, load, load_file, load_with, CONFIG_PATH_ENV};
