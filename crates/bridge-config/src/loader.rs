//! Configuration sources: file and environment.

use crate::config::BridgeConfig;
use crate::error::ConfigError;
use secrecy::SecretString;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Environment variable naming an optional configuration file
pub const CONFIG_PATH_ENV: &str = "BRIDGE_CONFIG";

/// Load configuration from the process environment.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed, an override is
/// malformed, or the merged configuration fails validation
pub fn load() -> Result<BridgeConfig, ConfigError> {
    load_with(|key| std::env::var(key).ok())
}

/// Load configuration using `lookup` in place of the process environment
///
/// # Errors
/// Same as [`load`]
pub fn load_with<F>(lookup: F) -> Result<BridgeConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match lookup(CONFIG_PATH_ENV).filter(|p| !p.trim().is_empty()) {
        Some(path) => load_file(Path::new(&path))?,
        None => BridgeConfig::default(),
    };
    apply_env(&mut config, lookup)?;
    config.validate()?;
    Ok(config)
}

/// Parse a YAML or TOML configuration file; missing fields take defaults
///
/// # Errors
/// Returns an error if the file cannot be read, has an unsupported
/// extension, or does not parse
pub fn load_file(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    let parsed = match ext.as_deref() {
        Some("yaml" | "yml") => serde_yaml::from_str(&raw).map_err(|e| e.to_string()),
        Some("toml") => toml::from_str(&raw).map_err(|e| e.to_string()),
        _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
    };

    debug!(path = %path.display(), "Loaded configuration file");
    parsed.map_err(|message| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

/// Apply `BRIDGE_*` overrides on top of `config`
///
/// # Errors
/// Returns `ConfigError::InvalidValue` for an override that does not parse
pub fn apply_env<F>(config: &mut BridgeConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(key) = get("BRIDGE_API_KEY").or_else(|| get("ANTHROPIC_API_KEY")) {
        config.api_key = Some(SecretString::new(key));
    }
    if let Some(url) = get("BRIDGE_API_BASE_URL") {
        config.api_base_url = url;
    }
    if let Some(model) = get("BRIDGE_DEFAULT_MODEL") {
        config.default_model = model;
    }
    if let Some(v) = get("BRIDGE_MAX_TOKENS_CEILING") {
        config.max_tokens_ceiling = parse("BRIDGE_MAX_TOKENS_CEILING", &v)?;
    }
    if let Some(v) = get("BRIDGE_DEFAULT_MAX_TOKENS") {
        config.default_max_tokens = parse("BRIDGE_DEFAULT_MAX_TOKENS", &v)?;
    }
    if let Some(v) = get("BRIDGE_DEFAULT_TEMPERATURE") {
        config.default_temperature = parse("BRIDGE_DEFAULT_TEMPERATURE", &v)?;
    }
    if let Some(v) = get("BRIDGE_CACHE_ENABLED") {
        config.cache_enabled = parse_bool("BRIDGE_CACHE_ENABLED", &v)?;
    }
    if let Some(v) = get("BRIDGE_CACHE_TTL_SECS") {
        config.cache_ttl = Duration::from_secs(parse("BRIDGE_CACHE_TTL_SECS", &v)?);
    }
    if let Some(v) = get("BRIDGE_CACHE_POLICY") {
        config.cache_policy =
            serde_yaml::from_str(&v).map_err(|_| invalid("BRIDGE_CACHE_POLICY", &v))?;
    }
    if let Some(v) = get("BRIDGE_RETRY_MAX_ATTEMPTS") {
        config.retry_max_attempts = parse("BRIDGE_RETRY_MAX_ATTEMPTS", &v)?;
    }
    if let Some(v) = get("BRIDGE_RETRY_BASE_DELAY_MS") {
        config.retry_base_delay =
            Duration::from_millis(parse("BRIDGE_RETRY_BASE_DELAY_MS", &v)?);
    }
    if let Some(v) = get("BRIDGE_REQUEST_TIMEOUT_SECS") {
        config.request_timeout =
            Duration::from_secs(parse("BRIDGE_REQUEST_TIMEOUT_SECS", &v)?);
    }
    if let Some(command) = get("BRIDGE_CLI_COMMAND") {
        config.cli_command = command;
    }
    if let Some(host) = get("BRIDGE_HOST") {
        config.host = host;
    }
    if let Some(v) = get("BRIDGE_PORT") {
        config.port = parse("BRIDGE_PORT", &v)?;
    }
    if let Some(level) = get("BRIDGE_LOG_LEVEL") {
        config.log_level = level;
    }
    if let Some(v) = get("BRIDGE_LOG_JSON") {
        config.log_json = parse_bool("BRIDGE_LOG_JSON", &v)?;
    }
    Ok(())
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}
