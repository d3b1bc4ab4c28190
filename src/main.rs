//! # LLM Bridge
//!
//! Local request bridge that accepts model calls in a generic or CI-automation
//! dialect and forwards them to whichever execution backend is available at
//! startup: the direct network API, an in-process SDK, or an external CLI.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults (127.0.0.1:8787)
//! llm-bridge
//!
//! # Start with a configuration file
//! BRIDGE_CONFIG=/path/to/bridge.yaml llm-bridge
//!
//! # Start with environment overrides
//! BRIDGE_PORT=9000 ANTHROPIC_API_KEY=... llm-bridge
//! ```

use anyhow::Context;
use bridge_backends::standard_adapters;
use bridge_config::BridgeConfig;
use bridge_engine::BridgeBuilder;
use bridge_server::{AppState, Server, ServerConfig};
use bridge_telemetry::{init_logging, LoggingConfig};
use std::sync::Arc;
use tracing::{error, info};

/// Application entry point
#[tokio::main]
async fn main() {
    let config = match bridge_config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(&LoggingConfig::new(&config.log_level).with_json(config.log_json))
    {
        eprintln!("Failed to initialize logging: {e}");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting LLM bridge"
    );

    if let Err(e) = run(config).await {
        error!(error = %format!("{e:#}"), "Bridge failed");
        std::process::exit(1);
    }
}

/// Main application logic
async fn run(config: BridgeConfig) -> anyhow::Result<()> {
    info!(
        address = %config.listen_addr(),
        cache_policy = ?config.effective_cache_policy(),
        credential = config.has_credential(),
        "Configuration loaded"
    );

    let candidates =
        standard_adapters(&config, None).context("failed to create backend adapters")?;

    let bridge = BridgeBuilder::from_config(&config)
        .candidates(candidates)
        .build()
        .await
        .context("failed to build bridge")?;

    let sweeper = bridge.spawn_cache_sweeper(config.cache_sweep_interval);

    let state = AppState::new(Arc::new(bridge));
    let server_config = ServerConfig::new()
        .with_host(&config.host)
        .with_port(config.port);

    let result = Server::new(server_config, state).run().await;
    sweeper.abort();
    result.context("server stopped with an error")?;

    info!("Bridge shut down");
    Ok(())
}
