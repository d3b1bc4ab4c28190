//! Startup backend selection.
//!
//! Candidates are checked once, in priority order, and the first available one
//! is pinned for the process lifetime. The pinned choice is never re-checked.

use crate::{DirectApiAdapter, DirectApiConfig, ProcessAdapter, ProcessConfig, SdkAdapter, SdkEntry};
use bridge_config::BridgeConfig;
use bridge_core::{BackendAdapter, BackendKind, BridgeError};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The backend chosen at startup
#[derive(Clone)]
pub enum ActiveBackend {
    /// A backend passed its availability check and is pinned
    Pinned {
        /// Kind of the pinned adapter
        kind: BackendKind,
        /// The pinned adapter
        adapter: Arc<dyn BackendAdapter>,
    },
    /// No candidate was available
    None,
}

impl std::fmt::Debug for ActiveBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pinned { kind, adapter } => f
                .debug_struct("Pinned")
                .field("kind", kind)
                .field("name", &adapter.name())
                .finish(),
            Self::None => f.write_str("None"),
        }
    }
}

impl ActiveBackend {
    /// Kind of the pinned backend, or [`BackendKind::None`]
    #[must_use]
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Pinned { kind, .. } => *kind,
            Self::None => BackendKind::None,
        }
    }

    /// The pinned adapter
    ///
    /// # Errors
    /// Returns `NoBackendAvailable` when nothing was pinned
    pub fn adapter(&self) -> Result<&Arc<dyn BackendAdapter>, BridgeError> {
        match self {
            Self::Pinned { adapter, .. } => Ok(adapter),
            Self::None => Err(BridgeError::NoBackendAvailable),
        }
    }

    /// Whether a backend is pinned
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        matches!(self, Self::Pinned { .. })
    }
}

/// Check candidates in order and pin the first available one
pub async fn select_backend(candidates: &[Arc<dyn BackendAdapter>]) -> ActiveBackend {
    for adapter in candidates {
        if adapter.is_available().await {
            let kind = adapter.kind();
            info!(backend = adapter.name(), "Selected backend");
            return ActiveBackend::Pinned {
                kind,
                adapter: Arc::clone(adapter),
            };
        }
        debug!(backend = adapter.name(), "Backend unavailable");
    }

    warn!("No backend available; all calls will fail");
    ActiveBackend::None
}

/// Availability of one candidate backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendStatus {
    /// Adapter name
    pub name: String,
    /// Adapter kind
    pub kind: BackendKind,
    /// Result of a fresh availability check
    pub available: bool,
    /// Whether this is the pinned backend
    pub active: bool,
}

/// Re-check every candidate for reporting. The pinned choice is unaffected.
pub async fn status(
    candidates: &[Arc<dyn BackendAdapter>],
    active: &ActiveBackend,
) -> Vec<BackendStatus> {
    let mut out = Vec::with_capacity(candidates.len());
    for adapter in candidates {
        out.push(BackendStatus {
            name: adapter.name().to_string(),
            kind: adapter.kind(),
            available: adapter.is_available().await,
            active: active.kind() == adapter.kind(),
        });
    }
    out
}

/// Build the production candidate list: direct API, in-process SDK, external process
///
/// # Errors
/// Returns error if the HTTP client cannot be created
pub fn standard_adapters(
    config: &BridgeConfig,
    sdk: Option<Arc<dyn SdkEntry>>,
) -> Result<Vec<Arc<dyn BackendAdapter>>, BridgeError> {
    let direct = DirectApiAdapter::new(
        DirectApiConfig::new(config.api_key.clone(), config.api_base_url.clone())
            .with_timeout(config.request_timeout),
    )?;
    let process = ProcessAdapter::new(
        ProcessConfig::new(config.cli_command.clone()).with_args(config.cli_args.clone()),
    );

    Ok(vec![
        Arc::new(direct),
        Arc::new(SdkAdapter::new(sdk)),
        Arc::new(process),
    ])
}
