//! Shared handler state.

use bridge_engine::Bridge;
use std::sync::Arc;

/// State shared by every handler
#[derive(Debug, Clone)]
pub struct AppState {
    /// The request bridge
    pub bridge: Arc<Bridge>,
}

impl AppState {
    /// Wrap a bridge
    #[must_use]
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self { bridge }
    }
}
