//! # Bridge Backends
//!
//! Backend adapters for the LLM bridge and the startup selector that pins one
//! of them for the process lifetime.
//!
//! Adapters, in selection priority order:
//! - [`DirectApiAdapter`]: HTTP call to the upstream Messages API
//! - [`SdkAdapter`]: in-process SDK entry point
//! - [`ProcessAdapter`]: external command-line process

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod direct_api;
pub mod process;
pub mod sdk;
pub mod selector;

pub use direct_api::{DirectApiAdapter, DirectApiConfig};
pub use process::{ProcessAdapter, ProcessConfig};
pub use sdk::{SdkAdapter, SdkEntry, SdkReply};
pub use selector::{select_backend, standard_adapters, status, ActiveBackend, BackendStatus};

use bridge_core::{CanonicalResponse, Role};
use std::time::Duration;

/// Stamp timing and session metadata onto a response
pub(crate) fn stamp(
    response: CanonicalResponse,
    elapsed: Duration,
    session_id: Option<String>,
) -> CanonicalResponse {
    let response =
        response.with_metadata("duration_ms", serde_json::json!(elapsed.as_millis() as u64));
    match session_id {
        Some(id) => response.with_metadata("session_id", serde_json::json!(id)),
        None => response,
    }
}

/// Wire name of a conversational role
pub(crate) fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}
