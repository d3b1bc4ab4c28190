//! # Bridge Server
//!
//! Thin HTTP wiring in front of the [`bridge_engine::Bridge`].
//!
//! Endpoints:
//! - `POST /v1/messages`: generic dialect, SSE envelopes when streaming
//! - `POST /automation-bridge`: CI-automation dialect, raw chunked text when streaming
//! - `GET /status`, `GET /metrics`, `DELETE /cache`, `GET /cache/stats`, `GET /health`

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use server::{shutdown_signal, Server, ServerConfig, ServerError};
pub use state::AppState;
