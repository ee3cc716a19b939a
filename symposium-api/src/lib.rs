//! Symposium API - REST/WebSocket layer
//!
//! HTTP endpoints and the WebSocket envelope protocol over the agent
//! coordinator. Conversations are created and driven over REST; turn
//! progress streams to WebSocket subscribers as notification envelopes.

pub mod config;
pub mod error;
pub mod macros;
#[cfg(feature = "openapi")]
pub mod openapi;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod types;
pub mod ws;

// Re-export commonly used types
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult, ErrorCode};
#[cfg(feature = "openapi")]
pub use openapi::ApiDoc;
pub use routes::create_api_router;
pub use state::AppState;
pub use types::*;
pub use ws::WsState;
