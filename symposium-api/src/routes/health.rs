//! Health check endpoints

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use symposium_agents::{AgentRegistry, Coordinator};

use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct HealthDetails {
    pub version: String,
    pub uptime_seconds: u64,
    pub active_agents: usize,
    pub active_sessions: usize,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// Simple ping endpoint for load balancer checks.
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/health/ping",
    tag = "health",
    responses(
        (status = 200, description = "Service is reachable", body = String),
    ),
))]
pub async fn ping() -> impl IntoResponse {
    "pong"
}

/// Liveness endpoint reporting agent and session counts.
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    responses(
        (status = 200, description = "Service health report", body = HealthResponse),
    ),
))]
pub async fn live(
    State(registry): State<Arc<AgentRegistry>>,
    State(coordinator): State<Arc<Coordinator>>,
    State(start_time): State<Instant>,
) -> impl IntoResponse {
    let response = HealthResponse {
        status: HealthStatus::Healthy,
        message: "symposium-api is running".to_string(),
        details: Some(HealthDetails {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: start_time.elapsed().as_secs(),
            active_agents: registry.len(),
            active_sessions: coordinator.session_count(),
        }),
    };
    Json(response)
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/ping", get(ping))
        .route("/live", get(live))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status_serialization() -> Result<(), serde_json::Error> {
        assert_eq!(serde_json::to_string(&HealthStatus::Healthy)?, "\"healthy\"");
        assert_eq!(serde_json::to_string(&HealthStatus::Degraded)?, "\"degraded\"");
        Ok(())
    }

    #[test]
    fn test_health_response_omits_empty_details() -> Result<(), serde_json::Error> {
        let response = HealthResponse {
            status: HealthStatus::Unhealthy,
            message: "down".to_string(),
            details: None,
        };
        let json = serde_json::to_string(&response)?;
        assert!(!json.contains("details"));
        Ok(())
    }
}
