//! Conversation endpoints
//!
//! HTTP surface over the coordinator: create a session, submit a message
//! (which runs one full multi-agent turn), fetch a summary, and close.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use symposium_agents::Coordinator;
use symposium_core::{ConversationPhase, ConversationType, EntityId, ValidationError};
use tracing::info;

use crate::error::ApiResult;
use crate::state::AppState;
use crate::types::{
    CreateConversationRequest, CreateConversationResponse, SendMessageRequest, SummaryResponse,
    TurnResponse,
};

// ============================================================================
// HANDLERS
// ============================================================================

/// Create a conversation session among 2 to 5 paper agents.
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/api/v1/conversations",
    tag = "conversations",
    request_body = CreateConversationRequest,
    responses(
        (status = 201, description = "Conversation created", body = CreateConversationResponse),
        (status = 400, description = "Invalid request", body = crate::error::ApiError),
        (status = 404, description = "Unknown paper", body = crate::error::ApiError),
        (status = 429, description = "Agent capacity exceeded", body = crate::error::ApiError),
    ),
))]
pub async fn create_conversation(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<CreateConversationRequest>,
) -> ApiResult<impl IntoResponse> {
    let conversation_type = ConversationType::from_db_str(&req.conversation_type)
        .map_err(|e| ValidationError::UnknownConversationType { value: e.0 })?;

    let session_id = coordinator
        .start_conversation_with_deadline(
            req.participant_paper_ids.clone(),
            &req.topic,
            conversation_type,
            req.turn_deadline_ms,
        )
        .await?;

    info!(%session_id, %conversation_type, "conversation created");

    let response = CreateConversationResponse {
        session_id,
        conversation_type,
        participant_paper_ids: req.participant_paper_ids,
        phase: ConversationPhase::Active,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// Submit a message to a conversation, running one turn across all agents.
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/api/v1/conversations/{session_id}/messages",
    tag = "conversations",
    params(
        ("session_id" = String, Path, description = "Session ID"),
    ),
    request_body = SendMessageRequest,
    responses(
        (status = 200, description = "Turn completed", body = TurnResponse),
        (status = 400, description = "Invalid request", body = crate::error::ApiError),
        (status = 404, description = "Session not found", body = crate::error::ApiError),
        (status = 409, description = "Session closed", body = crate::error::ApiError),
        (status = 502, description = "All participants failed", body = crate::error::ApiError),
        (status = 504, description = "Turn deadline elapsed", body = crate::error::ApiError),
    ),
))]
pub async fn send_message(
    State(coordinator): State<Arc<Coordinator>>,
    Path(session_id): Path<EntityId>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<Json<TurnResponse>> {
    let report = coordinator.submit_message(session_id, &req.message).await?;
    Ok(Json(report.into()))
}

/// Fetch a read-only snapshot of a conversation.
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/conversations/{session_id}/summary",
    tag = "conversations",
    params(
        ("session_id" = String, Path, description = "Session ID"),
    ),
    responses(
        (status = 200, description = "Conversation summary", body = SummaryResponse),
        (status = 404, description = "Session not found", body = crate::error::ApiError),
    ),
))]
pub async fn get_summary(
    State(coordinator): State<Arc<Coordinator>>,
    Path(session_id): Path<EntityId>,
) -> ApiResult<Json<SummaryResponse>> {
    let summary = coordinator.summary(session_id)?;
    Ok(Json(summary.into()))
}

/// Close a conversation. Waits for any in-flight turn to finish first.
#[cfg_attr(feature = "openapi", utoipa::path(
    delete,
    path = "/api/v1/conversations/{session_id}",
    tag = "conversations",
    params(
        ("session_id" = String, Path, description = "Session ID"),
    ),
    responses(
        (status = 204, description = "Conversation closed"),
        (status = 404, description = "Session not found", body = crate::error::ApiError),
        (status = 409, description = "Session already closed", body = crate::error::ApiError),
    ),
))]
pub async fn close_conversation(
    State(coordinator): State<Arc<Coordinator>>,
    Path(session_id): Path<EntityId>,
) -> ApiResult<impl IntoResponse> {
    coordinator.close_session(session_id).await?;
    info!(%session_id, "conversation closed");
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_conversation))
        .route("/:session_id/messages", post(send_message))
        .route("/:session_id/summary", get(get_summary))
        .route("/:session_id", delete(close_conversation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;

    #[test]
    fn test_unknown_conversation_type_maps_to_api_error() {
        let err = ConversationType::from_db_str("panel")
            .map_err(|e| ValidationError::UnknownConversationType { value: e.0 })
            .map_err(ApiError::from)
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
