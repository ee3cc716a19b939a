//! Request/Response DTOs for the Symposium API
//!
//! Wire types for the conversation endpoints. Domain results from the
//! coordinator are converted into these before serialization so the HTTP
//! surface stays stable even when internals move.

use serde::{Deserialize, Serialize};
use symposium_agents::{ParticipantInfo, SessionSummary, TurnReport};
use symposium_core::{
    AgentSection, ConversationPhase, ConversationType, EntityId, TranscriptEntry,
};

// ============================================================================
// REQUESTS
// ============================================================================

/// Request body for POST /api/v1/conversations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CreateConversationRequest {
    /// Paper IDs backing the participants, 2 to 5 of them
    pub participant_paper_ids: Vec<String>,
    /// What the conversation is about
    pub topic: String,
    /// One of: collaboration, comparison, synthesis, debate
    pub conversation_type: String,
    /// Optional per-session turn deadline in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_deadline_ms: Option<i64>,
}

/// Request body for POST /api/v1/conversations/{session_id}/messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SendMessageRequest {
    pub message: String,
}

// ============================================================================
// RESPONSES
// ============================================================================

/// Response for a created conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CreateConversationResponse {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub session_id: EntityId,
    pub conversation_type: ConversationType,
    pub participant_paper_ids: Vec<String>,
    pub phase: ConversationPhase,
}

/// Response for a completed turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TurnResponse {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub session_id: EntityId,
    pub turn_index: u32,
    pub conversation_type: ConversationType,
    /// Merged output of the turn
    pub content: String,
    /// Per-agent breakdown of the merged output
    pub sections: Vec<AgentSection>,
    /// True when some (but not all) participants failed
    pub partial: bool,
    pub failed_participants: Vec<String>,
    pub elapsed_ms: i64,
}

impl From<TurnReport> for TurnResponse {
    fn from(report: TurnReport) -> Self {
        Self {
            session_id: report.session_id,
            turn_index: report.turn_index,
            conversation_type: report.conversation_type,
            content: report.content,
            sections: report.sections,
            partial: report.partial,
            failed_participants: report.failed_participants,
            elapsed_ms: report.elapsed_ms,
        }
    }
}

/// One participant in a summary, with its paper title when the agent is live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ParticipantResponse {
    pub paper_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl From<ParticipantInfo> for ParticipantResponse {
    fn from(info: ParticipantInfo) -> Self {
        Self {
            paper_id: info.paper_id,
            title: info.title,
        }
    }
}

/// Response for GET /api/v1/conversations/{session_id}/summary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SummaryResponse {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub session_id: EntityId,
    pub topic: String,
    pub conversation_type: ConversationType,
    pub phase: ConversationPhase,
    pub participants: Vec<ParticipantResponse>,
    pub message_count: usize,
    pub transcript: Vec<TranscriptEntry>,
}

impl From<SessionSummary> for SummaryResponse {
    fn from(summary: SessionSummary) -> Self {
        Self {
            session_id: summary.session_id,
            topic: summary.topic,
            conversation_type: summary.conversation_type,
            phase: summary.phase,
            participants: summary.participants.into_iter().map(Into::into).collect(),
            message_count: summary.message_count,
            transcript: summary.transcript,
        }
    }
}
