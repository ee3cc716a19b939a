//! OpenAPI Specification for the Symposium API
//!
//! Generated with utoipa from route annotations and the shared wire types.

use utoipa::OpenApi;

use crate::error::{ApiError, ErrorCode};
use crate::routes::{conversation, health};
use crate::routes::health::{HealthDetails, HealthResponse, HealthStatus};
use crate::types::{
    CreateConversationRequest, CreateConversationResponse, ParticipantResponse,
    SendMessageRequest, SummaryResponse, TurnResponse,
};

use symposium_core::{
    AgentSection, ConversationEvent, ConversationPhase, ConversationType, EntryRole, Envelope,
    EnvelopeKind, PaperRecord, TranscriptEntry,
};

/// OpenAPI document for the Symposium API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Symposium API",
        version = "0.1.0",
        description = "Multi-agent research paper conversation coordination",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:8080", description = "Local Development")
    ),
    tags(
        (name = "conversations", description = "Multi-agent conversation sessions"),
        (name = "health", description = "Service health checks")
    ),
    paths(
        conversation::create_conversation,
        conversation::send_message,
        conversation::get_summary,
        conversation::close_conversation,
        health::ping,
        health::live,
    ),
    components(
        schemas(
            // Requests and responses
            CreateConversationRequest,
            CreateConversationResponse,
            SendMessageRequest,
            TurnResponse,
            SummaryResponse,
            ParticipantResponse,
            HealthResponse,
            HealthStatus,
            HealthDetails,
            // Errors
            ApiError,
            ErrorCode,
            // Domain types
            ConversationType,
            ConversationPhase,
            EntryRole,
            AgentSection,
            TranscriptEntry,
            PaperRecord,
            ConversationEvent,
            Envelope,
            EnvelopeKind,
        )
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Generate the OpenAPI spec as a JSON string.
    pub fn to_json() -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::openapi())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_doc_generates() {
        let json = ApiDoc::to_json().unwrap();
        assert!(json.contains("/api/v1/conversations"));
        assert!(json.contains("Symposium API"));
    }
}
