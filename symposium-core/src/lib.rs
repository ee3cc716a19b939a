//! Symposium Core - Entity Types
//!
//! Pure data structures with no behavior beyond validation and state
//! transitions. All other crates depend on this. This crate contains ONLY
//! data types - no coordination logic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Entity identifier using UUIDv7 for timestamp-sortable IDs.
/// UUIDv7 embeds a Unix timestamp, making IDs naturally sortable by creation time.
pub type EntityId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Duration in milliseconds for deadlines and timeout values.
pub type DurationMs = i64;

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

/// Minimum number of participants in a conversation session.
pub const MIN_PARTICIPANTS: usize = 2;

/// Maximum number of participants in a conversation session.
pub const MAX_PARTICIPANTS: usize = 5;

// ============================================================================
// CONVERSATION ENUMS
// ============================================================================

/// Type of multi-agent conversation, dispatched through an explicit policy
/// table rather than inheritance so turn-taking rules stay exhaustively
/// matchable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum ConversationType {
    /// All participants queried in parallel; answers merged into one narrative.
    Collaboration,
    /// Parallel aspect-scoped queries; side-by-side output, no prose merge.
    Comparison,
    /// Sequential chain; each participant builds on the previous answer.
    Synthesis,
    /// Fixed rotation rounds; each round sees the prior round's answers.
    Debate,
}

impl ConversationType {
    /// Convert to wire/database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ConversationType::Collaboration => "collaboration",
            ConversationType::Comparison => "comparison",
            ConversationType::Synthesis => "synthesis",
            ConversationType::Debate => "debate",
        }
    }

    /// Parse from wire/database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, ConversationTypeParseError> {
        match s.trim().to_lowercase().as_str() {
            "collaboration" => Ok(ConversationType::Collaboration),
            "comparison" => Ok(ConversationType::Comparison),
            "synthesis" => Ok(ConversationType::Synthesis),
            "debate" => Ok(ConversationType::Debate),
            _ => Err(ConversationTypeParseError(s.to_string())),
        }
    }
}

impl fmt::Display for ConversationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for ConversationType {
    type Err = ConversationTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid conversation type string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTypeParseError(pub String);

impl fmt::Display for ConversationTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid conversation type: {}", self.0)
    }
}

impl std::error::Error for ConversationTypeParseError {}

/// Phase of a conversation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum ConversationPhase {
    /// Session created, participants resolved, not yet taking turns.
    Created,
    /// Session accepting turns. Participants are immutable from here on.
    Active,
    /// Terminal. No further turns are processed.
    Closed,
}

impl ConversationPhase {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ConversationPhase::Created => "created",
            ConversationPhase::Active => "active",
            ConversationPhase::Closed => "closed",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, ConversationPhaseParseError> {
        match s.trim().to_lowercase().as_str() {
            "created" => Ok(ConversationPhase::Created),
            "active" => Ok(ConversationPhase::Active),
            "closed" => Ok(ConversationPhase::Closed),
            _ => Err(ConversationPhaseParseError(s.to_string())),
        }
    }

    /// Check if a session in this phase can still process turns.
    pub fn is_open(&self) -> bool {
        !matches!(self, ConversationPhase::Closed)
    }
}

impl fmt::Display for ConversationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for ConversationPhase {
    type Err = ConversationPhaseParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid conversation phase string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationPhaseParseError(pub String);

impl fmt::Display for ConversationPhaseParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid conversation phase: {}", self.0)
    }
}

impl std::error::Error for ConversationPhaseParseError {}

/// Debate context window: how much prior debate history each round sees.
/// The source behavior is ambiguous here, so it is a configuration knob
/// rather than a hard-coded choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "kebab-case")]
pub enum DebateContext {
    /// Each round sees only the immediately preceding round (bounds prompt growth).
    #[default]
    PriorRound,
    /// Each round sees every completed round, oldest first.
    AllRounds,
}

impl DebateContext {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            DebateContext::PriorRound => "prior-round",
            DebateContext::AllRounds => "all-rounds",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, DebateContextParseError> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "prior-round" => Ok(DebateContext::PriorRound),
            "all-rounds" => Ok(DebateContext::AllRounds),
            _ => Err(DebateContextParseError(s.to_string())),
        }
    }
}

impl fmt::Display for DebateContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for DebateContext {
    type Err = DebateContextParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid debate context string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebateContextParseError(pub String);

impl fmt::Display for DebateContextParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid debate context: {}", self.0)
    }
}

impl std::error::Error for DebateContextParseError {}

// ============================================================================
// PROTOCOL ENVELOPE
// ============================================================================

/// Kind of protocol envelope exchanged over the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    /// Must be the first envelope on a new connection.
    Initialize,
    Request,
    Response,
    Notification,
    Error,
}

impl EnvelopeKind {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            EnvelopeKind::Initialize => "initialize",
            EnvelopeKind::Request => "request",
            EnvelopeKind::Response => "response",
            EnvelopeKind::Notification => "notification",
            EnvelopeKind::Error => "error",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnvelopeKindParseError> {
        match s.trim().to_lowercase().as_str() {
            "initialize" => Ok(EnvelopeKind::Initialize),
            "request" => Ok(EnvelopeKind::Request),
            "response" => Ok(EnvelopeKind::Response),
            "notification" => Ok(EnvelopeKind::Notification),
            "error" => Ok(EnvelopeKind::Error),
            _ => Err(EnvelopeKindParseError(s.to_string())),
        }
    }

    /// Response and Error envelopes must carry a correlation_id linking them
    /// to a previously observed request.
    pub fn requires_correlation(&self) -> bool {
        matches!(self, EnvelopeKind::Response | EnvelopeKind::Error)
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for EnvelopeKind {
    type Err = EnvelopeKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid envelope kind string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeKindParseError(pub String);

impl fmt::Display for EnvelopeKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid envelope kind: {}", self.0)
    }
}

impl std::error::Error for EnvelopeKindParseError {}

/// Sender identifier used for envelopes originating from the coordinator.
pub const COORDINATOR_SENDER: &str = "coordinator";

/// Recipient identifier for envelopes addressed to every connected client.
pub const BROADCAST_RECIPIENT: &str = "broadcast";

/// The atomic unit of protocol communication.
///
/// Senders and recipients are plain strings: an agent ID (paper ID), a
/// session ID, `coordinator`, or `broadcast`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Envelope {
    /// Unique identifier for this envelope
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub id: EntityId,
    /// Envelope kind
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Agent ID or `coordinator`
    pub sender: String,
    /// Agent ID, session ID, or `broadcast`
    pub recipient: String,
    /// Links a response or error to its originating request
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub correlation_id: Option<EntityId>,
    /// Free-form content: question text, answer text, or error detail
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub payload: serde_json::Value,
    /// When the envelope was created
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub timestamp: Timestamp,
}

impl Envelope {
    /// Create an initialize envelope (first envelope on a new connection).
    pub fn initialize(sender: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: new_entity_id(),
            kind: EnvelopeKind::Initialize,
            sender: sender.into(),
            recipient: COORDINATOR_SENDER.to_string(),
            correlation_id: None,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Create a request envelope.
    pub fn request(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: new_entity_id(),
            kind: EnvelopeKind::Request,
            sender: sender.into(),
            recipient: recipient.into(),
            correlation_id: None,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Create a response envelope correlated to a request.
    pub fn response(
        request_id: EntityId,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: new_entity_id(),
            kind: EnvelopeKind::Response,
            sender: sender.into(),
            recipient: recipient.into(),
            correlation_id: Some(request_id),
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Create a notification envelope (fire-and-forget).
    pub fn notification(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: new_entity_id(),
            kind: EnvelopeKind::Notification,
            sender: sender.into(),
            recipient: recipient.into(),
            correlation_id: None,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Create an error envelope, optionally correlated to the offending request.
    pub fn error(
        correlation_id: Option<EntityId>,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: new_entity_id(),
            kind: EnvelopeKind::Error,
            sender: sender.into(),
            recipient: recipient.into(),
            correlation_id,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Validate the structural envelope invariant: response envelopes must
    /// carry a correlation_id. Error envelopes without one are tolerated only
    /// when the offending request could not be parsed.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.kind == EnvelopeKind::Response && self.correlation_id.is_none() {
            return Err(ProtocolError::MalformedEnvelope {
                reason: "response envelope missing correlation_id".to_string(),
            });
        }
        if self.sender.trim().is_empty() {
            return Err(ProtocolError::MalformedEnvelope {
                reason: "empty sender".to_string(),
            });
        }
        if self.recipient.trim().is_empty() {
            return Err(ProtocolError::MalformedEnvelope {
                reason: "empty recipient".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// PAPER RECORD
// ============================================================================

/// Paper metadata loaded from the external paper store.
/// This is the knowledge context an agent is created around.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PaperRecord {
    /// Opaque paper identifier (doubles as the agent ID)
    pub paper_id: String,
    pub title: String,
    pub abstract_text: String,
    pub authors: Vec<String>,
    pub categories: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub published: Option<Timestamp>,
}

impl PaperRecord {
    /// Create a new paper record with the minimum required fields.
    pub fn new(
        paper_id: impl Into<String>,
        title: impl Into<String>,
        abstract_text: impl Into<String>,
    ) -> Self {
        Self {
            paper_id: paper_id.into(),
            title: title.into(),
            abstract_text: abstract_text.into(),
            authors: Vec::new(),
            categories: Vec::new(),
            published: None,
        }
    }

    /// Set authors.
    pub fn with_authors(mut self, authors: Vec<String>) -> Self {
        self.authors = authors;
        self
    }

    /// Set categories.
    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories;
        self
    }

    /// Set publication timestamp.
    pub fn with_published(mut self, published: Timestamp) -> Self {
        self.published = Some(published);
        self
    }

    /// Check the minimum context an agent needs: non-empty title and abstract.
    pub fn validate_context(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::InvalidContext {
                paper_id: self.paper_id.clone(),
                reason: "title is empty".to_string(),
            });
        }
        if self.abstract_text.trim().is_empty() {
            return Err(ValidationError::InvalidContext {
                paper_id: self.paper_id.clone(),
                reason: "abstract is empty".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// AGENT MEMORY
// ============================================================================

/// One question/answer pair in an agent's bounded conversation memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AgentExchange {
    pub question: String,
    pub answer: String,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub timestamp: Timestamp,
}

impl AgentExchange {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            timestamp: Utc::now(),
        }
    }
}

// ============================================================================
// TRANSCRIPT
// ============================================================================

/// Role of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum EntryRole {
    /// Client-originated content. Turn execution never appends this role
    /// (user text travels inside prompts, not the transcript), but the
    /// serialized vocabulary keeps it so transcripts imported from external
    /// stores, which may interleave user messages, still deserialize.
    User,
    /// Merged multi-agent turn output
    Agents,
    /// Coordinator-authored content (opening prompts)
    System,
}

impl EntryRole {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            EntryRole::User => "user",
            EntryRole::Agents => "agents",
            EntryRole::System => "system",
        }
    }
}

impl fmt::Display for EntryRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

/// One agent's tagged contribution inside a merged transcript entry,
/// so clients can render either the raw per-agent breakdown or the
/// flattened `content` view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AgentSection {
    pub agent_id: String,
    /// Debate round this section belongs to (0 for single-round policies)
    pub round: u32,
    pub content: String,
    pub confidence: f64,
}

impl AgentSection {
    pub fn new(agent_id: impl Into<String>, round: u32, content: impl Into<String>, confidence: f64) -> Self {
        Self {
            agent_id: agent_id.into(),
            round,
            content: content.into(),
            confidence,
        }
    }
}

/// One append-only transcript entry. Every completed turn appends exactly
/// one merged entry; a total turn failure appends nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TranscriptEntry {
    pub turn_index: u32,
    pub role: EntryRole,
    /// Flattened view of the entry
    pub content: String,
    /// Per-agent breakdown (empty for system entries)
    pub sections: Vec<AgentSection>,
    /// True when at least one (but not every) participant failed this turn
    pub partial: bool,
    /// Participants that failed or timed out this turn, in participant order
    pub failed_participants: Vec<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub timestamp: Timestamp,
}

impl TranscriptEntry {
    /// Create a coordinator-authored system entry (opening prompt).
    pub fn system(turn_index: u32, content: impl Into<String>) -> Self {
        Self {
            turn_index,
            role: EntryRole::System,
            content: content.into(),
            sections: Vec::new(),
            partial: false,
            failed_participants: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create the merged multi-agent entry for a completed turn.
    pub fn agents(
        turn_index: u32,
        content: impl Into<String>,
        sections: Vec<AgentSection>,
        partial: bool,
        failed_participants: Vec<String>,
    ) -> Self {
        Self {
            turn_index,
            role: EntryRole::Agents,
            content: content.into(),
            sections,
            partial,
            failed_participants,
            timestamp: Utc::now(),
        }
    }
}

// ============================================================================
// CONVERSATION SESSION
// ============================================================================

/// A stateful multi-agent conversation: participant set, type, phase, and
/// append-only transcript. Sessions hold agent IDs only, never agent objects,
/// so agent disposal is decoupled from conversation lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ConversationSession {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub session_id: EntityId,
    pub conversation_type: ConversationType,
    /// Ordered set of agent IDs, 2..=5, immutable once Active
    pub participants: Vec<String>,
    pub phase: ConversationPhase,
    pub topic: String,
    /// Never truncated while the session is open
    pub transcript: Vec<TranscriptEntry>,
    /// Per-session turn deadline. None falls back to the engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_deadline_ms: Option<DurationMs>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub last_activity_at: Timestamp,
}

impl ConversationSession {
    /// Create a new session in the Created phase.
    ///
    /// Fails if the participant count is outside [2, 5], participants are
    /// duplicated, or the topic is blank.
    pub fn new(
        conversation_type: ConversationType,
        participants: Vec<String>,
        topic: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let topic = topic.into();
        if topic.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "topic".to_string(),
            });
        }
        if participants.len() < MIN_PARTICIPANTS || participants.len() > MAX_PARTICIPANTS {
            return Err(ValidationError::ParticipantCountOutOfRange {
                count: participants.len(),
                min: MIN_PARTICIPANTS,
                max: MAX_PARTICIPANTS,
            });
        }
        for (i, id) in participants.iter().enumerate() {
            if id.trim().is_empty() {
                return Err(ValidationError::InvalidValue {
                    field: "participant_paper_ids".to_string(),
                    reason: format!("participant {} is empty", i),
                });
            }
            if participants[..i].contains(id) {
                return Err(ValidationError::InvalidValue {
                    field: "participant_paper_ids".to_string(),
                    reason: format!("duplicate participant: {}", id),
                });
            }
        }

        let now = Utc::now();
        Ok(Self {
            session_id: new_entity_id(),
            conversation_type,
            participants,
            phase: ConversationPhase::Created,
            topic,
            transcript: Vec::new(),
            turn_deadline_ms: None,
            created_at: now,
            last_activity_at: now,
        })
    }

    /// Override the engine's turn deadline for this session. Must be
    /// strictly positive.
    pub fn with_turn_deadline(mut self, deadline_ms: DurationMs) -> Result<Self, ValidationError> {
        if deadline_ms <= 0 {
            return Err(ValidationError::InvalidValue {
                field: "turn_deadline_ms".to_string(),
                reason: format!("must be positive, got {}", deadline_ms),
            });
        }
        self.turn_deadline_ms = Some(deadline_ms);
        Ok(self)
    }

    /// Transition Created -> Active. Participants are frozen from here on.
    pub fn activate(&mut self) -> Result<(), SessionError> {
        match self.phase {
            ConversationPhase::Created => {
                self.phase = ConversationPhase::Active;
                self.touch();
                Ok(())
            }
            ConversationPhase::Active => Ok(()),
            ConversationPhase::Closed => Err(SessionError::Closed {
                session_id: self.session_id,
            }),
        }
    }

    /// Transition to the terminal Closed phase.
    pub fn close(&mut self) {
        self.phase = ConversationPhase::Closed;
        self.touch();
    }

    /// Append one transcript entry. Rejected once the session is Closed.
    pub fn append_entry(&mut self, entry: TranscriptEntry) -> Result<(), SessionError> {
        if self.phase == ConversationPhase::Closed {
            return Err(SessionError::Closed {
                session_id: self.session_id,
            });
        }
        self.transcript.push(entry);
        self.touch();
        Ok(())
    }

    /// Index the next turn will occupy. The opening prompt is entry 0;
    /// user-initiated turns start at 1.
    pub fn next_turn_index(&self) -> u32 {
        self.transcript
            .iter()
            .map(|e| e.turn_index + 1)
            .max()
            .unwrap_or(0)
    }

    /// Refresh the activity timestamp.
    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    /// Check whether this session has been idle longer than `timeout_ms`.
    pub fn is_idle(&self, now: Timestamp, timeout_ms: DurationMs) -> bool {
        now.signed_duration_since(self.last_activity_at)
            .num_milliseconds()
            > timeout_ms
    }
}

// ============================================================================
// CONVERSATION EVENTS
// ============================================================================

/// Coordination-path events for observability consumers.
///
/// Broadcast by the coordinator during turn execution and forwarded to push
/// channel clients as notification envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConversationEvent {
    /// An agent runtime accepted a question.
    AgentQueryReceived {
        #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
        session_id: Option<EntityId>,
        turn_index: u32,
        agent_id: String,
    },
    /// An agent runtime produced an answer.
    AgentResponseGenerated {
        #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
        session_id: Option<EntityId>,
        turn_index: u32,
        agent_id: String,
        elapsed_ms: i64,
    },
    /// A turn completed and its merged entry was appended.
    ConversationTurnCompleted {
        #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
        session_id: EntityId,
        turn_index: u32,
        partial: bool,
    },
    /// A turn failed as a whole; nothing was appended.
    ConversationTurnFailed {
        #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
        session_id: EntityId,
        turn_index: u32,
        detail: String,
    },
    /// A session was created and activated.
    SessionCreated {
        #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
        session_id: EntityId,
        conversation_type: ConversationType,
        participant_count: usize,
    },
    /// A session reached the terminal phase.
    SessionClosed {
        #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
        session_id: EntityId,
        reason: String,
    },
    /// Push channel client finished initialization.
    Connected {
        #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
        connection_id: EntityId,
    },
    /// Push channel client disconnected.
    Disconnected { reason: String },
    /// Non-fatal delivery problem (e.g. lagged consumer).
    Error { message: String },
}

impl ConversationEvent {
    /// Stable dotted event name for logging and subscription filters.
    pub fn event_type(&self) -> &'static str {
        match self {
            ConversationEvent::AgentQueryReceived { .. } => "agent.query_received",
            ConversationEvent::AgentResponseGenerated { .. } => "agent.response_generated",
            ConversationEvent::ConversationTurnCompleted { .. } => "conversation.turn_completed",
            ConversationEvent::ConversationTurnFailed { .. } => "conversation.turn_failed",
            ConversationEvent::SessionCreated { .. } => "conversation.session_created",
            ConversationEvent::SessionClosed { .. } => "conversation.session_closed",
            ConversationEvent::Connected { .. } => "connection.connected",
            ConversationEvent::Disconnected { .. } => "connection.disconnected",
            ConversationEvent::Error { .. } => "connection.error",
        }
    }
}

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Protocol-layer errors. Connection-fatal: a connection that produces one
/// is closed after the error envelope is delivered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Envelope out of order: expected {expected}, got {got}")]
    EnvelopeOutOfOrder { expected: String, got: String },

    #[error("Unknown correlation id: {correlation_id}")]
    UnknownCorrelation { correlation_id: EntityId },

    #[error("Malformed envelope: {reason}")]
    MalformedEnvelope { reason: String },

    #[error("Connection closed")]
    ConnectionClosed,
}

/// Request-shape errors. Request-local, never connection-fatal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Participant count {count} out of range [{min}, {max}]")]
    ParticipantCountOutOfRange {
        count: usize,
        min: usize,
        max: usize,
    },

    #[error("Unknown conversation type: {value}")]
    UnknownConversationType { value: String },

    #[error("Invalid paper context for {paper_id}: {reason}")]
    InvalidContext { paper_id: String, reason: String },
}

/// Agent registry errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Agent registry at capacity ({limit} active agents)")]
    CapacityExceeded { limit: usize },

    #[error("Agent not found: {agent_id}")]
    AgentNotFound { agent_id: String },

    #[error("Paper not found: {paper_id}")]
    PaperNotFound { paper_id: String },
}

/// Turn-level errors. A turn fails as a whole only when every participant
/// failed; partial failure is surfaced as data, not as an error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TurnError {
    #[error("All participants failed in session {session_id} turn {turn_index}: {failures:?}")]
    TotalTurnFailure {
        session_id: EntityId,
        turn_index: u32,
        failures: Vec<String>,
    },

    #[error("Turn deadline elapsed with zero successful participants in session {session_id} turn {turn_index}")]
    DeadlineElapsed {
        session_id: EntityId,
        turn_index: u32,
    },
}

/// Session lifecycle errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session not found: {session_id}")]
    NotFound { session_id: EntityId },

    #[error("Session is closed: {session_id}")]
    Closed { session_id: EntityId },

    #[error("Participants are immutable once session {session_id} is active")]
    ParticipantsImmutable { session_id: EntityId },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Master error type for all symposium errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SymposiumError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Turn error: {0}")]
    Turn(#[from] TurnError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Model backend failure surfaced outside a session turn (e.g. a
    /// single-agent query). Carries the failure's display form only; the
    /// structured type lives in the backend crate.
    #[error("Model failure: {detail}")]
    Model { detail: String },
}

/// Result type alias for symposium operations.
pub type SymposiumResult<T> = Result<T, SymposiumError>;

// ============================================================================
// ENGINE CONFIGURATION
// ============================================================================

/// Runtime configuration for the coordination engine.
/// Loaded from `SYMPOSIUM_*` environment variables with defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Ceiling on concurrently active agents per process
    pub max_active_agents: usize,
    /// Shared deadline for one turn's fan-out
    pub turn_deadline_ms: DurationMs,
    /// Number of debate rounds per turn
    pub debate_rounds: u32,
    /// How much prior debate history each round sees
    pub debate_context: DebateContext,
    /// Sessions idle past this window are closed
    pub session_idle_timeout_ms: DurationMs,
    /// Bound on an agent's conversation memory (exchanges)
    pub agent_memory_limit: usize,
    /// Cap on honoring a backend's retry_after hint
    pub rate_limit_retry_cap_ms: DurationMs,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_active_agents: 50,
            turn_deadline_ms: 30_000,
            debate_rounds: 2,
            debate_context: DebateContext::PriorRound,
            session_idle_timeout_ms: 900_000,
            agent_memory_limit: 20,
            rate_limit_retry_cap_ms: 5_000,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    ///
    /// Environment variables:
    /// - `SYMPOSIUM_MAX_ACTIVE_AGENTS` (default: 50)
    /// - `SYMPOSIUM_TURN_DEADLINE_MS` (default: 30000)
    /// - `SYMPOSIUM_DEBATE_ROUNDS` (default: 2)
    /// - `SYMPOSIUM_DEBATE_CONTEXT` ("prior-round" | "all-rounds", default: prior-round)
    /// - `SYMPOSIUM_SESSION_IDLE_TIMEOUT_MS` (default: 900000)
    /// - `SYMPOSIUM_AGENT_MEMORY_LIMIT` (default: 20)
    /// - `SYMPOSIUM_RATE_LIMIT_RETRY_CAP_MS` (default: 5000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_active_agents: env_parse("SYMPOSIUM_MAX_ACTIVE_AGENTS", defaults.max_active_agents),
            turn_deadline_ms: env_parse("SYMPOSIUM_TURN_DEADLINE_MS", defaults.turn_deadline_ms),
            debate_rounds: env_parse("SYMPOSIUM_DEBATE_ROUNDS", defaults.debate_rounds),
            debate_context: std::env::var("SYMPOSIUM_DEBATE_CONTEXT")
                .ok()
                .and_then(|s| DebateContext::from_db_str(&s).ok())
                .unwrap_or(defaults.debate_context),
            session_idle_timeout_ms: env_parse(
                "SYMPOSIUM_SESSION_IDLE_TIMEOUT_MS",
                defaults.session_idle_timeout_ms,
            ),
            agent_memory_limit: env_parse("SYMPOSIUM_AGENT_MEMORY_LIMIT", defaults.agent_memory_limit),
            rate_limit_retry_cap_ms: env_parse(
                "SYMPOSIUM_RATE_LIMIT_RETRY_CAP_MS",
                defaults.rate_limit_retry_cap_ms,
            ),
        }
    }

    /// Validate the configuration. Returns the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_active_agents == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_active_agents".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.turn_deadline_ms <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "turn_deadline_ms".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.debate_rounds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "debate_rounds".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.session_idle_timeout_ms <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "session_idle_timeout_ms".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.agent_memory_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "agent_memory_limit".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.rate_limit_retry_cap_ms < 0 {
            return Err(ConfigError::InvalidValue {
                field: "rate_limit_retry_cap_ms".to_string(),
                reason: "must be non-negative".to_string(),
            });
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

// ============================================================================
// TESTS
// ============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_conversation_type() -> impl Strategy<Value = ConversationType> {
        prop_oneof![
            Just(ConversationType::Collaboration),
            Just(ConversationType::Comparison),
            Just(ConversationType::Synthesis),
            Just(ConversationType::Debate),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// For any participant list with length within [2, 5] and distinct
        /// non-empty IDs, session creation SHALL succeed; outside the range
        /// it SHALL fail with ParticipantCountOutOfRange.
        #[test]
        fn prop_participant_count_enforced(
            count in 0usize..8,
            ct in arb_conversation_type(),
        ) {
            let participants: Vec<String> = (0..count).map(|i| format!("paper-{}", i)).collect();
            let result = ConversationSession::new(ct, participants, "some topic");

            if (MIN_PARTICIPANTS..=MAX_PARTICIPANTS).contains(&count) {
                prop_assert!(result.is_ok());
                let session = result.unwrap();
                prop_assert_eq!(session.participants.len(), count);
                prop_assert_eq!(session.phase, ConversationPhase::Created);
            } else {
                let out_of_range = matches!(
                    result,
                    Err(ValidationError::ParticipantCountOutOfRange { .. })
                );
                prop_assert!(out_of_range, "expected ParticipantCountOutOfRange for count {}", count);
            }
        }

        /// Wire strings round-trip through from_db_str for every enum value.
        #[test]
        fn prop_conversation_type_wire_round_trip(ct in arb_conversation_type()) {
            prop_assert_eq!(ConversationType::from_db_str(ct.as_db_str()).unwrap(), ct);
            // Display and db string agree
            prop_assert_eq!(ct.to_string(), ct.as_db_str());
        }

        /// Envelope JSON round-trips for any sender/recipient pair.
        #[test]
        fn prop_envelope_json_round_trip(
            sender in "[a-z0-9-]{1,16}",
            recipient in "[a-z0-9-]{1,16}",
        ) {
            let envelope = Envelope::request(sender, recipient, serde_json::json!({"message": "q"}));
            let json = serde_json::to_string(&envelope).unwrap();
            let parsed: Envelope = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(parsed, envelope);
        }

        /// For any non-positive deadline, validate() SHALL reject the config.
        #[test]
        fn prop_config_rejects_non_positive_deadlines(deadline in i64::MIN..=0) {
            let config = EngineConfig {
                turn_deadline_ms: deadline,
                ..EngineConfig::default()
            };
            let rejected = matches!(
                config.validate(),
                Err(ConfigError::InvalidValue { field, .. }) if field == "turn_deadline_ms"
            );
            prop_assert!(rejected, "deadline {} must be rejected", deadline);
        }

        /// Appending entries always grows the transcript by exactly one and
        /// never reorders earlier entries.
        #[test]
        fn prop_transcript_append_only(entry_count in 1usize..20) {
            let mut session = ConversationSession::new(
                ConversationType::Collaboration,
                vec!["p1".to_string(), "p2".to_string()],
                "topic",
            ).unwrap();
            session.activate().unwrap();

            for i in 0..entry_count {
                let before = session.transcript.len();
                session
                    .append_entry(TranscriptEntry::agents(i as u32, format!("turn {}", i), vec![], false, vec![]))
                    .unwrap();
                prop_assert_eq!(session.transcript.len(), before + 1);
                prop_assert_eq!(session.transcript[i].turn_index, i as u32);
            }
        }
    }
}
