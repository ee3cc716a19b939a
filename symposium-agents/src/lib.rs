//! Symposium Agents - Paper Agent Runtimes and Conversation Coordination
//!
//! A paper agent wraps one paper's context plus a model backend and answers
//! questions from that paper's perspective. The coordinator orchestrates
//! multi-agent conversation sessions over a registry of live agents:
//! per-type turn policies, deterministic synthesis of partial results, and
//! session lifecycle with idle sweeping.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use symposium_core::{
    AgentExchange, AgentSection, ConversationEvent, ConversationPhase, ConversationSession,
    ConversationType, DebateContext, DurationMs, EngineConfig, EntityId, PaperRecord,
    RegistryError,
    SessionError, SymposiumResult, Timestamp, TranscriptEntry, TurnError, ValidationError,
};
use symposium_llm::{mean_pairwise_overlap, GenerateParams, ModelBackend, ModelFailure, ModelResult};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Confidence attached to agent answers. Backends in this protocol do not
/// self-report confidence, so every answer carries the same default.
pub const DEFAULT_CONFIDENCE: f64 = 0.8;

/// Character budget for the prior answer forwarded along a synthesis chain.
pub const SEQUENTIAL_CONTEXT_CHARS: usize = 200;

/// Character budget for each cross-agent answer forwarded between debate rounds.
pub const DEBATE_CONTEXT_CHARS: usize = 150;

/// Mean pairwise word-overlap above which collaboration output gets a
/// consensus note.
pub const CONSENSUS_THRESHOLD: f64 = 0.3;

/// How many recent memory exchanges are folded into an agent's prompt.
const MEMORY_PROMPT_EXCHANGES: usize = 5;

/// Truncate to a character budget, appending an ellipsis when cut.
fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{}...", head)
    }
}

// ============================================================================
// PAPER STORE
// ============================================================================

/// Source of paper metadata. Agents are created from records loaded here.
#[async_trait]
pub trait PaperStore: Send + Sync {
    async fn load_paper(&self, paper_id: &str) -> Result<PaperRecord, RegistryError>;
}

/// In-process paper store backed by a concurrent map. The production binary
/// seeds it from a catalog file at startup.
#[derive(Debug, Default)]
pub struct InMemoryPaperStore {
    papers: DashMap<String, PaperRecord>,
}

impl InMemoryPaperStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, paper: PaperRecord) {
        self.papers.insert(paper.paper_id.clone(), paper);
    }

    pub fn len(&self) -> usize {
        self.papers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.papers.is_empty()
    }
}

#[async_trait]
impl PaperStore for InMemoryPaperStore {
    async fn load_paper(&self, paper_id: &str) -> Result<PaperRecord, RegistryError> {
        self.papers
            .get(paper_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| RegistryError::PaperNotFound {
                paper_id: paper_id.to_string(),
            })
    }
}

// ============================================================================
// PAPER AGENT
// ============================================================================

/// One agent's answer to one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAnswer {
    pub agent_id: String,
    pub content: String,
    pub confidence: f64,
    pub elapsed_ms: i64,
}

/// A conversational runtime around one paper: context, bounded memory, and
/// a model backend. Shared behind an `Arc`; the memory lock is held only
/// around reads and appends, never across a model call.
pub struct PaperAgent {
    agent_id: String,
    paper: PaperRecord,
    backend: Arc<dyn ModelBackend>,
    memory: Mutex<VecDeque<AgentExchange>>,
    memory_limit: usize,
    params: GenerateParams,
    created_at: Timestamp,
    /// Millisecond timestamp of the last respond() call, for idle eviction
    last_activity_ms: AtomicI64,
}

impl PaperAgent {
    /// Create an agent around a paper. Fails when the paper lacks the
    /// minimum context (non-empty title and abstract).
    pub fn new(
        paper: PaperRecord,
        backend: Arc<dyn ModelBackend>,
        memory_limit: usize,
    ) -> Result<Self, ValidationError> {
        paper.validate_context()?;
        let now = Utc::now();
        Ok(Self {
            agent_id: paper.paper_id.clone(),
            paper,
            backend,
            memory: Mutex::new(VecDeque::new()),
            memory_limit,
            params: GenerateParams::default(),
            created_at: now,
            last_activity_ms: AtomicI64::new(now.timestamp_millis()),
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn paper(&self) -> &PaperRecord {
        &self.paper
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// When this agent last answered (or was created).
    pub fn last_activity(&self) -> Timestamp {
        DateTime::from_timestamp_millis(self.last_activity_ms.load(Ordering::SeqCst))
            .unwrap_or(self.created_at)
    }

    fn touch(&self) {
        self.last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    /// Number of exchanges currently held in memory.
    pub async fn memory_len(&self) -> usize {
        self.memory.lock().await.len()
    }

    /// Answer a question from this paper's perspective.
    ///
    /// The prompt folds in the paper context, a bounded window of recent
    /// exchanges, and any caller-supplied context (prior chain answers,
    /// debate positions). The memory lock is released before the backend
    /// call so slow generations never block other readers.
    pub async fn respond(
        &self,
        question: &str,
        extra_context: Option<&str>,
    ) -> ModelResult<AgentAnswer> {
        self.touch();
        let started = Instant::now();

        let recent: Vec<AgentExchange> = {
            let memory = self.memory.lock().await;
            memory
                .iter()
                .rev()
                .take(MEMORY_PROMPT_EXCHANGES)
                .rev()
                .cloned()
                .collect()
        };

        let prompt = self.build_prompt(question, extra_context, &recent);
        let content = self.backend.generate(&prompt, &self.params).await?;

        {
            let mut memory = self.memory.lock().await;
            memory.push_back(AgentExchange::new(question, content.clone()));
            while memory.len() > self.memory_limit {
                memory.pop_front();
            }
        }
        self.touch();

        Ok(AgentAnswer {
            agent_id: self.agent_id.clone(),
            content,
            confidence: DEFAULT_CONFIDENCE,
            elapsed_ms: started.elapsed().as_millis() as i64,
        })
    }

    fn build_prompt(
        &self,
        question: &str,
        extra_context: Option<&str>,
        recent: &[AgentExchange],
    ) -> String {
        let mut prompt = String::new();
        prompt.push_str(&format!(
            "You are the research paper \"{}\"",
            self.paper.title
        ));
        if !self.paper.authors.is_empty() {
            prompt.push_str(&format!(" by {}", self.paper.authors.join(", ")));
        }
        prompt.push_str(".\n\n");
        prompt.push_str(&format!("Abstract: {}\n", self.paper.abstract_text));

        if !recent.is_empty() {
            prompt.push_str("\nRecent exchanges:\n");
            for exchange in recent {
                prompt.push_str(&format!(
                    "Q: {}\nA: {}\n",
                    exchange.question,
                    truncate_chars(&exchange.answer, SEQUENTIAL_CONTEXT_CHARS)
                ));
            }
        }

        if let Some(extra) = extra_context {
            prompt.push_str(&format!("\n{}\n", extra));
        }

        prompt.push_str(&format!(
            "\nQuestion: {}\n\nAnswer from the perspective of this paper.",
            question
        ));
        prompt
    }
}

impl std::fmt::Debug for PaperAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaperAgent")
            .field("agent_id", &self.agent_id)
            .field("memory_limit", &self.memory_limit)
            .field("backend", &self.backend.backend_id())
            .finish()
    }
}

// ============================================================================
// AGENT REGISTRY
// ============================================================================

/// Live agents keyed by paper ID, with a creation ceiling.
///
/// Reaching the ceiling fails creation rather than evicting; eviction is an
/// explicit maintenance operation driven by the idle sweeper.
pub struct AgentRegistry {
    agents: DashMap<String, Arc<PaperAgent>>,
    max_active: usize,
    count: AtomicUsize,
}

impl AgentRegistry {
    pub fn new(max_active: usize) -> Self {
        Self {
            agents: DashMap::new(),
            max_active,
            count: AtomicUsize::new(0),
        }
    }

    pub fn max_active(&self) -> usize {
        self.max_active
    }

    /// Look up a live agent without creating one.
    pub fn get(&self, agent_id: &str) -> Option<Arc<PaperAgent>> {
        self.agents.get(agent_id).map(|a| a.value().clone())
    }

    /// Return the live agent for `paper_id`, creating it from the store if
    /// absent. Concurrent calls for the same paper yield the same agent.
    pub async fn get_or_create(
        &self,
        paper_id: &str,
        store: &dyn PaperStore,
        backend: Arc<dyn ModelBackend>,
        memory_limit: usize,
    ) -> SymposiumResult<Arc<PaperAgent>> {
        if let Some(existing) = self.get(paper_id) {
            return Ok(existing);
        }

        let paper = store.load_paper(paper_id).await?;

        match self.agents.entry(paper_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => Ok(occupied.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let previous = self.count.fetch_add(1, Ordering::SeqCst);
                if previous >= self.max_active {
                    self.count.fetch_sub(1, Ordering::SeqCst);
                    return Err(RegistryError::CapacityExceeded {
                        limit: self.max_active,
                    }
                    .into());
                }
                let agent = match PaperAgent::new(paper, backend, memory_limit) {
                    Ok(agent) => Arc::new(agent),
                    Err(e) => {
                        self.count.fetch_sub(1, Ordering::SeqCst);
                        return Err(e.into());
                    }
                };
                Ok(vacant.insert(agent).clone())
            }
        }
    }

    /// Dispose of a live agent. Sessions referencing it are unaffected; the
    /// agent is recreated on its next use.
    pub fn deactivate(&self, agent_id: &str) -> bool {
        let removed = self.agents.remove(agent_id).is_some();
        if removed {
            self.count.fetch_sub(1, Ordering::SeqCst);
        }
        removed
    }

    /// Evict agents whose last activity predates `cutoff`. Returns how many
    /// were removed.
    pub fn evict_idle(&self, cutoff: Timestamp) -> usize {
        let idle: Vec<String> = self
            .agents
            .iter()
            .filter(|a| a.value().last_activity() < cutoff)
            .map(|a| a.key().clone())
            .collect();
        let mut evicted = 0;
        for agent_id in idle {
            if self.deactivate(&agent_id) {
                debug!(agent_id = %agent_id, "evicted idle agent");
                evicted += 1;
            }
        }
        evicted
    }

    pub fn list_active(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.iter().map(|a| a.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("active", &self.len())
            .field("max_active", &self.max_active)
            .finish()
    }
}

// ============================================================================
// TURN POLICIES
// ============================================================================

/// Per-conversation-type turn-taking rule, dispatched through an explicit
/// table so adding a type forces every match to be revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPolicy {
    /// Same question to every participant at once
    Parallel,
    /// Parallel, with each agent asked to contrast its own approach
    ParallelComparison,
    /// Participant order chain; each link sees the prior answer
    Sequential,
    /// Fixed-rotation rounds; later rounds see earlier positions
    Rounds { rounds: u32 },
}

impl TurnPolicy {
    pub fn for_type(conversation_type: ConversationType, config: &EngineConfig) -> Self {
        match conversation_type {
            ConversationType::Collaboration => TurnPolicy::Parallel,
            ConversationType::Comparison => TurnPolicy::ParallelComparison,
            ConversationType::Synthesis => TurnPolicy::Sequential,
            ConversationType::Debate => TurnPolicy::Rounds {
                rounds: config.debate_rounds,
            },
        }
    }
}

// ============================================================================
// SYNTHESIZER
// ============================================================================

/// One participant's result for one round of a turn.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutcome {
    pub agent_id: String,
    pub round: u32,
    pub result: ModelResult<AgentAnswer>,
}

impl AgentOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Deterministic merge of one turn's outcomes.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedMessage {
    pub content: String,
    pub sections: Vec<AgentSection>,
    pub partial: bool,
    pub failed_participants: Vec<String>,
}

/// Merges per-agent outcomes into one message per turn.
///
/// Ordering follows the session's participant list (and round number within
/// it), never arrival time, so the same outcomes always produce the same
/// bytes.
#[derive(Debug, Clone)]
pub struct Synthesizer {
    consensus_threshold: f64,
}

impl Default for Synthesizer {
    fn default() -> Self {
        Self {
            consensus_threshold: CONSENSUS_THRESHOLD,
        }
    }
}

impl Synthesizer {
    pub fn new(consensus_threshold: f64) -> Self {
        Self {
            consensus_threshold,
        }
    }

    /// Merge outcomes for one turn. Must be called with at least one
    /// successful outcome; total failure is handled upstream.
    pub fn merge(
        &self,
        conversation_type: ConversationType,
        participants: &[String],
        question: &str,
        outcomes: &[AgentOutcome],
    ) -> MergedMessage {
        let sections = Self::ordered_sections(participants, outcomes);
        let failed_participants = Self::ordered_failures(participants, outcomes);
        let partial = !failed_participants.is_empty();

        let content = match conversation_type {
            ConversationType::Collaboration => self.merge_collaboration(question, &sections),
            ConversationType::Comparison => Self::merge_comparison(question, &sections),
            ConversationType::Synthesis => Self::merge_synthesis(&sections),
            ConversationType::Debate => Self::merge_debate(question, participants, &sections),
        };

        MergedMessage {
            content,
            sections,
            partial,
            failed_participants,
        }
    }

    /// Successful outcomes as sections, ordered by (participant index, round).
    fn ordered_sections(participants: &[String], outcomes: &[AgentOutcome]) -> Vec<AgentSection> {
        let mut sections = Vec::new();
        for participant in participants {
            let mut rounds: Vec<&AgentOutcome> = outcomes
                .iter()
                .filter(|o| &o.agent_id == participant && o.is_success())
                .collect();
            rounds.sort_by_key(|o| o.round);
            for outcome in rounds {
                if let Ok(answer) = &outcome.result {
                    sections.push(AgentSection::new(
                        participant.clone(),
                        outcome.round,
                        answer.content.clone(),
                        answer.confidence,
                    ));
                }
            }
        }
        sections
    }

    /// Participants with at least one failed round, in participant order.
    fn ordered_failures(participants: &[String], outcomes: &[AgentOutcome]) -> Vec<String> {
        participants
            .iter()
            .filter(|p| outcomes.iter().any(|o| &o.agent_id == *p && !o.is_success()))
            .cloned()
            .collect()
    }

    fn merge_collaboration(&self, question: &str, sections: &[AgentSection]) -> String {
        let parts: Vec<String> = sections
            .iter()
            .map(|s| format!("[{}] {}", s.agent_id, s.content))
            .collect();
        let mut content = format!(
            "Combined perspective from {} paper agent(s) on \"{}\":\n\n{}",
            sections.len(),
            question,
            parts.join("\n\n")
        );

        if sections.len() >= 2 {
            let texts: Vec<&str> = sections.iter().map(|s| s.content.as_str()).collect();
            let score = mean_pairwise_overlap(&texts);
            if score >= self.consensus_threshold {
                content.push_str(&format!(
                    "\n\nConsensus: the agents broadly agree (overlap {:.2}).",
                    score
                ));
            }
        }
        content
    }

    fn merge_comparison(question: &str, sections: &[AgentSection]) -> String {
        let parts: Vec<String> = sections
            .iter()
            .map(|s| format!("[{}]\n{}", s.agent_id, s.content))
            .collect();
        format!(
            "Side-by-side comparison for \"{}\":\n\n{}",
            question,
            parts.join("\n\n---\n\n")
        )
    }

    fn merge_synthesis(sections: &[AgentSection]) -> String {
        // The chain's final successful answer is the synthesis; earlier
        // answers already fed into it as context.
        let chain: Vec<&str> = sections.iter().map(|s| s.agent_id.as_str()).collect();
        match sections.last() {
            Some(last) => format!(
                "{}\n\n(Synthesized through: {})",
                last.content,
                chain.join(", ")
            ),
            None => String::new(),
        }
    }

    fn merge_debate(question: &str, participants: &[String], sections: &[AgentSection]) -> String {
        let final_round = sections.iter().map(|s| s.round).max().unwrap_or(0);

        // Highest confidence in the final round wins; ties go to the
        // earliest participant.
        let mut winner: Option<&AgentSection> = None;
        for participant in participants {
            let candidate = sections
                .iter()
                .find(|s| &s.agent_id == participant && s.round == final_round);
            if let Some(c) = candidate {
                match winner {
                    Some(w) if c.confidence <= w.confidence => {}
                    _ => winner = Some(c),
                }
            }
        }

        match winner {
            Some(w) => format!(
                "Debate on \"{}\" concluded after {} round(s).\n\nPrevailing position [{}] (confidence {:.2}):\n{}",
                question,
                final_round + 1,
                w.agent_id,
                w.confidence,
                w.content
            ),
            None => String::new(),
        }
    }
}

// ============================================================================
// COORDINATOR
// ============================================================================

/// Result of one completed turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnReport {
    pub session_id: EntityId,
    pub turn_index: u32,
    pub conversation_type: ConversationType,
    pub content: String,
    pub sections: Vec<AgentSection>,
    pub partial: bool,
    pub failed_participants: Vec<String>,
    pub elapsed_ms: i64,
}

/// One participant in a session summary, with its paper title when the
/// agent is still live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub paper_id: String,
    pub title: Option<String>,
}

/// Read-only snapshot of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: EntityId,
    pub topic: String,
    pub conversation_type: ConversationType,
    pub phase: ConversationPhase,
    pub participants: Vec<ParticipantInfo>,
    pub message_count: usize,
    pub transcript: Vec<TranscriptEntry>,
}

struct SessionEntry {
    /// Serializes turns per session: held for a whole turn, so queued turns
    /// run FIFO and close takes effect at a turn boundary.
    turn_lock: Mutex<()>,
    session: std::sync::RwLock<ConversationSession>,
}

impl SessionEntry {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, ConversationSession> {
        self.session.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ConversationSession> {
        self.session.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Orchestrates multi-agent conversation sessions.
///
/// Owns no model state itself: agents live in the registry, papers in the
/// store, transcripts in per-session entries. Only the coordinator mutates
/// sessions.
pub struct Coordinator {
    registry: Arc<AgentRegistry>,
    store: Arc<dyn PaperStore>,
    backend: Arc<dyn ModelBackend>,
    config: EngineConfig,
    synthesizer: Synthesizer,
    sessions: DashMap<EntityId, Arc<SessionEntry>>,
    events: Option<broadcast::Sender<ConversationEvent>>,
}

impl Coordinator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        store: Arc<dyn PaperStore>,
        backend: Arc<dyn ModelBackend>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            store,
            backend,
            config,
            synthesizer: Synthesizer::default(),
            sessions: DashMap::new(),
            events: None,
        }
    }

    /// Attach an event channel. Turn and lifecycle events are broadcast on
    /// it; a missing or full channel never blocks coordination.
    pub fn with_events(mut self, events: broadcast::Sender<ConversationEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn has_session(&self, session_id: EntityId) -> bool {
        self.sessions.contains_key(&session_id)
    }

    fn emit(&self, event: ConversationEvent) {
        debug!(event = event.event_type(), "conversation event");
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn session_entry(&self, session_id: EntityId) -> Result<Arc<SessionEntry>, SessionError> {
        self.sessions
            .get(&session_id)
            .map(|e| e.value().clone())
            .ok_or(SessionError::NotFound { session_id })
    }

    /// Create a session: validate, resolve every participant to a live
    /// agent, seed the transcript with the opening prompt, and activate.
    pub async fn start_conversation(
        &self,
        participant_paper_ids: Vec<String>,
        topic: &str,
        conversation_type: ConversationType,
    ) -> SymposiumResult<EntityId> {
        self.start_conversation_with_deadline(participant_paper_ids, topic, conversation_type, None)
            .await
    }

    /// Like `start_conversation`, with an optional per-session override of
    /// the engine turn deadline.
    pub async fn start_conversation_with_deadline(
        &self,
        participant_paper_ids: Vec<String>,
        topic: &str,
        conversation_type: ConversationType,
        turn_deadline_ms: Option<DurationMs>,
    ) -> SymposiumResult<EntityId> {
        let mut session =
            ConversationSession::new(conversation_type, participant_paper_ids, topic)?;
        if let Some(deadline_ms) = turn_deadline_ms {
            session = session.with_turn_deadline(deadline_ms)?;
        }

        // A participant that cannot be resolved fails the whole request;
        // sessions never start with ghost members.
        for paper_id in session.participants.clone() {
            self.registry
                .get_or_create(
                    &paper_id,
                    self.store.as_ref(),
                    self.backend.clone(),
                    self.config.agent_memory_limit,
                )
                .await?;
        }

        let opening = opening_prompt(conversation_type, &session.topic, &session.participants);
        session.append_entry(TranscriptEntry::system(0, opening))?;
        session.activate()?;

        let session_id = session.session_id;
        let participant_count = session.participants.len();
        self.sessions.insert(
            session_id,
            Arc::new(SessionEntry {
                turn_lock: Mutex::new(()),
                session: std::sync::RwLock::new(session),
            }),
        );

        info!(
            session_id = %session_id,
            conversation_type = %conversation_type,
            participants = participant_count,
            "conversation session created"
        );
        self.emit(ConversationEvent::SessionCreated {
            session_id,
            conversation_type,
            participant_count,
        });
        Ok(session_id)
    }

    /// Run one turn: fan the message out under the session's policy and the
    /// shared deadline, merge what came back, and append exactly one
    /// transcript entry. Zero successful participants fails the turn and
    /// leaves the session untouched.
    pub async fn submit_message(
        &self,
        session_id: EntityId,
        message: &str,
    ) -> SymposiumResult<TurnReport> {
        if message.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "message".to_string(),
            }
            .into());
        }

        let entry = self.session_entry(session_id)?;
        let _turn = entry.turn_lock.lock().await;

        let (conversation_type, participants, turn_index, deadline_ms) = {
            let session = entry.read();
            if session.phase == ConversationPhase::Closed {
                return Err(SessionError::Closed { session_id }.into());
            }
            (
                session.conversation_type,
                session.participants.clone(),
                session.next_turn_index(),
                session
                    .turn_deadline_ms
                    .unwrap_or(self.config.turn_deadline_ms),
            )
        };

        let started = Instant::now();
        let deadline = Duration::from_millis(deadline_ms.max(0) as u64);
        let policy = TurnPolicy::for_type(conversation_type, &self.config);
        let outcomes = self
            .run_turn(policy, &participants, message, session_id, turn_index, started, deadline)
            .await;

        if !outcomes.iter().any(AgentOutcome::is_success) {
            let all_timeouts = outcomes
                .iter()
                .all(|o| matches!(o.result, Err(ModelFailure::Timeout { .. })));
            let failures: Vec<String> = outcomes
                .iter()
                .filter_map(|o| {
                    o.result
                        .as_ref()
                        .err()
                        .map(|e| format!("{}: {}", o.agent_id, e))
                })
                .collect();
            let err = if all_timeouts && !outcomes.is_empty() {
                TurnError::DeadlineElapsed {
                    session_id,
                    turn_index,
                }
            } else {
                TurnError::TotalTurnFailure {
                    session_id,
                    turn_index,
                    failures,
                }
            };
            warn!(session_id = %session_id, turn_index, error = %err, "turn failed");
            self.emit(ConversationEvent::ConversationTurnFailed {
                session_id,
                turn_index,
                detail: err.to_string(),
            });
            return Err(err.into());
        }

        let merged = self
            .synthesizer
            .merge(conversation_type, &participants, message, &outcomes);

        {
            let mut session = entry.write();
            session.append_entry(TranscriptEntry::agents(
                turn_index,
                merged.content.clone(),
                merged.sections.clone(),
                merged.partial,
                merged.failed_participants.clone(),
            ))?;
        }

        info!(
            session_id = %session_id,
            turn_index,
            partial = merged.partial,
            elapsed_ms = started.elapsed().as_millis() as i64,
            "turn completed"
        );
        self.emit(ConversationEvent::ConversationTurnCompleted {
            session_id,
            turn_index,
            partial: merged.partial,
        });

        Ok(TurnReport {
            session_id,
            turn_index,
            conversation_type,
            content: merged.content,
            sections: merged.sections,
            partial: merged.partial,
            failed_participants: merged.failed_participants,
            elapsed_ms: started.elapsed().as_millis() as i64,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_turn(
        &self,
        policy: TurnPolicy,
        participants: &[String],
        message: &str,
        session_id: EntityId,
        turn_index: u32,
        started: Instant,
        deadline: Duration,
    ) -> Vec<AgentOutcome> {
        match policy {
            TurnPolicy::Parallel => {
                let futures = participants.iter().map(|pid| {
                    self.call_agent(pid, message.to_string(), None, session_id, turn_index, 0, started, deadline)
                });
                futures_util::future::join_all(futures).await
            }
            TurnPolicy::ParallelComparison => {
                let futures = participants.iter().map(|pid| {
                    let question = format!(
                        "Compare your paper's approach with respect to: {}",
                        message
                    );
                    self.call_agent(pid, question, None, session_id, turn_index, 0, started, deadline)
                });
                futures_util::future::join_all(futures).await
            }
            TurnPolicy::Sequential => {
                let mut outcomes = Vec::with_capacity(participants.len());
                let mut prior: Option<(String, String)> = None;
                for pid in participants {
                    let extra = prior.as_ref().map(|(id, content)| {
                        format!(
                            "Previous agent {} responded: {}",
                            id,
                            truncate_chars(content, SEQUENTIAL_CONTEXT_CHARS)
                        )
                    });
                    let outcome = self
                        .call_agent(pid, message.to_string(), extra, session_id, turn_index, 0, started, deadline)
                        .await;
                    if let Ok(answer) = &outcome.result {
                        prior = Some((pid.clone(), answer.content.clone()));
                    }
                    // A failed link drops out; the chain continues from the
                    // last successful answer.
                    outcomes.push(outcome);
                }
                outcomes
            }
            TurnPolicy::Rounds { rounds } => {
                let mut completed: Vec<Vec<AgentOutcome>> = Vec::new();
                for round in 0..rounds {
                    let mut round_outcomes = Vec::with_capacity(participants.len());
                    for pid in participants {
                        let extra =
                            debate_context(&completed, pid, self.config.debate_context);
                        let outcome = self
                            .call_agent(pid, message.to_string(), extra, session_id, turn_index, round, started, deadline)
                            .await;
                        round_outcomes.push(outcome);
                    }
                    completed.push(round_outcomes);
                }
                completed.into_iter().flatten().collect()
            }
        }
    }

    /// One agent call under the remaining turn deadline, with the
    /// single-retry rate-limit policy.
    #[allow(clippy::too_many_arguments)]
    async fn call_agent(
        &self,
        agent_id: &str,
        question: String,
        extra_context: Option<String>,
        session_id: EntityId,
        turn_index: u32,
        round: u32,
        started: Instant,
        deadline: Duration,
    ) -> AgentOutcome {
        let Some(remaining) = deadline.checked_sub(started.elapsed()) else {
            return AgentOutcome {
                agent_id: agent_id.to_string(),
                round,
                result: Err(ModelFailure::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as i64,
                }),
            };
        };

        let result = match tokio::time::timeout(
            remaining,
            self.query_with_retry(agent_id, &question, extra_context.as_deref(), Some(session_id), turn_index),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ModelFailure::Timeout {
                elapsed_ms: deadline.as_millis() as i64,
            }),
        };

        AgentOutcome {
            agent_id: agent_id.to_string(),
            round,
            result,
        }
    }

    /// Resolve the agent and ask it the question. A rate-limited call is
    /// retried exactly once after the backend's hint (capped); any other
    /// failure is final.
    async fn query_with_retry(
        &self,
        agent_id: &str,
        question: &str,
        extra_context: Option<&str>,
        session_id: Option<EntityId>,
        turn_index: u32,
    ) -> ModelResult<AgentAnswer> {
        let agent = self
            .registry
            .get_or_create(
                agent_id,
                self.store.as_ref(),
                self.backend.clone(),
                self.config.agent_memory_limit,
            )
            .await
            .map_err(|e| ModelFailure::ModelError {
                detail: e.to_string(),
            })?;

        self.emit(ConversationEvent::AgentQueryReceived {
            session_id,
            turn_index,
            agent_id: agent_id.to_string(),
        });

        let result = match agent.respond(question, extra_context).await {
            Err(ModelFailure::RateLimited { retry_after_ms }) => {
                let wait = retry_after_ms.clamp(0, self.config.rate_limit_retry_cap_ms) as u64;
                debug!(agent_id = %agent_id, wait_ms = wait, "rate limited, retrying once");
                tokio::time::sleep(Duration::from_millis(wait)).await;
                agent.respond(question, extra_context).await
            }
            other => other,
        };

        if let Ok(answer) = &result {
            self.emit(ConversationEvent::AgentResponseGenerated {
                session_id,
                turn_index,
                agent_id: agent_id.to_string(),
                elapsed_ms: answer.elapsed_ms,
            });
        }
        result
    }

    /// Ask one agent directly, outside any session.
    pub async fn query_agent(
        &self,
        paper_id: &str,
        question: &str,
    ) -> SymposiumResult<AgentAnswer> {
        if question.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "message".to_string(),
            }
            .into());
        }
        let deadline = Duration::from_millis(self.config.turn_deadline_ms.max(0) as u64);
        match tokio::time::timeout(
            deadline,
            self.query_with_retry(paper_id, question, None, None, 0),
        )
        .await
        {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(ModelFailure::Timeout {
                elapsed_ms: deadline.as_millis() as i64,
            }
            .into()),
        }
    }

    /// Close a session. Waits for any in-flight turn, so closing takes
    /// effect at a turn boundary. Closing a closed session is an error.
    pub async fn close_session(&self, session_id: EntityId) -> SymposiumResult<()> {
        let entry = self.session_entry(session_id)?;
        let _turn = entry.turn_lock.lock().await;
        {
            let mut session = entry.write();
            if session.phase == ConversationPhase::Closed {
                return Err(SessionError::Closed { session_id }.into());
            }
            session.close();
        }
        info!(session_id = %session_id, "session closed");
        self.emit(ConversationEvent::SessionClosed {
            session_id,
            reason: "client request".to_string(),
        });
        Ok(())
    }

    /// Close sessions idle past the configured window. Sessions with a turn
    /// in flight are skipped until the next sweep. Returns how many closed.
    pub fn sweep_idle_sessions(&self) -> usize {
        let now = Utc::now();
        let mut closed = 0;
        for item in self.sessions.iter() {
            let entry = item.value().clone();
            let Ok(_turn) = entry.turn_lock.try_lock() else {
                continue;
            };
            let mut session = entry.write();
            if session.phase.is_open()
                && session.is_idle(now, self.config.session_idle_timeout_ms)
            {
                let session_id = session.session_id;
                session.close();
                drop(session);
                info!(session_id = %session_id, "session closed after idle timeout");
                self.emit(ConversationEvent::SessionClosed {
                    session_id,
                    reason: "idle timeout".to_string(),
                });
                closed += 1;
            }
        }
        closed
    }

    /// Read-only session snapshot. Closed sessions remain queryable.
    pub fn summary(&self, session_id: EntityId) -> SymposiumResult<SessionSummary> {
        let entry = self.session_entry(session_id)?;
        let session = entry.read().clone();
        let participants = session
            .participants
            .iter()
            .map(|paper_id| ParticipantInfo {
                paper_id: paper_id.clone(),
                title: self.registry.get(paper_id).map(|a| a.paper().title.clone()),
            })
            .collect();
        Ok(SessionSummary {
            session_id: session.session_id,
            topic: session.topic,
            conversation_type: session.conversation_type,
            phase: session.phase,
            participants,
            message_count: session.transcript.len(),
            transcript: session.transcript,
        })
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("sessions", &self.sessions.len())
            .field("registry", &self.registry)
            .finish()
    }
}

/// Opening system prompt seeded into every new session's transcript,
/// naming the topic and participants.
fn opening_prompt(
    conversation_type: ConversationType,
    topic: &str,
    participants: &[String],
) -> String {
    let roster = participants.join(", ");
    match conversation_type {
        ConversationType::Collaboration => format!(
            "This is a collaboration between {} paper agents ({}) on the topic: {}. Each agent contributes its paper's perspective and builds on the others.",
            participants.len(),
            roster,
            topic
        ),
        ConversationType::Comparison => format!(
            "This is a comparison between {} paper agents ({}) on the topic: {}. Each agent explains how its paper's approach differs from the others.",
            participants.len(),
            roster,
            topic
        ),
        ConversationType::Synthesis => format!(
            "This is a synthesis between {} paper agents ({}) on the topic: {}. Each agent builds on the previous answer toward a combined view.",
            participants.len(),
            roster,
            topic
        ),
        ConversationType::Debate => format!(
            "This is a debate between {} paper agents ({}) on the topic: {}. Each agent defends its paper's position with evidence.",
            participants.len(),
            roster,
            topic
        ),
    }
}

/// Cross-agent context forwarded into a debate round: other agents'
/// positions from the window selected by `mode`, each truncated.
fn debate_context(
    completed_rounds: &[Vec<AgentOutcome>],
    agent_id: &str,
    mode: DebateContext,
) -> Option<String> {
    let window: &[Vec<AgentOutcome>] = match mode {
        DebateContext::PriorRound => {
            let len = completed_rounds.len();
            &completed_rounds[len.saturating_sub(1)..]
        }
        DebateContext::AllRounds => completed_rounds,
    };

    let mut lines = Vec::new();
    for round in window {
        for outcome in round {
            if outcome.agent_id == agent_id {
                continue;
            }
            if let Ok(answer) = &outcome.result {
                lines.push(format!(
                    "Round {} [{}]: {}",
                    outcome.round + 1,
                    outcome.agent_id,
                    truncate_chars(&answer.content, DEBATE_CONTEXT_CHARS)
                ));
            }
        }
    }

    if lines.is_empty() {
        None
    } else {
        Some(format!(
            "Positions from the other agents:\n{}",
            lines.join("\n")
        ))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use symposium_llm::{MockModelBackend, ScriptedModelBackend};

    fn paper(id: &str, title: &str) -> PaperRecord {
        PaperRecord::new(id, title, format!("Abstract of {}.", title))
            .with_authors(vec!["Doe".to_string()])
    }

    fn seeded_store(count: usize) -> Arc<InMemoryPaperStore> {
        let store = InMemoryPaperStore::new();
        for i in 1..=count {
            store.insert(paper(&format!("p{}", i), &format!("Paper {}", i)));
        }
        Arc::new(store)
    }

    fn coordinator_with(
        backend: Arc<dyn ModelBackend>,
        papers: usize,
        config: EngineConfig,
    ) -> Coordinator {
        let registry = Arc::new(AgentRegistry::new(config.max_active_agents));
        Coordinator::new(registry, seeded_store(papers), backend, config)
    }

    fn mock_coordinator(papers: usize) -> Coordinator {
        coordinator_with(
            Arc::new(MockModelBackend::new()),
            papers,
            EngineConfig::default(),
        )
    }

    /// Backend that fails for prompts mentioning specific paper titles and
    /// echoes for everyone else. Deterministic under parallel fan-out.
    struct FailForTitles {
        titles: Vec<String>,
        failure: ModelFailure,
    }

    #[async_trait]
    impl ModelBackend for FailForTitles {
        async fn generate(&self, prompt: &str, _params: &GenerateParams) -> ModelResult<String> {
            if self.titles.iter().any(|t| prompt.contains(t.as_str())) {
                Err(self.failure.clone())
            } else {
                Ok(format!("ok: {}", prompt.chars().take(60).collect::<String>()))
            }
        }

        fn backend_id(&self) -> &str {
            "fail-for-titles"
        }
    }

    /// Backend that answers after a fixed delay.
    struct SlowBackend {
        delay_ms: u64,
    }

    #[async_trait]
    impl ModelBackend for SlowBackend {
        async fn generate(&self, _prompt: &str, _params: &GenerateParams) -> ModelResult<String> {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            Ok("eventually".to_string())
        }

        fn backend_id(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_per_session_deadline_override_times_out_slow_backend() {
        let backend = Arc::new(SlowBackend { delay_ms: 200 });
        let coordinator = coordinator_with(backend, 2, EngineConfig::default());
        let session_id = coordinator
            .start_conversation_with_deadline(
                vec!["p1".to_string(), "p2".to_string()],
                "latency budgets",
                ConversationType::Collaboration,
                Some(20),
            )
            .await
            .unwrap();

        let result = coordinator.submit_message(session_id, "quickly now").await;
        assert!(matches!(
            result,
            Err(symposium_core::SymposiumError::Turn(TurnError::DeadlineElapsed { .. }))
        ));

        // The engine default would have let the same backend answer.
        let relaxed = coordinator
            .start_conversation(
                vec!["p1".to_string(), "p2".to_string()],
                "latency budgets",
                ConversationType::Collaboration,
            )
            .await
            .unwrap();
        let report = coordinator
            .submit_message(relaxed, "take your time")
            .await
            .unwrap();
        assert!(!report.partial);
    }

    #[tokio::test]
    async fn test_deadline_override_rejects_non_positive() {
        let coordinator = mock_coordinator(2);
        let result = coordinator
            .start_conversation_with_deadline(
                vec!["p1".to_string(), "p2".to_string()],
                "topic",
                ConversationType::Debate,
                Some(0),
            )
            .await;
        assert!(matches!(
            result,
            Err(symposium_core::SymposiumError::Validation(
                ValidationError::InvalidValue { .. }
            ))
        ));
    }

    #[tokio::test]
    async fn test_collaboration_turn_appends_one_merged_entry() {
        let coordinator = mock_coordinator(2);
        let session_id = coordinator
            .start_conversation(
                vec!["p1".to_string(), "p2".to_string()],
                "attention mechanisms",
                ConversationType::Collaboration,
            )
            .await
            .unwrap();

        let report = coordinator
            .submit_message(session_id, "What is self-attention?")
            .await
            .unwrap();

        assert_eq!(report.turn_index, 1);
        assert!(!report.partial);
        assert!(report.failed_participants.is_empty());
        assert_eq!(report.sections.len(), 2);
        assert_eq!(report.sections[0].agent_id, "p1");
        assert_eq!(report.sections[1].agent_id, "p2");
        assert!(report.content.contains("What is self-attention?"));

        let summary = coordinator.summary(session_id).unwrap();
        assert_eq!(summary.message_count, 2); // opening prompt + merged turn
        assert_eq!(summary.transcript[0].role, symposium_core::EntryRole::System);
        assert_eq!(summary.transcript[1].role, symposium_core::EntryRole::Agents);
    }

    #[tokio::test]
    async fn test_opening_prompt_names_topic_and_participants() {
        let coordinator = mock_coordinator(3);
        let session_id = coordinator
            .start_conversation(
                vec!["p1".to_string(), "p2".to_string(), "p3".to_string()],
                "transfer learning",
                ConversationType::Debate,
            )
            .await
            .unwrap();

        let summary = coordinator.summary(session_id).unwrap();
        let opening = &summary.transcript[0];
        assert_eq!(opening.turn_index, 0);
        assert!(opening.content.contains("transfer learning"));
        assert!(opening.content.contains("p1, p2, p3"));
        assert!(opening.content.contains("debate"));
    }

    #[tokio::test]
    async fn test_partial_failure_is_data_not_error() {
        let backend = Arc::new(FailForTitles {
            titles: vec!["Paper 2".to_string()],
            failure: ModelFailure::ModelError {
                detail: "boom".to_string(),
            },
        });
        let coordinator = coordinator_with(backend, 2, EngineConfig::default());
        let session_id = coordinator
            .start_conversation(
                vec!["p1".to_string(), "p2".to_string()],
                "robustness",
                ConversationType::Collaboration,
            )
            .await
            .unwrap();

        let report = coordinator
            .submit_message(session_id, "How robust is your method?")
            .await
            .unwrap();

        assert!(report.partial);
        assert_eq!(report.failed_participants, vec!["p2".to_string()]);
        assert_eq!(report.sections.len(), 1);
        assert_eq!(report.sections[0].agent_id, "p1");

        // The merged entry still landed in the transcript
        let summary = coordinator.summary(session_id).unwrap();
        assert_eq!(summary.message_count, 2);
        assert!(summary.transcript[1].partial);
    }

    #[tokio::test]
    async fn test_total_failure_leaves_session_untouched() {
        let backend = Arc::new(FailForTitles {
            titles: vec!["Paper 1".to_string(), "Paper 2".to_string()],
            failure: ModelFailure::ModelError {
                detail: "boom".to_string(),
            },
        });
        let coordinator = coordinator_with(backend, 2, EngineConfig::default());
        let session_id = coordinator
            .start_conversation(
                vec!["p1".to_string(), "p2".to_string()],
                "robustness",
                ConversationType::Collaboration,
            )
            .await
            .unwrap();

        let result = coordinator.submit_message(session_id, "anyone there?").await;
        assert!(matches!(
            result,
            Err(symposium_core::SymposiumError::Turn(TurnError::TotalTurnFailure { .. }))
        ));

        let summary = coordinator.summary(session_id).unwrap();
        assert_eq!(summary.message_count, 1); // opening prompt only
        assert_eq!(summary.phase, ConversationPhase::Active);
        assert_eq!(summary.transcript.last().map(|e| e.turn_index), Some(0));
    }

    #[tokio::test]
    async fn test_all_timeouts_reported_as_deadline_elapsed() {
        let backend = Arc::new(FailForTitles {
            titles: vec!["Paper 1".to_string(), "Paper 2".to_string()],
            failure: ModelFailure::Timeout { elapsed_ms: 30_000 },
        });
        let coordinator = coordinator_with(backend, 2, EngineConfig::default());
        let session_id = coordinator
            .start_conversation(
                vec!["p1".to_string(), "p2".to_string()],
                "latency",
                ConversationType::Collaboration,
            )
            .await
            .unwrap();

        let result = coordinator.submit_message(session_id, "slow question").await;
        assert!(matches!(
            result,
            Err(symposium_core::SymposiumError::Turn(TurnError::DeadlineElapsed { .. }))
        ));
    }

    #[tokio::test]
    async fn test_synthesis_chain_forwards_truncated_prior_answer() {
        let backend = Arc::new(
            ScriptedModelBackend::new(vec![
                Ok("first answer about distillation".to_string()),
                Ok("second answer building on it".to_string()),
            ])
            .with_backend_id("chain"),
        );
        let coordinator = coordinator_with(backend.clone(), 2, EngineConfig::default());
        let session_id = coordinator
            .start_conversation(
                vec!["p1".to_string(), "p2".to_string()],
                "distillation",
                ConversationType::Synthesis,
            )
            .await
            .unwrap();

        let report = coordinator
            .submit_message(session_id, "How do your methods combine?")
            .await
            .unwrap();

        let prompts = backend.recorded_prompts();
        assert_eq!(prompts.len(), 2);
        assert!(!prompts[0].contains("Previous agent"));
        assert!(prompts[1].contains("Previous agent p1"));
        assert!(prompts[1].contains("first answer about distillation"));

        // The merged output is the end of the chain
        assert!(report.content.starts_with("second answer building on it"));
        assert!(report.content.contains("p1, p2"));
    }

    #[tokio::test]
    async fn test_debate_rounds_see_prior_round_positions() {
        let backend = Arc::new(
            ScriptedModelBackend::new(vec![
                Ok("p1 opening position".to_string()),
                Ok("p2 opening position".to_string()),
                Ok("p1 rebuttal".to_string()),
                Ok("p2 rebuttal".to_string()),
            ])
            .with_backend_id("debate"),
        );
        let coordinator = coordinator_with(backend.clone(), 2, EngineConfig::default());
        let session_id = coordinator
            .start_conversation(
                vec!["p1".to_string(), "p2".to_string()],
                "attention vs recurrence",
                ConversationType::Debate,
            )
            .await
            .unwrap();

        let report = coordinator
            .submit_message(session_id, "Which architecture scales better?")
            .await
            .unwrap();

        // 2 agents x 2 rounds
        assert_eq!(report.sections.len(), 4);
        assert_eq!(
            report
                .sections
                .iter()
                .map(|s| (s.agent_id.as_str(), s.round))
                .collect::<Vec<_>>(),
            vec![("p1", 0), ("p1", 1), ("p2", 0), ("p2", 1)]
        );

        let prompts = backend.recorded_prompts();
        assert_eq!(prompts.len(), 4);
        // Round 1 has no completed prior round, so neither agent gets
        // cross-agent context; round 2 sees round 1 positions only.
        assert!(!prompts[0].contains("Positions from the other agents"));
        assert!(!prompts[1].contains("Positions from the other agents"));
        assert!(prompts[2].contains("p2 opening position"));
        assert!(prompts[3].contains("p1 opening position"));
        assert!(!prompts[3].contains("p1 rebuttal"));

        assert!(report.content.contains("Prevailing position"));
        assert!(report.content.contains("2 round(s)"));
    }

    #[tokio::test]
    async fn test_three_round_debate_forwards_only_the_prior_round() {
        let backend = Arc::new(
            ScriptedModelBackend::new(vec![
                Ok("p1 r1 alpha".to_string()),
                Ok("p2 r1 bravo".to_string()),
                Ok("p1 r2 charlie".to_string()),
                Ok("p2 r2 delta".to_string()),
                Ok("p1 r3 echo".to_string()),
                Ok("p2 r3 foxtrot".to_string()),
            ])
            .with_backend_id("debate"),
        );
        let config = EngineConfig {
            debate_rounds: 3,
            ..EngineConfig::default()
        };
        let coordinator = coordinator_with(backend.clone(), 2, config);
        let session_id = coordinator
            .start_conversation(
                vec!["p1".to_string(), "p2".to_string()],
                "long debate horizon",
                ConversationType::Debate,
            )
            .await
            .unwrap();

        let report = coordinator
            .submit_message(session_id, "Hold your positions over three rounds")
            .await
            .unwrap();
        assert_eq!(report.sections.len(), 6);

        let prompts = backend.recorded_prompts();
        assert_eq!(prompts.len(), 6);
        // Round 2 sees round 1.
        assert!(prompts[2].contains("p2 r1 bravo"));
        // Round 3 sees round 2 and nothing earlier.
        assert!(prompts[4].contains("p2 r2 delta"));
        assert!(!prompts[4].contains("bravo"));
        assert!(prompts[5].contains("p1 r2 charlie"));
        assert!(!prompts[5].contains("alpha"));
        // Same-round answers never leak into the window.
        assert!(!prompts[5].contains("echo"));
    }

    #[tokio::test]
    async fn test_all_rounds_context_feeds_every_completed_round() {
        let backend = Arc::new(
            ScriptedModelBackend::new(vec![
                Ok("p1 r1 alpha".to_string()),
                Ok("p2 r1 bravo".to_string()),
                Ok("p1 r2 charlie".to_string()),
                Ok("p2 r2 delta".to_string()),
                Ok("p1 r3 echo".to_string()),
                Ok("p2 r3 foxtrot".to_string()),
            ])
            .with_backend_id("debate"),
        );
        let config = EngineConfig {
            debate_rounds: 3,
            debate_context: DebateContext::AllRounds,
            ..EngineConfig::default()
        };
        let coordinator = coordinator_with(backend.clone(), 2, config);
        let session_id = coordinator
            .start_conversation(
                vec!["p1".to_string(), "p2".to_string()],
                "full history debate",
                ConversationType::Debate,
            )
            .await
            .unwrap();

        coordinator
            .submit_message(session_id, "Argue with the whole history in view")
            .await
            .unwrap();

        let prompts = backend.recorded_prompts();
        assert_eq!(prompts.len(), 6);
        // Round 3 carries both completed rounds, oldest first.
        assert!(prompts[4].contains("p2 r1 bravo"));
        assert!(prompts[4].contains("p2 r2 delta"));
        let bravo = prompts[4].find("bravo").unwrap();
        let delta = prompts[4].find("delta").unwrap();
        assert!(bravo < delta);
    }

    #[tokio::test]
    async fn test_comparison_output_is_side_by_side() {
        let coordinator = mock_coordinator(2);
        let session_id = coordinator
            .start_conversation(
                vec!["p1".to_string(), "p2".to_string()],
                "optimizers",
                ConversationType::Comparison,
            )
            .await
            .unwrap();

        let report = coordinator
            .submit_message(session_id, "convergence speed")
            .await
            .unwrap();

        assert!(report.content.starts_with("Side-by-side comparison"));
        assert!(report.content.contains("[p1]"));
        assert!(report.content.contains("[p2]"));
        assert!(report.content.contains("---"));
    }

    #[tokio::test]
    async fn test_rate_limited_call_is_retried_once() {
        let backend = Arc::new(ScriptedModelBackend::new(vec![
            Err(ModelFailure::RateLimited { retry_after_ms: 5 }),
            Ok("recovered answer".to_string()),
        ]));
        let coordinator = coordinator_with(backend.clone(), 1, EngineConfig::default());

        let answer = coordinator.query_agent("p1", "hello?").await.unwrap();
        assert_eq!(answer.content, "recovered answer");
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn test_rate_limited_retry_recovery_yields_full_turn() {
        // Sequential chain keeps the scripted outcome order deterministic.
        let backend = Arc::new(ScriptedModelBackend::new(vec![
            Err(ModelFailure::RateLimited { retry_after_ms: 5 }),
            Ok("first link recovered".to_string()),
            Ok("second link".to_string()),
        ]));
        let coordinator = coordinator_with(backend.clone(), 2, EngineConfig::default());
        let session_id = coordinator
            .start_conversation(
                vec!["p1".to_string(), "p2".to_string()],
                "throughput",
                ConversationType::Synthesis,
            )
            .await
            .unwrap();

        let report = coordinator
            .submit_message(session_id, "sum it up")
            .await
            .unwrap();
        assert!(!report.partial);
        assert!(report.failed_participants.is_empty());
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_rate_limited_twice_is_final() {
        let backend = Arc::new(ScriptedModelBackend::new(vec![
            Err(ModelFailure::RateLimited { retry_after_ms: 5 }),
            Err(ModelFailure::RateLimited { retry_after_ms: 5 }),
        ]));
        let coordinator = coordinator_with(backend.clone(), 1, EngineConfig::default());

        let result = coordinator.query_agent("p1", "hello?").await;
        assert!(result.is_err());
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn test_timeout_is_not_retried() {
        let backend = Arc::new(ScriptedModelBackend::new(vec![
            Err(ModelFailure::Timeout { elapsed_ms: 100 }),
            Ok("should never be reached".to_string()),
        ]));
        let coordinator = coordinator_with(backend.clone(), 1, EngineConfig::default());

        let result = coordinator.query_agent("p1", "hello?").await;
        assert!(result.is_err());
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_session_and_closed_session() {
        let coordinator = mock_coordinator(2);
        let missing = symposium_core::new_entity_id();
        assert!(matches!(
            coordinator.submit_message(missing, "hi").await,
            Err(symposium_core::SymposiumError::Session(SessionError::NotFound { .. }))
        ));

        let session_id = coordinator
            .start_conversation(
                vec!["p1".to_string(), "p2".to_string()],
                "topic",
                ConversationType::Collaboration,
            )
            .await
            .unwrap();

        coordinator.close_session(session_id).await.unwrap();
        assert!(matches!(
            coordinator.submit_message(session_id, "hi").await,
            Err(symposium_core::SymposiumError::Session(SessionError::Closed { .. }))
        ));
        // Double close is also rejected
        assert!(matches!(
            coordinator.close_session(session_id).await,
            Err(symposium_core::SymposiumError::Session(SessionError::Closed { .. }))
        ));
        // But the summary stays queryable
        let summary = coordinator.summary(session_id).unwrap();
        assert_eq!(summary.phase, ConversationPhase::Closed);
    }

    #[tokio::test]
    async fn test_unknown_paper_fails_session_creation() {
        let coordinator = mock_coordinator(1);
        let result = coordinator
            .start_conversation(
                vec!["p1".to_string(), "ghost".to_string()],
                "topic",
                ConversationType::Collaboration,
            )
            .await;
        assert!(matches!(
            result,
            Err(symposium_core::SymposiumError::Registry(RegistryError::PaperNotFound { .. }))
        ));
        assert_eq!(coordinator.session_count(), 0);
    }

    #[tokio::test]
    async fn test_registry_capacity_ceiling() {
        let config = EngineConfig {
            max_active_agents: 2,
            ..EngineConfig::default()
        };
        let coordinator = coordinator_with(Arc::new(MockModelBackend::new()), 3, config);

        let result = coordinator
            .start_conversation(
                vec!["p1".to_string(), "p2".to_string(), "p3".to_string()],
                "topic",
                ConversationType::Collaboration,
            )
            .await;
        assert!(matches!(
            result,
            Err(symposium_core::SymposiumError::Registry(
                RegistryError::CapacityExceeded { limit: 2 }
            ))
        ));
    }

    #[tokio::test]
    async fn test_registry_get_or_create_is_idempotent() {
        let registry = AgentRegistry::new(5);
        let store = seeded_store(1);
        let backend: Arc<dyn ModelBackend> = Arc::new(MockModelBackend::new());

        let a = registry
            .get_or_create("p1", store.as_ref(), backend.clone(), 20)
            .await
            .unwrap();
        let b = registry
            .get_or_create("p1", store.as_ref(), backend.clone(), 20)
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);

        assert!(registry.deactivate("p1"));
        assert!(!registry.deactivate("p1"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_evicted_agent_is_recreated_on_next_turn() {
        let coordinator = mock_coordinator(2);
        let session_id = coordinator
            .start_conversation(
                vec!["p1".to_string(), "p2".to_string()],
                "topic",
                ConversationType::Collaboration,
            )
            .await
            .unwrap();

        // Evict everything, then keep talking
        let evicted = coordinator
            .registry
            .evict_idle(Utc::now() + chrono::Duration::seconds(1));
        assert_eq!(evicted, 2);
        assert!(coordinator.registry.is_empty());

        let report = coordinator.submit_message(session_id, "still here?").await.unwrap();
        assert!(!report.partial);
        assert_eq!(coordinator.registry.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_turns_serialize_fifo() {
        let coordinator = Arc::new(mock_coordinator(2));
        let session_id = coordinator
            .start_conversation(
                vec!["p1".to_string(), "p2".to_string()],
                "topic",
                ConversationType::Collaboration,
            )
            .await
            .unwrap();

        let c1 = coordinator.clone();
        let c2 = coordinator.clone();
        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { c1.submit_message(session_id, "first").await }),
            tokio::spawn(async move { c2.submit_message(session_id, "second").await }),
        );
        let r1 = r1.unwrap().unwrap();
        let r2 = r2.unwrap().unwrap();

        // Distinct, consecutive turn indices; no interleaved entries
        let mut indices = vec![r1.turn_index, r2.turn_index];
        indices.sort();
        assert_eq!(indices, vec![1, 2]);

        let summary = coordinator.summary(session_id).unwrap();
        assert_eq!(summary.message_count, 3);
        assert_eq!(
            summary.transcript.iter().map(|e| e.turn_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[tokio::test]
    async fn test_summary_is_idempotent_between_turns() {
        let coordinator = mock_coordinator(2);
        let session_id = coordinator
            .start_conversation(
                vec!["p1".to_string(), "p2".to_string()],
                "stability",
                ConversationType::Collaboration,
            )
            .await
            .unwrap();
        coordinator
            .submit_message(session_id, "first question")
            .await
            .unwrap();

        let first = serde_json::to_string(&coordinator.summary(session_id).unwrap()).unwrap();
        let second = serde_json::to_string(&coordinator.summary(session_id).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_sessions_do_not_cross_contaminate() {
        let coordinator = mock_coordinator(4);
        let s1 = coordinator
            .start_conversation(
                vec!["p1".to_string(), "p2".to_string()],
                "topic one",
                ConversationType::Collaboration,
            )
            .await
            .unwrap();
        let s2 = coordinator
            .start_conversation(
                vec!["p3".to_string(), "p4".to_string()],
                "topic two",
                ConversationType::Comparison,
            )
            .await
            .unwrap();

        coordinator.submit_message(s1, "only for session one").await.unwrap();

        let summary1 = coordinator.summary(s1).unwrap();
        let summary2 = coordinator.summary(s2).unwrap();
        assert_eq!(summary1.message_count, 2);
        assert_eq!(summary2.message_count, 1);
        assert!(summary2.transcript.iter().all(|e| !e.content.contains("session one")));
    }

    #[tokio::test]
    async fn test_idle_sweep_closes_stale_sessions() {
        let config = EngineConfig {
            session_idle_timeout_ms: 1,
            ..EngineConfig::default()
        };
        let coordinator = coordinator_with(Arc::new(MockModelBackend::new()), 2, config);
        let session_id = coordinator
            .start_conversation(
                vec!["p1".to_string(), "p2".to_string()],
                "topic",
                ConversationType::Collaboration,
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(coordinator.sweep_idle_sessions(), 1);
        assert_eq!(coordinator.sweep_idle_sessions(), 0);

        let summary = coordinator.summary(session_id).unwrap();
        assert_eq!(summary.phase, ConversationPhase::Closed);
    }

    #[tokio::test]
    async fn test_agent_memory_is_bounded() {
        let config = EngineConfig {
            agent_memory_limit: 2,
            ..EngineConfig::default()
        };
        let coordinator = coordinator_with(Arc::new(MockModelBackend::new()), 1, config);

        for i in 0..4 {
            coordinator
                .query_agent("p1", &format!("question {}", i))
                .await
                .unwrap();
        }

        let agent = coordinator.registry.get("p1").unwrap();
        assert_eq!(agent.memory_len().await, 2);
    }

    #[tokio::test]
    async fn test_blank_message_rejected() {
        let coordinator = mock_coordinator(2);
        let session_id = coordinator
            .start_conversation(
                vec!["p1".to_string(), "p2".to_string()],
                "topic",
                ConversationType::Collaboration,
            )
            .await
            .unwrap();

        assert!(matches!(
            coordinator.submit_message(session_id, "   ").await,
            Err(symposium_core::SymposiumError::Validation(
                ValidationError::RequiredFieldMissing { .. }
            ))
        ));
    }

    #[test]
    fn test_policy_table() {
        let config = EngineConfig::default();
        assert_eq!(
            TurnPolicy::for_type(ConversationType::Collaboration, &config),
            TurnPolicy::Parallel
        );
        assert_eq!(
            TurnPolicy::for_type(ConversationType::Comparison, &config),
            TurnPolicy::ParallelComparison
        );
        assert_eq!(
            TurnPolicy::for_type(ConversationType::Synthesis, &config),
            TurnPolicy::Sequential
        );
        assert_eq!(
            TurnPolicy::for_type(ConversationType::Debate, &config),
            TurnPolicy::Rounds { rounds: 2 }
        );
    }

    #[test]
    fn test_synthesizer_consensus_note() {
        let synthesizer = Synthesizer::default();
        let participants = vec!["p1".to_string(), "p2".to_string()];
        let agree = |id: &str| AgentOutcome {
            agent_id: id.to_string(),
            round: 0,
            result: Ok(AgentAnswer {
                agent_id: id.to_string(),
                content: "attention scales quadratically with sequence length".to_string(),
                confidence: DEFAULT_CONFIDENCE,
                elapsed_ms: 5,
            }),
        };

        let merged = synthesizer.merge(
            ConversationType::Collaboration,
            &participants,
            "scaling?",
            &[agree("p1"), agree("p2")],
        );
        assert!(merged.content.contains("Consensus"));

        let disagree = AgentOutcome {
            agent_id: "p2".to_string(),
            round: 0,
            result: Ok(AgentAnswer {
                agent_id: "p2".to_string(),
                content: "convolution remains cheaper for short inputs".to_string(),
                confidence: DEFAULT_CONFIDENCE,
                elapsed_ms: 5,
            }),
        };
        let merged = synthesizer.merge(
            ConversationType::Collaboration,
            &participants,
            "scaling?",
            &[agree("p1"), disagree],
        );
        assert!(!merged.content.contains("Consensus"));
    }

    #[test]
    fn test_debate_winner_tie_goes_to_participant_order() {
        let participants = vec!["p2".to_string(), "p1".to_string()];
        let outcome = |id: &str, confidence: f64| AgentOutcome {
            agent_id: id.to_string(),
            round: 0,
            result: Ok(AgentAnswer {
                agent_id: id.to_string(),
                content: format!("{} position", id),
                confidence,
                elapsed_ms: 1,
            }),
        };

        let synthesizer = Synthesizer::default();
        // Tie: the first listed participant (p2) prevails
        let merged = synthesizer.merge(
            ConversationType::Debate,
            &participants,
            "q",
            &[outcome("p1", 0.8), outcome("p2", 0.8)],
        );
        assert!(merged.content.contains("[p2]"));

        // Higher confidence beats list order
        let merged = synthesizer.merge(
            ConversationType::Debate,
            &participants,
            "q",
            &[outcome("p1", 0.9), outcome("p2", 0.8)],
        );
        assert!(merged.content.contains("[p1]"));
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdef", 3), "abc...");
        // Multi-byte characters never split
        assert_eq!(truncate_chars("héllo wörld", 4), "héll...");
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
