//! Shared application state for Axum routers.

use std::sync::Arc;

use symposium_agents::{AgentRegistry, Coordinator, InMemoryPaperStore};

use crate::ws::WsState;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Conversation coordinator: sessions, turn execution, synthesis.
    pub coordinator: Arc<Coordinator>,
    /// Live agents keyed by paper ID.
    pub registry: Arc<AgentRegistry>,
    /// Paper metadata the agents are created from.
    pub store: Arc<InMemoryPaperStore>,
    pub ws: Arc<WsState>,
    pub start_time: std::time::Instant,
}

// Use macro to reduce boilerplate for FromRef implementations
crate::impl_from_ref!(Arc<Coordinator>, coordinator);
crate::impl_from_ref!(Arc<AgentRegistry>, registry);
crate::impl_from_ref!(Arc<InMemoryPaperStore>, store);
crate::impl_from_ref!(Arc<WsState>, ws);
crate::impl_from_ref!(std::time::Instant, start_time);
