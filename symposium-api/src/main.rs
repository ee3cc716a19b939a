//! Symposium API Server Entry Point
//!
//! Bootstraps configuration, the paper catalog, the model backend, and
//! the coordinator, then starts the Axum HTTP server.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use tokio::sync::broadcast;
use tracing::{info, warn};

use symposium_agents::{AgentRegistry, Coordinator, InMemoryPaperStore};
use symposium_api::telemetry::{init_telemetry, TelemetryConfig};
use symposium_api::ws::{spawn_event_forwarder, WsState};
use symposium_api::{create_api_router, ApiConfig, ApiError, ApiResult, AppState};
use symposium_core::{ConversationEvent, EngineConfig, PaperRecord};
use symposium_llm::{HttpModelBackend, MockModelBackend, ModelBackend};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_telemetry(&telemetry_config);

    let api_config = ApiConfig::from_env();
    let engine_config = EngineConfig::from_env();
    engine_config
        .validate()
        .map_err(|e| ApiError::invalid_input(format!("Invalid engine configuration: {}", e)))?;

    let store = Arc::new(InMemoryPaperStore::new());
    if let Ok(path) = std::env::var("SYMPOSIUM_PAPER_CATALOG") {
        load_paper_catalog(&store, &path)?;
    }

    let backend = resolve_backend();
    let registry = Arc::new(AgentRegistry::new(engine_config.max_active_agents));

    let (events_tx, events_rx) = broadcast::channel::<ConversationEvent>(api_config.ws_capacity);
    let coordinator = Arc::new(
        Coordinator::new(
            registry.clone(),
            store.clone(),
            backend,
            engine_config.clone(),
        )
        .with_events(events_tx),
    );

    let ws = Arc::new(WsState::new(api_config.ws_capacity));
    spawn_event_forwarder(ws.clone(), events_rx);
    spawn_idle_sweeper(coordinator.clone(), registry.clone(), &engine_config);

    let state = AppState {
        coordinator,
        registry,
        store,
        ws,
        start_time: Instant::now(),
    };
    let app: Router = create_api_router(state, &api_config);

    let addr = api_config.bind_addr();
    info!(%addr, "Starting Symposium API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    Ok(())
}

/// Pick the model backend from the environment. Falls back to the
/// deterministic mock so the server is usable without a model endpoint.
fn resolve_backend() -> Arc<dyn ModelBackend> {
    match std::env::var("SYMPOSIUM_MODEL_ENDPOINT") {
        Ok(endpoint) => {
            let model = std::env::var("SYMPOSIUM_MODEL_NAME")
                .unwrap_or_else(|_| "default".to_string());
            info!(%endpoint, %model, "using HTTP model backend");
            let mut backend = HttpModelBackend::new("http", endpoint, model);
            if let Ok(api_key) = std::env::var("SYMPOSIUM_MODEL_API_KEY") {
                backend = backend.with_api_key(api_key);
            }
            Arc::new(backend)
        }
        Err(_) => {
            warn!("SYMPOSIUM_MODEL_ENDPOINT not set, using deterministic mock backend");
            Arc::new(MockModelBackend::new())
        }
    }
}

/// Seed the paper store from a JSON file holding an array of paper records.
fn load_paper_catalog(store: &InMemoryPaperStore, path: &str) -> ApiResult<()> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ApiError::invalid_input(format!("Failed to read {}: {}", path, e)))?;
    let papers: Vec<PaperRecord> = serde_json::from_str(&raw)?;
    let count = papers.len();
    for paper in papers {
        store.insert(paper);
    }
    info!(count, path, "loaded paper catalog");
    Ok(())
}

/// Periodically close idle sessions and evict idle agents.
fn spawn_idle_sweeper(
    coordinator: Arc<Coordinator>,
    registry: Arc<AgentRegistry>,
    config: &EngineConfig,
) {
    let idle_ms = config.session_idle_timeout_ms;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let closed = coordinator.sweep_idle_sessions();
            let cutoff = chrono::Utc::now() - chrono::Duration::milliseconds(idle_ms);
            let evicted = registry.evict_idle(cutoff);
            if closed > 0 || evicted > 0 {
                info!(closed, evicted, "idle sweep");
            }
        }
    });
}
