//! WebSocket Protocol Endpoint
//!
//! This module carries the envelope protocol over WebSocket connections:
//! clients initialize, then exchange request/response/notification envelopes
//! with the coordinator, and receive coordination events as notifications.
//!
//! ## Architecture
//!
//! - Uses a tokio broadcast channel for envelope distribution
//! - A forwarder task converts coordination events into notification envelopes
//! - Per-connection protocol state machine: the first envelope must be
//!   `initialize`; protocol violations send one error envelope and close
//! - Request-local failures (validation, turn errors) reply with a
//!   correlated error envelope and keep the connection open

use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use symposium_agents::Coordinator;
use symposium_core::{
    new_entity_id, ConversationEvent, Envelope, EnvelopeKind, EntityId, ProtocolError,
    BROADCAST_RECIPIENT, COORDINATOR_SENDER,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// WebSocket state shared across the application.
///
/// Holds the broadcast channel every connection subscribes to. The channel
/// carries wire-ready envelopes; coordination events are converted by the
/// forwarder task before they land here.
#[derive(Clone)]
pub struct WsState {
    tx: broadcast::Sender<Envelope>,
}

impl WsState {
    /// Create a new WebSocket state with the specified channel capacity.
    ///
    /// The capacity determines how many envelopes can be buffered before
    /// slow consumers start dropping messages.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Broadcast an envelope to all connected clients.
    ///
    /// Non-blocking. With no clients connected the envelope is dropped; a
    /// client with a full buffer misses it (lagged).
    pub fn broadcast(&self, envelope: Envelope) {
        let kind = envelope.kind;
        match self.tx.send(envelope) {
            Ok(receiver_count) => {
                debug!(kind = %kind, receivers = receiver_count, "broadcast envelope");
            }
            Err(_) => {
                debug!(kind = %kind, "no receivers for envelope");
            }
        }
    }

    /// Subscribe to the envelope stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}

/// Forward coordination events onto the push channel as notification
/// envelopes. Runs until the event channel closes.
pub fn spawn_event_forwarder(
    ws: Arc<WsState>,
    mut events: broadcast::Receiver<ConversationEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let payload = match serde_json::to_value(&event) {
                        Ok(value) => value,
                        Err(e) => {
                            warn!(error = %e, "failed to serialize event");
                            continue;
                        }
                    };
                    ws.broadcast(Envelope::notification(
                        COORDINATOR_SENDER,
                        BROADCAST_RECIPIENT,
                        payload,
                    ));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event forwarder lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// WebSocket upgrade handler.
///
/// ## Protocol
///
/// 1. Client connects and the HTTP connection is upgraded
/// 2. The first envelope from the client must be `initialize`
/// 3. Server replies with a response envelope correlated to the initialize
/// 4. Client sends request envelopes addressed to a session ID (turns,
///    summaries, close) or an agent ID (single-agent queries)
/// 5. Server forwards broadcast events as notification envelopes
/// 6. A protocol violation gets one error envelope, then the connection closes
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let coordinator = state.coordinator.clone();
    let ws_state = state.ws.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, coordinator, ws_state))
}

/// Per-connection protocol state.
struct ConnState {
    connection_id: EntityId,
    /// Set once a valid initialize envelope was handled
    initialized: bool,
    /// Client identifier from the initialize envelope's sender
    client_id: String,
    /// Request IDs observed on this connection; response and error
    /// envelopes must correlate to one of these
    seen_requests: HashSet<EntityId>,
}

/// What handling one inbound envelope produced.
enum Handled {
    /// Zero or more envelopes to send back; connection stays open
    Reply(Vec<Envelope>),
    /// One final error envelope, then close the connection
    Fatal(Envelope),
}

/// Handle an individual WebSocket connection for its whole lifetime.
async fn handle_socket(socket: WebSocket, coordinator: Arc<Coordinator>, ws: Arc<WsState>) {
    let mut conn = ConnState {
        connection_id: new_entity_id(),
        initialized: false,
        client_id: String::new(),
        seen_requests: HashSet::new(),
    };
    info!(connection_id = %conn.connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();
    let mut rx = ws.subscribe();

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match process_envelope(&text, &mut conn, &coordinator, &ws).await {
                            Handled::Reply(replies) => {
                                let mut failed = false;
                                for reply in replies {
                                    if send_envelope(&mut sender, &reply).await.is_err() {
                                        failed = true;
                                        break;
                                    }
                                }
                                if failed {
                                    break;
                                }
                            }
                            Handled::Fatal(error_envelope) => {
                                let _ = send_envelope(&mut sender, &error_envelope).await;
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection_id = %conn.connection_id, "client sent close frame");
                        break;
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        // Pong is sent automatically by axum
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!(
                            connection_id = %conn.connection_id,
                            len = data.len(),
                            "binary message ignored"
                        );
                    }
                    Some(Err(e)) => {
                        warn!(connection_id = %conn.connection_id, error = %e, "WebSocket receive error");
                        break;
                    }
                    None => break,
                }
            }
            broadcast_msg = rx.recv() => {
                match broadcast_msg {
                    Ok(envelope) => {
                        // Broadcasts are delivered only once the handshake is done
                        if conn.initialized && send_envelope(&mut sender, &envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            connection_id = %conn.connection_id,
                            skipped,
                            "client lagged behind broadcast"
                        );
                        let lagged = Envelope::error(
                            None,
                            COORDINATOR_SENDER,
                            conn.client_id.clone(),
                            serde_json::json!({
                                "code": "LAGGED",
                                "message": format!("{} notifications were dropped", skipped),
                            }),
                        );
                        if send_envelope(&mut sender, &lagged).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    info!(connection_id = %conn.connection_id, client_id = %conn.client_id, "WebSocket disconnected");
}

/// Apply the protocol state machine to one inbound text frame.
async fn process_envelope(
    text: &str,
    conn: &mut ConnState,
    coordinator: &Coordinator,
    ws: &WsState,
) -> Handled {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            return Handled::Fatal(fatal_envelope(
                conn,
                None,
                ProtocolError::MalformedEnvelope {
                    reason: e.to_string(),
                },
            ));
        }
    };

    if let Err(violation) = envelope.validate() {
        return Handled::Fatal(fatal_envelope(conn, Some(envelope.id), violation));
    }

    if !conn.initialized {
        if envelope.kind != EnvelopeKind::Initialize {
            return Handled::Fatal(fatal_envelope(
                conn,
                Some(envelope.id),
                ProtocolError::EnvelopeOutOfOrder {
                    expected: EnvelopeKind::Initialize.to_string(),
                    got: envelope.kind.to_string(),
                },
            ));
        }
        conn.initialized = true;
        conn.client_id = envelope.sender.clone();
        conn.seen_requests.insert(envelope.id);
        info!(
            connection_id = %conn.connection_id,
            client_id = %conn.client_id,
            "connection initialized"
        );
        return Handled::Reply(vec![Envelope::response(
            envelope.id,
            COORDINATOR_SENDER,
            conn.client_id.clone(),
            serde_json::json!({
                "status": "initialized",
                "connection_id": conn.connection_id,
                "capabilities": ["conversations", "agent-query", "notifications"],
            }),
        )]);
    }

    match envelope.kind {
        EnvelopeKind::Initialize => Handled::Fatal(fatal_envelope(
            conn,
            Some(envelope.id),
            ProtocolError::EnvelopeOutOfOrder {
                expected: EnvelopeKind::Request.to_string(),
                got: EnvelopeKind::Initialize.to_string(),
            },
        )),
        EnvelopeKind::Request => {
            conn.seen_requests.insert(envelope.id);
            Handled::Reply(vec![handle_request(conn, coordinator, envelope).await])
        }
        EnvelopeKind::Response | EnvelopeKind::Error => {
            // Clients may acknowledge or report failures for envelopes they
            // saw; a correlation to an unknown request is a violation.
            match envelope.correlation_id {
                Some(correlation_id) if conn.seen_requests.contains(&correlation_id) => {
                    debug!(
                        connection_id = %conn.connection_id,
                        correlation_id = %correlation_id,
                        kind = %envelope.kind,
                        "client correlated envelope"
                    );
                    Handled::Reply(Vec::new())
                }
                Some(correlation_id) => Handled::Fatal(fatal_envelope(
                    conn,
                    Some(envelope.id),
                    ProtocolError::UnknownCorrelation { correlation_id },
                )),
                None => {
                    // Error envelopes without correlation are tolerated only
                    // for unparseable requests, which a client cannot have
                    debug!(connection_id = %conn.connection_id, "uncorrelated client error ignored");
                    Handled::Reply(Vec::new())
                }
            }
        }
        EnvelopeKind::Notification => {
            // Fire-and-forget: rebroadcast to all connected clients
            ws.broadcast(envelope);
            Handled::Reply(Vec::new())
        }
    }
}

/// Route a request envelope: session recipients get coordinator actions,
/// anything else is treated as a single-agent query.
async fn handle_request(
    conn: &ConnState,
    coordinator: &Coordinator,
    envelope: Envelope,
) -> Envelope {
    let request_id = envelope.id;
    let action = envelope
        .payload
        .get("action")
        .and_then(|v| v.as_str())
        .unwrap_or("message")
        .to_string();
    let message = envelope
        .payload
        .get("message")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let session_id = envelope
        .recipient
        .parse::<EntityId>()
        .ok()
        .filter(|id| coordinator.has_session(*id));

    let result: Result<serde_json::Value, ApiError> = match session_id {
        Some(session_id) => match action.as_str() {
            "message" => coordinator
                .submit_message(session_id, &message)
                .await
                .map_err(ApiError::from)
                .and_then(|report| serde_json::to_value(report).map_err(ApiError::from)),
            "summary" => coordinator
                .summary(session_id)
                .map_err(ApiError::from)
                .and_then(|summary| serde_json::to_value(summary).map_err(ApiError::from)),
            "close" => coordinator
                .close_session(session_id)
                .await
                .map_err(ApiError::from)
                .map(|_| serde_json::json!({ "status": "closed" })),
            other => Err(ApiError::invalid_input(format!("Unknown action: {}", other))),
        },
        None => coordinator
            .query_agent(&envelope.recipient, &message)
            .await
            .map_err(ApiError::from)
            .and_then(|answer| serde_json::to_value(answer).map_err(ApiError::from)),
    };

    match result {
        Ok(payload) => Envelope::response(
            request_id,
            COORDINATOR_SENDER,
            conn.client_id.clone(),
            payload,
        ),
        Err(api_error) => {
            debug!(
                connection_id = %conn.connection_id,
                request_id = %request_id,
                code = %api_error.code,
                "request failed"
            );
            Envelope::error(
                Some(request_id),
                COORDINATOR_SENDER,
                conn.client_id.clone(),
                error_payload(&api_error),
            )
        }
    }
}

/// Build the error envelope that terminates a connection.
fn fatal_envelope(
    conn: &ConnState,
    correlation_id: Option<EntityId>,
    violation: ProtocolError,
) -> Envelope {
    warn!(
        connection_id = %conn.connection_id,
        error = %violation,
        "protocol violation, closing connection"
    );
    let api_error = ApiError::from(violation);
    let recipient = if conn.client_id.is_empty() {
        BROADCAST_RECIPIENT.to_string()
    } else {
        conn.client_id.clone()
    };
    Envelope::error(
        correlation_id,
        COORDINATOR_SENDER,
        recipient,
        error_payload(&api_error),
    )
}

fn error_payload(api_error: &ApiError) -> serde_json::Value {
    serde_json::to_value(api_error)
        .unwrap_or_else(|_| serde_json::json!({ "message": api_error.message }))
}

async fn send_envelope(
    sender: &mut SplitSink<WebSocket, Message>,
    envelope: &Envelope,
) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(envelope) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "failed to serialize envelope");
            return Ok(());
        }
    };
    sender.send(Message::Text(json)).await
}
