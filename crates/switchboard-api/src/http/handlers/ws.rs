//! WebSocket endpoint for customer chat.
//!
//! `GET /ws` upgrades to a socket that speaks the JSON event protocol. Each
//! socket gets a bounded outbound channel registered with the
//! [`ConnectionRegistry`]; a writer task drains it into the socket, and the
//! reader loop dispatches inbound frames. Anything that talks to a client
//! (orchestrator, heartbeat, broadcasts) goes through the registry, never
//! through the socket directly.
//!
//! Frame failures answer with an `error` event and leave the socket open.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;

use switchboard_core::orchestrator::InboundChat;
use switchboard_core::realtime::TokenVerifier;
use switchboard_types::connection::{ConnectionInfo, short_id};
use switchboard_types::error::{OrchestratorError, SessionError};
use switchboard_types::realtime::{InboundEvent, OutboundEvent};
use switchboard_types::session::AgentType;

use crate::http::response::ApiResponse;
use crate::state::AppState;

const HANDOVER_TO_HUMAN_MESSAGE: &str = "Transferred to a human agent, please wait...";
const HANDOVER_TO_AI_MESSAGE: &str = "The AI assistant has taken over the conversation";

/// Upgrade the request, unless the node is at its connection limit.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let max = state.config.websocket.max_connections;
    if state.registry.connection_count() >= max {
        tracing::warn!(max, "Connection limit reached, refusing WebSocket upgrade");
        return ApiResponse::failure(
            StatusCode::SERVICE_UNAVAILABLE,
            "CAPACITY_EXCEEDED",
            format!("connection limit of {max} reached"),
        )
        .into_response();
    }

    ws.max_message_size(state.config.websocket.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<OutboundEvent>(state.config.websocket.send_buffer.max(1));
    let connection_id = state.registry.register(tx);

    // The registry drops its sender on disconnect, which ends this task.
    let mut writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if ws_sender
                .send(Message::Text(event.to_json().into()))
                .await
                .is_err()
            {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    state.registry.send(
        &connection_id,
        OutboundEvent::new(
            "connection",
            json!({
                "connection_id": connection_id,
                "status": "connected",
                "server_time": chrono::Utc::now().to_rfc3339(),
            }),
        ),
    );

    loop {
        tokio::select! {
            msg = ws_receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    handle_frame(&state, &connection_id, text.as_str()).await;
                }
                Some(Ok(Message::Binary(_))) => {
                    state.registry.touch(&connection_id);
                    state.registry.send(
                        &connection_id,
                        OutboundEvent::error("INVALID_JSON", "binary frames are not supported"),
                    );
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(err)) => {
                    tracing::debug!(connection_id = %connection_id, error = %err, "WebSocket receive error");
                    break;
                }
                // Protocol ping/pong still counts as activity.
                Some(Ok(_)) => {
                    state.registry.touch(&connection_id);
                }
            },
            _ = &mut writer => {
                tracing::debug!(connection_id = %connection_id, "Writer stopped, closing socket");
                break;
            }
        }
    }

    state.registry.disconnect(&connection_id);
    writer.abort();
}

/// Parse one text frame and dispatch it.
pub(crate) async fn handle_frame(state: &AppState, connection_id: &str, text: &str) {
    state.registry.touch(connection_id);

    let event = match InboundEvent::parse(text) {
        Ok(event) => event,
        Err(err) => {
            tracing::debug!(connection_id = %connection_id, error = %err, "Rejected inbound frame");
            send_error(state, connection_id, err.code(), err.to_string());
            return;
        }
    };

    match event {
        InboundEvent::Auth { token, session_id } => {
            handle_auth(state, connection_id, token, session_id).await;
        }
        InboundEvent::Ping { timestamp } => {
            state.registry.send(
                connection_id,
                OutboundEvent::new(
                    "pong",
                    json!({
                        "timestamp": timestamp,
                        "server_time": chrono::Utc::now().to_rfc3339(),
                    }),
                ),
            );
        }
        InboundEvent::Message {
            content,
            session_id,
            id,
        } => {
            handle_chat(state, connection_id, content, session_id, id).await;
        }
        InboundEvent::Typing {
            session_id,
            is_typing,
        } => {
            handle_typing(state, connection_id, session_id, is_typing).await;
        }
        InboundEvent::JoinSession { session_id } => {
            handle_join(state, connection_id, session_id).await;
        }
        InboundEvent::LeaveSession => {
            let left = state.registry.unbind_session(connection_id);
            state.registry.send(
                connection_id,
                OutboundEvent::new(
                    "session_left",
                    json!({ "session_id": left, "status": "left" }),
                ),
            );
        }
        InboundEvent::System {
            action,
            session_id,
            user_id: _,
        } => {
            handle_system(state, connection_id, &action, session_id).await;
        }
    }
}

fn send_error(state: &AppState, connection_id: &str, code: &str, message: impl Into<String>) {
    state
        .registry
        .send(connection_id, OutboundEvent::error(code, message));
}

fn send_session_error(state: &AppState, connection_id: &str, err: SessionError) {
    let err = OrchestratorError::from(err);
    send_error(state, connection_id, err.code(), err.to_string());
}

/// The caller's connection, if it exists and has authenticated.
fn authenticated(state: &AppState, connection_id: &str) -> Option<(ConnectionInfo, String)> {
    let info = state.registry.get_connection(connection_id)?;
    let user_id = info.user_id.clone().filter(|_| info.authenticated)?;
    Some((info, user_id))
}

async fn handle_auth(
    state: &AppState,
    connection_id: &str,
    token: Option<String>,
    session_id: Option<String>,
) {
    let token = token.filter(|t| !t.trim().is_empty());
    let guest = token.is_none();

    let user_id = match token {
        Some(token) => match state.verifier.verify(&token).await {
            Ok(user_id) => user_id,
            Err(err) => {
                tracing::info!(connection_id = %connection_id, error = %err, "WebSocket auth rejected");
                state.registry.send(
                    connection_id,
                    OutboundEvent::failure(
                        "auth",
                        json!({ "status": "failed", "code": "AUTH_ERROR" }),
                        "Authentication failed",
                    ),
                );
                return;
            }
        },
        None if state.config.auth.allow_guests => format!("guest_{}", short_id(connection_id)),
        None => {
            state.registry.send(
                connection_id,
                OutboundEvent::failure(
                    "auth",
                    json!({ "status": "failed", "code": "AUTH_ERROR" }),
                    "A token is required",
                ),
            );
            return;
        }
    };

    // A session named at auth time is only bound if the user owns it.
    let bound = match session_id {
        Some(session_id) => match state.sessions.validate_access(&session_id, &user_id).await {
            Ok(_) => Some(session_id),
            Err(err) => {
                send_session_error(state, connection_id, err);
                None
            }
        },
        None => None,
    };

    if !state
        .registry
        .authenticate(connection_id, &user_id, bound.as_deref())
    {
        send_error(state, connection_id, "CONNECTION_NOT_FOUND", "connection is gone");
        return;
    }

    let mut data = json!({
        "status": "authenticated",
        "user_id": user_id,
        "session_id": bound,
    });
    if guest {
        data["guest"] = json!(true);
    }
    state
        .registry
        .send(connection_id, OutboundEvent::new("auth", data));
}

async fn handle_chat(
    state: &AppState,
    connection_id: &str,
    content: String,
    session_id: Option<String>,
    client_message_id: Option<String>,
) {
    let Some(info) = state.registry.get_connection(connection_id) else {
        return;
    };
    if !info.authenticated {
        let user_id = info
            .user_id
            .unwrap_or_else(|| format!("user_{}", short_id(connection_id)));
        state.registry.authenticate(connection_id, &user_id, None);
        tracing::debug!(connection_id = %connection_id, user_id = %user_id, "Auto-authenticated anonymous sender");
    }

    let inbound = InboundChat {
        content,
        session_id,
        client_message_id,
    };
    if let Err(err) = state
        .orchestrator
        .handle_chat_message(connection_id, inbound)
        .await
    {
        tracing::warn!(connection_id = %connection_id, error = %err, "Chat message rejected");
        send_error(
            state,
            connection_id,
            err.code(),
            format!("Message processing failed: {err}"),
        );
    }
}

async fn handle_typing(
    state: &AppState,
    connection_id: &str,
    session_id: Option<String>,
    is_typing: bool,
) {
    let Some((info, user_id)) = authenticated(state, connection_id) else {
        return;
    };
    let Some(session_id) = session_id.or(info.session_id.clone()) else {
        return;
    };
    if info.session_id.as_deref() != Some(session_id.as_str())
        && state
            .sessions
            .validate_access(&session_id, &user_id)
            .await
            .is_err()
    {
        return;
    }

    let event = OutboundEvent::new(
        "typing",
        json!({
            "session_id": session_id,
            "sender": user_id,
            "is_typing": is_typing,
        }),
    );
    state
        .registry
        .broadcast_to_session(&session_id, &event, Some(connection_id));
}

async fn handle_join(state: &AppState, connection_id: &str, session_id: Option<String>) {
    let Some((_, user_id)) = authenticated(state, connection_id) else {
        send_error(state, connection_id, "NOT_AUTHENTICATED", "connection is not authenticated");
        return;
    };
    let Some(session_id) = session_id.filter(|s| !s.is_empty()) else {
        send_error(state, connection_id, "MISSING_SESSION", "session_id is required");
        return;
    };

    if let Err(err) = state.sessions.validate_access(&session_id, &user_id).await {
        send_session_error(state, connection_id, err);
        return;
    }

    state.registry.bind_session(connection_id, &session_id);
    tracing::info!(connection_id = %connection_id, session_id = %session_id, "Connection joined session");
    state.registry.send(
        connection_id,
        OutboundEvent::new(
            "session_joined",
            json!({ "session_id": session_id, "status": "joined" }),
        ),
    );
}

async fn handle_system(
    state: &AppState,
    connection_id: &str,
    action: &str,
    session_id: Option<String>,
) {
    let (target, message) = match action {
        "request_handover" => (AgentType::Human, HANDOVER_TO_HUMAN_MESSAGE),
        "ai_takeover" => (AgentType::Ai, HANDOVER_TO_AI_MESSAGE),
        other => {
            send_error(
                state,
                connection_id,
                "UNKNOWN_ACTION",
                format!("unknown system action: {other}"),
            );
            return;
        }
    };

    let Some((info, user_id)) = authenticated(state, connection_id) else {
        send_error(state, connection_id, "NOT_AUTHENTICATED", "connection is not authenticated");
        return;
    };
    let Some(session_id) = session_id.or(info.session_id) else {
        send_error(state, connection_id, "MISSING_SESSION", "session_id is required");
        return;
    };

    if let Err(err) = state.sessions.validate_access(&session_id, &user_id).await {
        send_session_error(state, connection_id, err);
        return;
    }
    let session = match state
        .sessions
        .switch_agent(&session_id, target, Some(action.to_string()))
        .await
    {
        Ok(session) => session,
        Err(err) => {
            send_session_error(state, connection_id, err);
            return;
        }
    };

    if target == AgentType::Human {
        tracing::info!(session_id = %session_id, user_id = %user_id, "Handover to human requested");
    }

    let event = OutboundEvent::new(
        "system",
        json!({
            "action": "handover",
            "status": "success",
            "message": message,
            "session_id": session_id,
            "conversation_id": session.conversation_id,
            "current_agent_type": session.agent_type,
        }),
    );
    state
        .registry
        .broadcast_to_session(&session_id, &event, Some(connection_id));
    state.registry.send(connection_id, event);
}

#[cfg(test)]
mod tests {
    use super::*;

    use switchboard_core::llm::{AiGateway, GatewayOptions};
    use switchboard_core::orchestrator::InMemoryMessageStore;
    use switchboard_core::store::MemoryStore;
    use switchboard_infra::auth::hash_token;
    use switchboard_infra::store::{AnyMessageStore, AnyStore};
    use switchboard_types::config::{AppConfig, TokenEntry};

    fn test_state() -> AppState {
        let mut config = AppConfig::default();
        for user in ["alice", "bob"] {
            config.auth.tokens.push(TokenEntry {
                user_id: user.to_string(),
                token_sha256: hash_token(&format!("{user}-token")),
            });
        }
        AppState::from_parts(
            config,
            AnyStore::Memory(MemoryStore::new()),
            AnyMessageStore::Memory(InMemoryMessageStore::new()),
            AiGateway::new(Vec::new(), GatewayOptions::default()),
        )
    }

    fn connect(state: &AppState) -> (String, mpsc::Receiver<OutboundEvent>) {
        let (tx, rx) = mpsc::channel(64);
        (state.registry.register(tx), rx)
    }

    async fn next_of(rx: &mut mpsc::Receiver<OutboundEvent>, kind: &str) -> OutboundEvent {
        loop {
            let event = rx.recv().await.expect("channel closed");
            if event.kind == kind {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn malformed_frames_get_error_codes() {
        let state = test_state();
        let (id, mut rx) = connect(&state);

        handle_frame(&state, &id, "not json").await;
        assert_eq!(rx.recv().await.unwrap().data["code"], "INVALID_JSON");

        handle_frame(&state, &id, r#"{"content":"hi"}"#).await;
        assert_eq!(rx.recv().await.unwrap().data["code"], "MISSING_TYPE");

        handle_frame(&state, &id, r#"{"type":"dance"}"#).await;
        assert_eq!(rx.recv().await.unwrap().data["code"], "UNKNOWN_TYPE");

        assert!(state.registry.get_connection(&id).is_some());
    }

    #[tokio::test]
    async fn token_auth_resolves_user() {
        let state = test_state();
        let (id, mut rx) = connect(&state);

        handle_frame(&state, &id, r#"{"type":"auth","token":"alice-token"}"#).await;
        let event = next_of(&mut rx, "auth").await;

        assert!(event.success);
        assert_eq!(event.data["user_id"], "alice");
        assert!(event.data.get("guest").is_none());
        assert_eq!(state.registry.user_connections("alice"), vec![id]);
    }

    #[tokio::test]
    async fn switching_user_drops_previous_session() {
        let state = test_state();
        let session = state
            .sessions
            .create("alice", AgentType::Ai, None)
            .await
            .unwrap();
        let (id, mut rx) = connect(&state);

        let frame = json!({
            "type": "auth",
            "token": "alice-token",
            "session_id": session.session_id,
        });
        handle_frame(&state, &id, &frame.to_string()).await;
        assert_eq!(next_of(&mut rx, "auth").await.data["session_id"], json!(session.session_id));

        handle_frame(&state, &id, r#"{"type":"auth","token":"bob-token"}"#).await;
        let event = next_of(&mut rx, "auth").await;
        assert_eq!(event.data["user_id"], "bob");
        assert!(event.data["session_id"].is_null());
        assert!(state.registry.session_connections(&session.session_id).is_empty());

        let typing = OutboundEvent::new("typing", json!({ "sender": "alice" }));
        assert_eq!(
            state
                .registry
                .broadcast_to_session(&session.session_id, &typing, None),
            0
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn bad_token_is_rejected() {
        let state = test_state();
        let (id, mut rx) = connect(&state);

        handle_frame(&state, &id, r#"{"type":"auth","token":"wrong"}"#).await;
        let event = next_of(&mut rx, "auth").await;

        assert!(!event.success);
        assert_eq!(event.data["code"], "AUTH_ERROR");
        assert!(!state.registry.get_connection(&id).unwrap().authenticated);
    }

    #[tokio::test]
    async fn tokenless_auth_becomes_guest() {
        let state = test_state();
        let (id, mut rx) = connect(&state);

        handle_frame(&state, &id, r#"{"type":"auth"}"#).await;
        let event = next_of(&mut rx, "auth").await;

        assert_eq!(event.data["guest"], true);
        assert_eq!(event.data["user_id"], format!("guest_{}", short_id(&id)));
    }

    #[tokio::test]
    async fn ping_echoes_timestamp() {
        let state = test_state();
        let (id, mut rx) = connect(&state);

        handle_frame(&state, &id, r#"{"type":"ping","timestamp":42}"#).await;
        let event = next_of(&mut rx, "pong").await;
        assert_eq!(event.data["timestamp"], 42);
        assert!(event.data["server_time"].is_string());
    }

    #[tokio::test]
    async fn anonymous_message_auto_authenticates_and_acks() {
        let state = test_state();
        let (id, mut rx) = connect(&state);

        handle_frame(&state, &id, r#"{"type":"message","text":"hello","message_id":"c-1"}"#).await;
        let ack = next_of(&mut rx, "message_sent").await;

        assert_eq!(ack.data["client_message_id"], "c-1");
        assert_eq!(ack.data["status"], "received");
        let info = state.registry.get_connection(&id).unwrap();
        assert_eq!(info.user_id.unwrap(), format!("user_{}", short_id(&id)));
        assert_eq!(info.session_id.as_deref(), ack.data["session_id"].as_str());

        state.orchestrator.drain().await;
    }

    #[tokio::test]
    async fn join_requires_auth_and_session() {
        let state = test_state();
        let (id, mut rx) = connect(&state);

        handle_frame(&state, &id, r#"{"type":"join_session","session_id":"s1"}"#).await;
        assert_eq!(rx.recv().await.unwrap().data["code"], "NOT_AUTHENTICATED");

        handle_frame(&state, &id, r#"{"type":"auth","token":"alice-token"}"#).await;
        next_of(&mut rx, "auth").await;

        handle_frame(&state, &id, r#"{"type":"join_session"}"#).await;
        assert_eq!(rx.recv().await.unwrap().data["code"], "MISSING_SESSION");

        handle_frame(&state, &id, r#"{"type":"join_session","session_id":"nope"}"#).await;
        assert_eq!(rx.recv().await.unwrap().data["code"], "SESSION_NOT_FOUND");
    }

    #[tokio::test]
    async fn join_rejects_foreign_session() {
        let state = test_state();
        let session = state
            .sessions
            .create("bob", AgentType::Ai, None)
            .await
            .unwrap();
        let (id, mut rx) = connect(&state);
        handle_frame(&state, &id, r#"{"type":"auth","token":"alice-token"}"#).await;
        next_of(&mut rx, "auth").await;

        let frame = json!({"type": "join_session", "session_id": session.session_id}).to_string();
        handle_frame(&state, &id, &frame).await;
        assert_eq!(rx.recv().await.unwrap().data["code"], "ACCESS_DENIED");
    }

    #[tokio::test]
    async fn join_then_leave() {
        let state = test_state();
        let session = state
            .sessions
            .create("alice", AgentType::Ai, None)
            .await
            .unwrap();
        let (id, mut rx) = connect(&state);
        handle_frame(&state, &id, r#"{"type":"auth","token":"alice-token"}"#).await;
        next_of(&mut rx, "auth").await;

        let frame = json!({"type": "join_session", "sessionId": session.session_id}).to_string();
        handle_frame(&state, &id, &frame).await;
        let joined = next_of(&mut rx, "session_joined").await;
        assert_eq!(joined.data["session_id"], session.session_id.as_str());
        assert_eq!(state.registry.session_connections(&session.session_id), vec![id.clone()]);

        handle_frame(&state, &id, r#"{"type":"leave_session"}"#).await;
        let left = next_of(&mut rx, "session_left").await;
        assert_eq!(left.data["session_id"], session.session_id.as_str());
        assert!(state.registry.session_connections(&session.session_id).is_empty());
    }

    #[tokio::test]
    async fn typing_is_relayed_to_others_only() {
        let state = test_state();
        let session = state
            .sessions
            .create("alice", AgentType::Ai, None)
            .await
            .unwrap();
        let (a, mut rx_a) = connect(&state);
        let (b, mut rx_b) = connect(&state);
        state.registry.authenticate(&a, "alice", Some(&session.session_id));
        state.registry.authenticate(&b, "alice", Some(&session.session_id));

        handle_frame(&state, &a, r#"{"type":"typing","is_typing":true}"#).await;

        let relayed = next_of(&mut rx_b, "typing").await;
        assert_eq!(relayed.data["sender"], "alice");
        assert_eq!(relayed.data["is_typing"], true);
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn handover_switches_agent_and_notifies_session() {
        let state = test_state();
        let session = state
            .sessions
            .create("alice", AgentType::Ai, None)
            .await
            .unwrap();
        let (a, mut rx_a) = connect(&state);
        let (b, mut rx_b) = connect(&state);
        state.registry.authenticate(&a, "alice", Some(&session.session_id));
        state.registry.authenticate(&b, "alice", Some(&session.session_id));

        handle_frame(&state, &a, r#"{"type":"system","action":"request_handover"}"#).await;

        let reply = next_of(&mut rx_a, "system").await;
        assert_eq!(reply.data["action"], "handover");
        assert_eq!(reply.data["current_agent_type"], "human");
        assert_eq!(reply.data["message"], HANDOVER_TO_HUMAN_MESSAGE);
        let relayed = next_of(&mut rx_b, "system").await;
        assert_eq!(relayed.data["current_agent_type"], "human");

        let stored = state.sessions.get(&session.session_id).await.unwrap().unwrap();
        assert_eq!(stored.agent_type, AgentType::Human);

        handle_frame(&state, &a, r#"{"type":"system","action":"ai_takeover"}"#).await;
        let reply = next_of(&mut rx_a, "system").await;
        assert_eq!(reply.data["current_agent_type"], "ai");
    }

    #[tokio::test]
    async fn unknown_system_action() {
        let state = test_state();
        let (id, mut rx) = connect(&state);
        handle_frame(&state, &id, r#"{"type":"system","action":"reboot"}"#).await;
        assert_eq!(rx.recv().await.unwrap().data["code"], "UNKNOWN_ACTION");
    }

    #[tokio::test]
    async fn frames_refresh_activity() {
        let state = test_state();
        let (id, _rx) = connect(&state);
        let before = state.registry.get_connection(&id).unwrap().last_activity;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        handle_frame(&state, &id, r#"{"type":"ping"}"#).await;

        let after = state.registry.get_connection(&id).unwrap().last_activity;
        assert!(after > before);
    }
}
