//! Inbound chat message handling and streamed AI replies.
//!
//! `handle_chat_message` does the synchronous part (resolve session, persist,
//! ack) and hands generation to a tracked background task. Generations for
//! one session are serialized through [`GenerationGuard`]; different
//! sessions stream concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use switchboard_types::chat::{ChatMessage, NewMessage, SenderType};
use switchboard_types::config::AiConfig;
use switchboard_types::error::{OrchestratorError, RealtimeError};
use switchboard_types::llm::{CompletionParams, Message};
use switchboard_types::realtime::{OutboundEvent, StreamChunk};
use switchboard_types::session::{AgentType, Session};

use super::guard::GenerationGuard;
use super::message_store::MessageStore;
use crate::llm::{AiGateway, build_conversation_context, default_system_prompt};
use crate::realtime::ConnectionRegistry;
use crate::session::SessionStore;
use crate::store::SharedStore;

const FALLBACK_REPLY_ZH: &str = "抱歉，我现在无法回答您的问题。请稍后再试或联系人工客服。";
const FALLBACK_REPLY_EN: &str =
    "Sorry, I can't answer your question right now. Please try again later or contact a human agent.";

/// Reply persisted when the AI produced nothing usable.
pub fn fallback_reply(language: &str) -> &'static str {
    match language {
        "en-US" => FALLBACK_REPLY_EN,
        _ => FALLBACK_REPLY_ZH,
    }
}

/// Tunables for context building.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub history_window: usize,
    pub max_context_length: usize,
    pub language: String,
}

impl OrchestratorSettings {
    pub fn from_config(config: &AiConfig) -> Self {
        Self {
            history_window: config.history_window,
            max_context_length: config.max_context_length,
            language: config.language.clone(),
        }
    }
}

/// A chat message as received from a client.
#[derive(Debug, Clone, Default)]
pub struct InboundChat {
    pub content: String,
    pub session_id: Option<String>,
    /// Client-side id, echoed back in the ack.
    pub client_message_id: Option<String>,
}

/// Outcome of accepting a chat message.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatAccepted {
    pub message_id: String,
    pub session_id: String,
    pub session_created: bool,
}

pub struct StreamingOrchestrator<S: SharedStore, M: MessageStore> {
    sessions: Arc<SessionStore<S>>,
    registry: Arc<ConnectionRegistry>,
    gateway: Arc<AiGateway>,
    messages: Arc<M>,
    settings: OrchestratorSettings,
    guard: GenerationGuard,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl<S, M> StreamingOrchestrator<S, M>
where
    S: SharedStore + 'static,
    M: MessageStore + 'static,
{
    pub fn new(
        sessions: Arc<SessionStore<S>>,
        registry: Arc<ConnectionRegistry>,
        gateway: Arc<AiGateway>,
        messages: Arc<M>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            sessions,
            registry,
            gateway,
            messages,
            settings,
            guard: GenerationGuard::new(),
            tasks: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn messages(&self) -> &Arc<M> {
        &self.messages
    }

    /// Accept a chat message from `connection_id`.
    ///
    /// Resolves (or creates) the session, persists the message as the
    /// contact's, acks the sender, and schedules the AI reply.
    pub async fn handle_chat_message(
        self: &Arc<Self>,
        connection_id: &str,
        inbound: InboundChat,
    ) -> Result<ChatAccepted, OrchestratorError> {
        let connection = self
            .registry
            .get_connection(connection_id)
            .ok_or_else(|| RealtimeError::ConnectionNotFound(connection_id.to_string()))?;
        let user_id = connection.user_id.ok_or(RealtimeError::NotAuthenticated)?;
        if inbound.content.trim().is_empty() {
            return Err(RealtimeError::Validation("message content is required".to_string()).into());
        }

        let (session, session_created) = self
            .resolve_session(
                connection_id,
                &user_id,
                inbound.session_id,
                connection.session_id,
            )
            .await?;

        let mut metadata = HashMap::new();
        if let Some(client_id) = &inbound.client_message_id {
            metadata.insert("client_message_id".to_string(), json!(client_id));
        }
        let stored = self
            .messages
            .save(NewMessage {
                session_id: session.session_id.clone(),
                conversation_id: session.conversation_id.clone(),
                sender_type: SenderType::Contact,
                sender_id: Some(user_id.clone()),
                content: inbound.content,
                metadata,
            })
            .await?;
        self.sessions.touch(&session.session_id).await?;

        self.registry.send(
            connection_id,
            OutboundEvent::new(
                "message_sent",
                json!({
                    "message_id": stored.id,
                    "client_message_id": inbound.client_message_id,
                    "session_id": session.session_id,
                    "status": "received",
                }),
            ),
        );
        self.registry.broadcast_to_session(
            &session.session_id,
            &message_event(&stored),
            Some(connection_id),
        );

        tracing::info!(
            connection_id,
            session_id = %session.session_id,
            message_id = %stored.id,
            "Chat message accepted"
        );

        let this = Arc::clone(self);
        let session_id = session.session_id.clone();
        self.tasks.spawn(async move {
            this.run_generation(session_id).await;
        });

        Ok(ChatAccepted {
            message_id: stored.id,
            session_id: session.session_id,
            session_created,
        })
    }

    /// An explicitly named session must exist and belong to `user_id`. The
    /// bound session is reused only while it is still live; otherwise a fresh
    /// one replaces it.
    async fn resolve_session(
        &self,
        connection_id: &str,
        user_id: &str,
        requested: Option<String>,
        bound: Option<String>,
    ) -> Result<(Session, bool), OrchestratorError> {
        if let Some(session_id) = requested {
            let session = self.sessions.validate_access(&session_id, user_id).await?;
            self.registry.bind_session(connection_id, &session.session_id);
            return Ok((session, false));
        }

        if let Some(session_id) = bound {
            match self.sessions.get(&session_id).await? {
                Some(session) if session.user_id == user_id => return Ok((session, false)),
                _ => {
                    self.registry.unbind_session(connection_id);
                    tracing::debug!(connection_id, session_id = %session_id, "Bound session no longer live");
                }
            }
        }

        let metadata = HashMap::from([("connection_id".to_string(), json!(connection_id))]);
        let session = self
            .sessions
            .create(user_id, AgentType::Ai, Some(metadata))
            .await?;
        self.registry.bind_session(connection_id, &session.session_id);
        tracing::info!(connection_id, session_id = %session.session_id, "Connection bound to new session");
        Ok((session, true))
    }

    /// One isolated generation. Failures become an `error` event for the
    /// session; nothing propagates to the caller.
    async fn run_generation(&self, session_id: String) {
        let _permit = tokio::select! {
            _ = self.cancel.cancelled() => return,
            permit = self.guard.acquire(&session_id) => permit,
        };

        if let Err(error) = self.generate(&session_id).await {
            tracing::error!(session_id = %session_id, error = %error, "AI generation failed");
            let event = OutboundEvent::error(
                "AI_GENERATION_FAILED",
                format!("Failed to generate a reply: {error}"),
            );
            self.registry.broadcast_to_session(&session_id, &event, None);
        }
    }

    async fn generate(&self, session_id: &str) -> Result<Option<ChatMessage>, OrchestratorError> {
        let Some(session) = self.sessions.get(session_id).await? else {
            tracing::warn!(session_id, "Session vanished before generation");
            return Ok(None);
        };
        if session.agent_type != AgentType::Ai {
            tracing::info!(session_id, agent_type = %session.agent_type, "Session not served by AI, skipping reply");
            return Ok(None);
        }

        let history = self
            .messages
            .recent(session_id, self.settings.history_window)
            .await?;
        let mut prompt = vec![Message::system(default_system_prompt(&self.settings.language))];
        prompt.extend(build_conversation_context(
            &history,
            self.settings.max_context_length,
        ));

        self.broadcast_typing(session_id, true);

        let mut stream = self
            .gateway
            .stream_message(prompt, None, CompletionParams::default());
        let mut full_content = String::new();
        let mut chunks = 0usize;

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.broadcast_typing(session_id, false);
                    tracing::info!(session_id, "Generation cancelled by shutdown");
                    return Ok(None);
                }
                next = stream.next() => next,
            };
            match next {
                Some(Ok(fragment)) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    full_content.push_str(&fragment);
                    chunks += 1;
                    let chunk = StreamChunk {
                        session_id: session_id.to_string(),
                        content: fragment,
                        full_content: full_content.clone(),
                        is_complete: false,
                        message_id: None,
                    };
                    self.registry
                        .broadcast_to_session(session_id, &chunk.into_event(), None);
                }
                Some(Err(error)) => {
                    tracing::warn!(session_id, chunks, error = %error, "AI stream ended early");
                    break;
                }
                None => break,
            }
        }

        self.broadcast_typing(session_id, false);
        tracing::info!(session_id, chunks, length = full_content.len(), "AI response completed");

        if full_content.is_empty() {
            tracing::warn!(session_id, "No AI output, using fallback reply");
            full_content = fallback_reply(&self.settings.language).to_string();
        }

        let reply = self
            .messages
            .save(NewMessage {
                session_id: session_id.to_string(),
                conversation_id: session.conversation_id.clone(),
                sender_type: SenderType::Ai,
                sender_id: None,
                content: full_content.clone(),
                metadata: HashMap::from([
                    ("ai_provider".to_string(), json!("auto")),
                    ("chunks".to_string(), json!(chunks)),
                ]),
            })
            .await?;

        let done = StreamChunk {
            session_id: session_id.to_string(),
            content: String::new(),
            full_content,
            is_complete: true,
            message_id: Some(reply.id.clone()),
        };
        self.registry
            .broadcast_to_session(session_id, &done.into_event(), None);
        self.registry
            .broadcast_to_session(session_id, &message_event(&reply), None);

        Ok(Some(reply))
    }

    fn broadcast_typing(&self, session_id: &str, is_typing: bool) {
        let event = OutboundEvent::new(
            "typing",
            json!({
                "session_id": session_id,
                "sender_type": "ai",
                "is_typing": is_typing,
            }),
        );
        self.registry.broadcast_to_session(session_id, &event, None);
    }

    /// Number of generations running or waiting.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every scheduled generation to finish.
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Cancel in-flight generations and wait for them to stop.
    pub async fn shutdown(&self) {
        tracing::info!(in_flight = self.tasks.len(), "Stopping AI generations");
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}

fn message_event(message: &ChatMessage) -> OutboundEvent {
    OutboundEvent::new(
        "message",
        json!({
            "message_id": message.id,
            "session_id": message.session_id,
            "conversation_id": message.conversation_id,
            "sender_type": message.sender_type,
            "content": message.content,
            "created_at": message.created_at.to_rfc3339(),
        }),
    )
}
