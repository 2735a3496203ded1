//! LLM request types and the AI gateway error taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role of a message in an LLM conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(format!("invalid message role: '{other}'")),
        }
    }
}

/// A single message in an LLM conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Per-call overrides for a completion.
///
/// Unset fields fall back to the provider's configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Supported AI provider backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    DashScope,
    OpenAi,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::DashScope, ProviderKind::OpenAi];
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::DashScope => write!(f, "dashscope"),
            ProviderKind::OpenAi => write!(f, "openai"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dashscope" => Ok(ProviderKind::DashScope),
            "openai" => Ok(ProviderKind::OpenAi),
            other => Err(format!("invalid provider: '{other}'")),
        }
    }
}

/// Errors surfaced by AI providers and the gateway.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AiError {
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("{provider} returned HTTP {status}: {body}")]
    ProviderHttp {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{0} returned an empty response")]
    ProviderResponseEmpty(String),

    #[error("{provider} transport error: {message}")]
    Transport { provider: String, message: String },

    #[error("{provider} timed out after {secs}s")]
    Timeout { provider: String, secs: u64 },

    #[error("stream error: {0}")]
    Stream(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("all providers failed: {last_error}")]
    AllProvidersFailed { last_error: String },
}

impl AiError {
    /// Whether retrying the same provider could plausibly succeed.
    ///
    /// Rate limits, server errors, transport hiccups, timeouts and empty
    /// answers are retried; other client errors (bad key, bad request) are not.
    pub fn is_transient(&self) -> bool {
        match self {
            AiError::ProviderHttp { status, .. } => *status == 429 || *status >= 500,
            AiError::ProviderResponseEmpty(_)
            | AiError::Transport { .. }
            | AiError::Timeout { .. }
            | AiError::Stream(_) => true,
            AiError::ProviderUnavailable(_)
            | AiError::Deserialization(_)
            | AiError::AllProvidersFailed { .. } => false,
        }
    }

    /// True when every routing option is exhausted.
    pub fn is_exhausted(&self) -> bool {
        matches!(
            self,
            AiError::AllProvidersFailed { .. } | AiError::ProviderUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_parses_case_insensitively() {
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!(ProviderKind::DashScope.to_string(), "dashscope");
    }

    #[test]
    fn http_errors_are_transient_only_for_429_and_5xx() {
        let http = |status| AiError::ProviderHttp {
            provider: "openai".to_string(),
            status,
            body: String::new(),
        };
        assert!(http(429).is_transient());
        assert!(http(503).is_transient());
        assert!(!http(401).is_transient());
        assert!(!http(400).is_transient());
    }

    #[test]
    fn exhaustion_covers_unavailable_and_all_failed() {
        assert!(AiError::ProviderUnavailable("none".into()).is_exhausted());
        assert!(
            AiError::AllProvidersFailed {
                last_error: "x".into()
            }
            .is_exhausted()
        );
        assert!(!AiError::Stream("x".into()).is_exhausted());
    }
}
