//! Application configuration types.
//!
//! `AppConfig` mirrors `switchboard.toml`. Every field has a default, so an
//! empty file (or no file) yields a runnable configuration.

use serde::{Deserialize, Serialize};

use crate::llm::ProviderKind;
use crate::rate_limit::{RateLimitRule, RouteLimit};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Shared key-value store location.
///
/// `sqlite://...` selects the SQLite backend, `memory://` the in-process one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_url")]
    pub url: String,
}

fn default_store_url() -> String {
    "sqlite://switchboard.db?mode=rwc".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
        }
    }
}

/// Session lifecycle limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "default_max_sessions_per_user")]
    pub max_sessions_per_user: usize,
}

fn default_max_duration_secs() -> u64 {
    7200
}

fn default_idle_timeout_secs() -> u64 {
    1800
}

fn default_cleanup_interval_secs() -> u64 {
    300
}

fn default_max_sessions_per_user() -> usize {
    5
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: default_max_duration_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            max_sessions_per_user: default_max_sessions_per_user(),
        }
    }
}

/// WebSocket connection management.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Per-connection outbound queue depth.
    #[serde(default = "default_send_buffer")]
    pub send_buffer: usize,
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_connection_timeout_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_max_message_size() -> usize {
    1_048_576
}

fn default_max_connections() -> usize {
    1000
}

fn default_send_buffer() -> usize {
    256
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            connection_timeout_secs: default_connection_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_message_size: default_max_message_size(),
            max_connections: default_max_connections(),
            send_buffer: default_send_buffer(),
        }
    }
}

/// Settings for one AI provider.
///
/// A provider without an API key is left out of routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_temperature() -> f32 {
    0.7
}

fn default_dashscope() -> ProviderSettings {
    ProviderSettings {
        api_key: None,
        base_url: "https://dashscope.aliyuncs.com".to_string(),
        model: "qwen-turbo".to_string(),
        max_tokens: default_max_tokens(),
        temperature: default_temperature(),
    }
}

fn default_openai() -> ProviderSettings {
    ProviderSettings {
        api_key: None,
        base_url: "https://api.openai.com/v1".to_string(),
        model: "gpt-3.5-turbo".to_string(),
        max_tokens: default_max_tokens(),
        temperature: default_temperature(),
    }
}

/// AI gateway behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_provider")]
    pub default_provider: ProviderKind,
    #[serde(default = "default_ai_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Character budget for conversation context.
    #[serde(default = "default_max_context_length")]
    pub max_context_length: usize,
    /// How many recent messages are fetched before building context.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_dashscope")]
    pub dashscope: ProviderSettings,
    #[serde(default = "default_openai")]
    pub openai: ProviderSettings,
}

fn default_provider() -> ProviderKind {
    ProviderKind::DashScope
}

fn default_ai_timeout_secs() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_max_context_length() -> usize {
    4000
}

fn default_history_window() -> usize {
    10
}

fn default_language() -> String {
    "zh-CN".to_string()
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            timeout_secs: default_ai_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            max_context_length: default_max_context_length(),
            history_window: default_history_window(),
            language: default_language(),
            dashscope: default_dashscope(),
            openai: default_openai(),
        }
    }
}

impl AiConfig {
    pub fn provider(&self, kind: ProviderKind) -> &ProviderSettings {
        match kind {
            ProviderKind::DashScope => &self.dashscope,
            ProviderKind::OpenAi => &self.openai,
        }
    }
}

/// HTTP admission control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rule")]
    pub default: RateLimitRule,
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteLimit>,
}

fn default_true() -> bool {
    true
}

fn default_rule() -> RateLimitRule {
    RateLimitRule::new(100, 60)
}

fn default_routes() -> Vec<RouteLimit> {
    vec![
        RouteLimit {
            path: "/api/v1/auth/login".to_string(),
            limit: 5,
            window_secs: 60,
        },
        RouteLimit {
            path: "/api/v1/chat/messages".to_string(),
            limit: 60,
            window_secs: 60,
        },
        RouteLimit {
            path: "/api/v1/admin".to_string(),
            limit: 100,
            window_secs: 60,
        },
    ]
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default: default_rule(),
            routes: default_routes(),
        }
    }
}

/// A client token accepted by the hashed-token verifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    pub user_id: String,
    /// Lowercase hex SHA-256 of the token.
    pub token_sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
    #[serde(default = "default_true")]
    pub allow_guests: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            tokens: Vec::new(),
            allow_guests: true,
        }
    }
}
