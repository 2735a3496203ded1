//! AI provider abstractions and the resilient gateway in front of them.
//!
//! - `AiProvider`: RPITIT trait for concrete backends (DashScope, OpenAI)
//! - `BoxAiProvider`: object-safe, cloneable wrapper for runtime selection
//! - `AiGateway`: retry with linear backoff plus single-hop failover
//! - `context`: history-to-prompt conversion under a character budget

pub mod box_provider;
pub mod context;
pub mod gateway;
pub mod provider;

pub use box_provider::BoxAiProvider;
pub use context::{build_conversation_context, default_system_prompt};
pub use gateway::{AiGateway, AiStream, GatewayOptions};
pub use provider::AiProvider;
