//! Shared domain types for Switchboard.
//!
//! Sessions, connection snapshots, the WebSocket wire envelopes, chat history
//! records, LLM message shapes, rate-limit bookkeeping, configuration, and the
//! error enums shared by every layer.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod chat;
pub mod config;
pub mod connection;
pub mod error;
pub mod llm;
pub mod rate_limit;
pub mod realtime;
pub mod session;
