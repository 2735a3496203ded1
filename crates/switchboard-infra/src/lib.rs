//! Infrastructure implementations for Switchboard.
//!
//! SQLite-backed shared store and message store, the DashScope and OpenAI
//! providers, token verification, and config file loading.

pub mod auth;
pub mod config;
pub mod llm;
pub mod sqlite;
pub mod store;
