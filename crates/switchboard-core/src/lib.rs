//! Business logic and port traits for Switchboard.
//!
//! This crate defines the seams (shared store, message store, AI provider,
//! token verifier) that the infrastructure layer implements, plus the
//! services built on them. It depends only on `switchboard-types` -- never on
//! `switchboard-infra` or any database/HTTP crate.

pub mod clock;
pub mod llm;
pub mod orchestrator;
pub mod ratelimit;
pub mod realtime;
pub mod session;
pub mod store;
