//! HTTP layer for Switchboard.
//!
//! Axum router with the WebSocket endpoint, a small session REST surface
//! under `/api/v1/`, rate limiting, CORS and request tracing.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod router;
