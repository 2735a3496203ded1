//! Live connection bookkeeping and client identity verification.

pub mod auth;
pub mod registry;

pub use auth::TokenVerifier;
pub use registry::{ConnectionRegistry, ConnectionSender};
