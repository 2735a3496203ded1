//! Token verification port.
//!
//! The realtime layer only consumes a verified identity; issuing and signing
//! tokens happens elsewhere.

use std::future::Future;

use switchboard_types::error::AuthError;

/// Resolves a client-presented token to a user id.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> impl Future<Output = Result<String, AuthError>> + Send;
}
