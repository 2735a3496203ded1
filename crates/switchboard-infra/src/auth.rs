//! Static bearer-token verification.
//!
//! Tokens are configured as SHA-256 digests so the plaintext never sits in
//! the config file.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use switchboard_core::realtime::TokenVerifier;
use switchboard_types::config::AuthConfig;
use switchboard_types::error::AuthError;

/// Lowercase hex SHA-256 of a token.
pub fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Verifies tokens against a table of configured digests.
#[derive(Debug, Clone, Default)]
pub struct HashedTokenVerifier {
    users_by_digest: HashMap<String, String>,
}

impl HashedTokenVerifier {
    pub fn from_config(config: &AuthConfig) -> Self {
        let users_by_digest = config
            .tokens
            .iter()
            .map(|entry| (entry.token_sha256.to_lowercase(), entry.user_id.clone()))
            .collect();
        Self { users_by_digest }
    }

    pub fn len(&self) -> usize {
        self.users_by_digest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users_by_digest.is_empty()
    }
}

impl TokenVerifier for HashedTokenVerifier {
    async fn verify(&self, token: &str) -> Result<String, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        self.users_by_digest
            .get(&hash_token(token))
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_types::config::TokenEntry;

    fn verifier() -> HashedTokenVerifier {
        HashedTokenVerifier::from_config(&AuthConfig {
            tokens: vec![TokenEntry {
                user_id: "alice".to_string(),
                token_sha256: hash_token("alice-secret").to_uppercase(),
            }],
            allow_guests: false,
        })
    }

    #[test]
    fn hash_known_value() {
        assert_eq!(
            hash_token(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn known_token_resolves_user() {
        assert_eq!(verifier().verify("alice-secret").await.unwrap(), "alice");
    }

    #[tokio::test]
    async fn unknown_and_blank_tokens_are_rejected() {
        let verifier = verifier();
        assert!(matches!(verifier.verify("nope").await, Err(AuthError::InvalidToken)));
        assert!(matches!(verifier.verify("  ").await, Err(AuthError::MissingToken)));
    }
}
