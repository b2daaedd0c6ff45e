//! Bearer token issuing and verification
//!
//! The supervisor hands every plugin an opaque bearer token for calling back
//! into the API. Token contents are never interpreted here; swapping in a
//! signed-token implementation only means implementing [`TokenIssuer`].

use dashmap::DashMap;

/// Issues and verifies the opaque bearer tokens used on the API surface.
pub trait TokenIssuer: Send + Sync + 'static {
    /// Mint a token scoped to `subject` (e.g. a plugin name).
    fn issue(&self, subject: &str) -> String;

    /// Check a presented token.
    fn verify(&self, token: &str) -> bool;
}

/// Default issuer: random opaque tokens, verified against an in-memory set.
///
/// An optional static token can be configured for operators and the CLI.
pub struct RandomTokenIssuer {
    static_token: Option<String>,
    issued: DashMap<String, String>,
}

impl RandomTokenIssuer {
    pub fn new(static_token: Option<String>) -> Self {
        Self {
            static_token,
            issued: DashMap::new(),
        }
    }
}

impl TokenIssuer for RandomTokenIssuer {
    fn issue(&self, subject: &str) -> String {
        let bytes: [u8; 24] = rand::random();
        let token: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        self.issued.insert(token.clone(), subject.to_string());
        token
    }

    fn verify(&self, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        self.static_token.as_deref() == Some(token) || self.issued.contains_key(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issued_tokens_verify() {
        let issuer = RandomTokenIssuer::new(None);
        let token = issuer.issue("ipmi");
        assert!(issuer.verify(&token));
        assert!(!issuer.verify("not-a-token"));
        assert!(!issuer.verify(""));
    }

    #[test]
    fn test_static_token_verifies() {
        let issuer = RandomTokenIssuer::new(Some("operator-token".to_string()));
        assert!(issuer.verify("operator-token"));
        assert!(!issuer.verify("other"));
    }

    #[test]
    fn test_tokens_are_unique() {
        let issuer = RandomTokenIssuer::new(None);
        assert_ne!(issuer.issue("a"), issuer.issue("b"));
    }
}
