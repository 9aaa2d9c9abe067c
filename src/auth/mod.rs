//! Authentication module
//!
//! Two directions of trust:
//!
//! - [`assertion`] signs the RS512 client assertion the broker presents to the
//!   upstream token endpoint in place of a client secret.
//! - [`verifier`] validates the session provider's ID tokens presented as
//!   Bearer tokens on the session, logout and role routes.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

pub mod assertion;
pub mod verifier;

pub use assertion::{AssertionSigner, ClientAssertion, CLIENT_ASSERTION_TYPE};
pub use verifier::JwksVerifier;

/// Authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("JWKS fetch error: {0}")]
    JwksFetchError(String),

    #[error("Missing claim: {0}")]
    MissingClaim(&'static str),
}

/// Identity extracted from a verified session token
#[derive(Debug, Clone)]
pub struct AuthResult {
    /// Session provider username (`cognito:username`)
    pub username: String,
    /// Session id minted at sign-in, when the token carries one
    pub session_id: Option<String>,
    pub claims: HashMap<String, serde_json::Value>,
}

/// Authenticator trait
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Authenticate a request
    async fn authenticate(&self, request: &AuthRequest) -> Result<AuthResult, AuthError>;
}

/// Authentication request context
#[derive(Debug, Default)]
pub struct AuthRequest {
    /// Header names are lowercase
    pub headers: HashMap<String, String>,
    pub method: String,
    pub path: String,
}

impl AuthRequest {
    /// Bearer token from the `Authorization` header
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get("authorization")
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token() {
        let mut request = AuthRequest::default();
        assert_eq!(request.bearer_token(), None);

        request
            .headers
            .insert("authorization".into(), "Basic abc".into());
        assert_eq!(request.bearer_token(), None);

        request
            .headers
            .insert("authorization".into(), "Bearer eyJ.abc.def".into());
        assert_eq!(request.bearer_token(), Some("eyJ.abc.def"));
    }
}
