//! Client assertion signing
//!
//! The broker authenticates to the upstream token endpoint with a short-lived
//! RS512 JWT (`private_key_jwt`) instead of a shared client secret. The
//! private key is fetched from the secret provider on every call.

use crate::error::BrokerError;
use crate::secrets::SecretProvider;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Value of the `client_assertion_type` form parameter
pub const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Claims of a client assertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// A signed client assertion. Never persisted or logged.
#[derive(Clone, PartialEq)]
pub struct ClientAssertion {
    token: String,
}

impl ClientAssertion {
    pub fn as_str(&self) -> &str {
        &self.token
    }

    /// Form parameters to attach to a token request
    pub fn form_params(&self) -> [(&'static str, String); 2] {
        [
            ("client_assertion_type", CLIENT_ASSERTION_TYPE.to_string()),
            ("client_assertion", self.token.clone()),
        ]
    }
}

impl std::fmt::Debug for ClientAssertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ClientAssertion(..)")
    }
}

/// Signs client assertions with a key held by the secret provider
#[derive(Clone)]
pub struct AssertionSigner {
    secrets: Arc<dyn SecretProvider>,
    lifetime: chrono::Duration,
}

impl AssertionSigner {
    pub fn new(secrets: Arc<dyn SecretProvider>, lifetime: chrono::Duration) -> Self {
        Self { secrets, lifetime }
    }

    /// Sign an assertion with `iss = sub = issuer` and `aud = audience`.
    ///
    /// `kid` is placed in the JWT header so the IdP can select the matching
    /// public key.
    #[tracing::instrument(name = "assertion.sign", skip(self, key_reference), err)]
    pub async fn sign(
        &self,
        issuer: &str,
        audience: &str,
        key_reference: &str,
        kid: &str,
    ) -> Result<ClientAssertion, BrokerError> {
        let pem = self
            .secrets
            .get_secret(key_reference)
            .await
            .map_err(|e| BrokerError::KeyRetrieval(e.to_string()))?;

        let key = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| BrokerError::KeyRetrieval(format!("invalid private key: {}", e)))?;

        let now = chrono::Utc::now();
        let claims = AssertionClaims {
            iss: issuer.to_string(),
            sub: issuer.to_string(),
            aud: audience.to_string(),
            jti: uuid::Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + self.lifetime).timestamp(),
        };

        let mut header = Header::new(Algorithm::RS512);
        header.kid = Some(kid.to_string());

        let token =
            encode(&header, &claims, &key).map_err(|e| BrokerError::Signing(e.to_string()))?;

        Ok(ClientAssertion { token })
    }
}
