//! Session token verification
//!
//! Validates ID tokens issued by the session provider against its JWKS
//! endpoint. Keys are cached and refreshed once the cache TTL elapses, or
//! early when a token names a key the cache does not hold.
//!
//! # Example
//!
//! ```no_run
//! use cis2_broker::auth::JwksVerifier;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let verifier = JwksVerifier::new("https://cognito-idp.eu-west-2.amazonaws.com/pool/.well-known/jwks.json")
//!     .await?
//!     .with_issuer("https://cognito-idp.eu-west-2.amazonaws.com/pool");
//! # Ok(())
//! # }
//! ```

use super::{AuthError, AuthRequest, AuthResult, Authenticator};
use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Minimum gap between refreshes triggered by an unknown `kid`
const KID_MISS_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Claim carrying the session provider username
pub const USERNAME_CLAIM: &str = "cognito:username";

/// Claim carrying the session id minted at sign-in
pub const SESSION_ID_CLAIM: &str = "session_id";

/// A single JSON Web Key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type, only "RSA" is accepted
    pub kty: String,

    #[serde(default)]
    pub kid: Option<String>,

    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    #[serde(default)]
    pub alg: Option<String>,

    /// RSA modulus (base64url encoded)
    #[serde(default)]
    pub n: Option<String>,

    /// RSA exponent (base64url encoded)
    #[serde(default)]
    pub e: Option<String>,
}

impl Jwk {
    pub fn to_decoding_key(&self) -> Result<DecodingKey, AuthError> {
        if self.kty != "RSA" {
            return Err(AuthError::InvalidToken(format!(
                "Unsupported key type: {}",
                self.kty
            )));
        }
        let n = self
            .n
            .as_ref()
            .ok_or_else(|| AuthError::InvalidToken("Missing RSA modulus (n)".into()))?;
        let e = self
            .e
            .as_ref()
            .ok_or_else(|| AuthError::InvalidToken("Missing RSA exponent (e)".into()))?;

        DecodingKey::from_rsa_components(n, e)
            .map_err(|e| AuthError::InvalidToken(format!("Invalid RSA key: {}", e)))
    }

    pub fn algorithm(&self) -> Option<Algorithm> {
        self.alg.as_deref().and_then(rsa_algorithm)
    }
}

fn rsa_algorithm(alg: &str) -> Option<Algorithm> {
    match alg {
        "RS256" => Some(Algorithm::RS256),
        "RS384" => Some(Algorithm::RS384),
        "RS512" => Some(Algorithm::RS512),
        _ => None,
    }
}

/// JSON Web Key Set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

struct CachedJwks {
    jwks: Jwks,
    fetched_at: std::time::Instant,
    /// Last refresh caused by an unknown `kid`
    kid_miss_refresh: Option<std::time::Instant>,
}

/// JWKS-backed verifier for session provider ID tokens
pub struct JwksVerifier {
    endpoint: Option<String>,
    cache: Arc<RwLock<CachedJwks>>,
    cache_ttl: Duration,
    client: reqwest::Client,
    required_issuer: Option<String>,
}

impl JwksVerifier {
    /// Fetch the key set from `endpoint`
    pub async fn new(endpoint: &str) -> Result<Self, AuthError> {
        let client = reqwest::Client::new();
        let jwks = Self::fetch_jwks(&client, endpoint).await?;

        Ok(Self::with_jwks(Some(endpoint.to_string()), jwks, client))
    }

    /// Build a verifier from a JWKS document
    pub fn from_json(json: &str) -> Result<Self, AuthError> {
        let jwks: Jwks =
            serde_json::from_str(json).map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        Ok(Self::with_jwks(None, jwks, reqwest::Client::new()))
    }

    fn with_jwks(endpoint: Option<String>, jwks: Jwks, client: reqwest::Client) -> Self {
        Self {
            endpoint,
            cache: Arc::new(RwLock::new(CachedJwks {
                jwks,
                fetched_at: std::time::Instant::now(),
                kid_miss_refresh: None,
            })),
            cache_ttl: Duration::from_secs(3600),
            client,
            required_issuer: None,
        }
    }

    /// How long fetched keys are trusted before a refresh
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Require the `iss` claim to equal `issuer`
    #[must_use]
    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.required_issuer = Some(issuer.to_string());
        self
    }

    async fn find_key(&self, kid: Option<&str>) -> Option<Jwk> {
        let cache = self.cache.read().await;
        match kid {
            Some(kid) => cache
                .jwks
                .keys
                .iter()
                .find(|k| k.kid.as_deref() == Some(kid))
                .cloned(),
            None => cache.jwks.keys.first().cloned(),
        }
    }

    async fn fetch_jwks(client: &reqwest::Client, endpoint: &str) -> Result<Jwks, AuthError> {
        let response = client
            .get(endpoint)
            .send()
            .await
            .map_err(|e| AuthError::JwksFetchError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::JwksFetchError(format!(
                "HTTP {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::JwksFetchError(e.to_string()))
    }

    async fn refresh_if_needed(&self) -> Result<(), AuthError> {
        let needs_refresh = {
            let cache = self.cache.read().await;
            cache.fetched_at.elapsed() > self.cache_ttl
        };

        if needs_refresh {
            if let Some(endpoint) = &self.endpoint {
                let jwks = Self::fetch_jwks(&self.client, endpoint).await?;
                let mut cache = self.cache.write().await;
                cache.jwks = jwks;
                cache.fetched_at = std::time::Instant::now();
                tracing::debug!(endpoint = %endpoint, "JWKS refreshed");
            }
        }

        Ok(())
    }

    /// Refetch the key set after a key rotation, at most once per interval
    async fn refresh_on_kid_miss(&self) -> Result<(), AuthError> {
        let Some(endpoint) = &self.endpoint else {
            return Ok(());
        };

        let mut cache = self.cache.write().await;
        if cache
            .kid_miss_refresh
            .is_some_and(|at| at.elapsed() < KID_MISS_REFRESH_INTERVAL)
        {
            return Ok(());
        }

        let now = std::time::Instant::now();
        cache.kid_miss_refresh = Some(now);
        cache.jwks = Self::fetch_jwks(&self.client, endpoint).await?;
        cache.fetched_at = now;
        tracing::info!(endpoint = %endpoint, "JWKS refreshed after unknown key id");
        Ok(())
    }

    /// Verify `token` and extract the session identity
    pub async fn verify(&self, token: &str) -> Result<AuthResult, AuthError> {
        self.refresh_if_needed().await?;

        let header = decode_header(token)
            .map_err(|e| AuthError::InvalidToken(format!("Invalid token header: {}", e)))?;

        let jwk = match self.find_key(header.kid.as_deref()).await {
            Some(jwk) => jwk,
            None => {
                self.refresh_on_kid_miss().await?;
                self.find_key(header.kid.as_deref())
                    .await
                    .ok_or_else(|| AuthError::InvalidToken("Signing key not found".into()))?
            }
        };

        let algorithm = jwk
            .algorithm()
            .or_else(|| match header.alg {
                Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => Some(header.alg),
                _ => None,
            })
            .ok_or_else(|| AuthError::InvalidToken("Unsupported algorithm".into()))?;

        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;
        validation.validate_aud = false;
        if let Some(issuer) = &self.required_issuer {
            validation.set_issuer(&[issuer]);
        }

        let data = decode::<HashMap<String, serde_json::Value>>(
            token,
            &jwk.to_decoding_key()?,
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            _ => AuthError::InvalidToken(e.to_string()),
        })?;

        let claims = data.claims;
        let username = claims
            .get(USERNAME_CLAIM)
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
            .ok_or(AuthError::MissingClaim(USERNAME_CLAIM))?
            .to_string();
        let session_id = claims
            .get(SESSION_ID_CLAIM)
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Ok(AuthResult {
            username,
            session_id,
            claims,
        })
    }
}

#[async_trait]
impl Authenticator for JwksVerifier {
    async fn authenticate(&self, request: &AuthRequest) -> Result<AuthResult, AuthError> {
        let token = request.bearer_token().ok_or(AuthError::MissingAuth)?;
        self.verify(token).await
    }
}
