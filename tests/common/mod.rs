//! Shared helpers for integration tests

#![allow(dead_code)]

use cis2_broker::auth::JwksVerifier;
use cis2_broker::config::{Config, ConfigLoader};
use cis2_broker::secrets::StaticSecrets;
use cis2_broker::server::AppState;
use cis2_broker::store::{MemoryStore, Stores};
use cis2_broker::Broker;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::json;
use std::sync::Arc;

pub const SIGNING_KEY: &str = include_str!("../fixtures/signing_key.pem");
pub const SIGNING_KEY_PUB: &str = include_str!("../fixtures/signing_key.pub.pem");
pub const SIGNING_KEY_N: &str = include_str!("../fixtures/signing_key.n.txt");

pub const IDP_RESPONSE: &str = "https://pool.example.com/oauth2/idpresponse";
pub const POOL_ISSUER: &str = "https://cognito-idp.eu-west-2.amazonaws.com/pool";

/// Broker configuration with both providers rooted at `upstream`
pub fn config_yaml(upstream: &str, mock_mode: bool) -> String {
    format!(
        r#"
server:
  address: "127.0.0.1:0"
providers:
  primary:
    authorize_endpoint: "{upstream}/authorize"
    token_endpoint: "{upstream}/token"
    userinfo_endpoint: "{upstream}/userinfo"
    client_id: "broker-client"
    signing_key_ref: "cis2-private-key"
    signing_key_id: "kid-1"
    callback_url: "https://broker.example.com/callback"
  mock:
    authorize_endpoint: "{upstream}/mock/authorize"
    token_endpoint: "{upstream}/mock/token"
    client_id: "mock-client"
    signing_key_ref: "cis2-private-key"
    signing_key_id: "kid-mock"
    callback_url: "https://broker.example.com/mock/callback"
session_provider:
  idp_response_endpoint: "{IDP_RESPONSE}"
  jwks_url: "https://pool.example.com/.well-known/jwks.json"
  issuer: "{POOL_ISSUER}"
tables:
  state_table: "state"
  identity_table: "identity"
  concurrency_table: "concurrency"
mock_mode_enabled: {mock_mode}
access_role_codes: ["R8000"]
"#
    )
}

pub fn config(upstream: &str, mock_mode: bool) -> Config {
    ConfigLoader::from_yaml(&config_yaml(upstream, mock_mode)).unwrap()
}

pub fn secrets() -> StaticSecrets {
    StaticSecrets::new().with_secret("cis2-private-key", SIGNING_KEY)
}

/// Broker backed by a fresh in-memory store
pub fn broker(config: Config) -> (Broker, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let stores = Stores {
        state: store.clone(),
        directory: store.clone(),
    };
    let broker = Broker::new(Arc::new(config), stores, Arc::new(secrets()));
    (broker, store)
}

/// Verifier trusting the fixture signing key
pub fn verifier() -> JwksVerifier {
    let jwks = json!({
        "keys": [{
            "kty": "RSA",
            "kid": "pool-key",
            "use": "sig",
            "alg": "RS256",
            "n": SIGNING_KEY_N.trim(),
            "e": "AQAB"
        }]
    });
    JwksVerifier::from_json(&jwks.to_string())
        .unwrap()
        .with_issuer(POOL_ISSUER)
}

pub fn app_state(config: Config) -> (AppState, Arc<MemoryStore>) {
    let (broker, store) = broker(config);
    (
        AppState {
            broker,
            verifier: Arc::new(verifier()),
        },
        store,
    )
}

/// Session provider ID token for `username`, signed with the fixture key
pub fn session_token(username: &str, session_id: Option<&str>) -> String {
    let mut claims = json!({
        "sub": "f1e2d3c4",
        "iss": POOL_ISSUER,
        "aud": "pool-client",
        "token_use": "id",
        "cognito:username": username,
        "exp": chrono::Utc::now().timestamp() + 3600,
    });
    if let Some(session_id) = session_id {
        claims["session_id"] = json!(session_id);
    }

    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some("pool-key".into());
    encode(
        &header,
        &claims,
        &EncodingKey::from_rsa_pem(SIGNING_KEY.as_bytes()).unwrap(),
    )
    .unwrap()
}

/// Unsigned upstream ID token carrying `sub`
pub fn upstream_id_token(sub: &str) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS512","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(json!({"sub": sub, "aud": "broker-client"}).to_string());
    format!("{}.{}.signature", header, payload)
}

/// Query parameters of a redirect location
pub fn query_of(location: &str) -> std::collections::HashMap<String, String> {
    url::Url::parse(location)
        .unwrap()
        .query_pairs()
        .into_owned()
        .collect()
}
