//! Records the broker persists or round-trips through the browser.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Username prefix of a sign-in whose session is not yet confirmed.
pub const DRAFT_PREFIX: &str = "Draft_";

/// Which identity provider a username was federated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentityVariant {
    Mock,
    Primary,
}

impl IdentityVariant {
    /// Username prefix the session provider gives federated users.
    pub fn prefix(self) -> &'static str {
        match self {
            IdentityVariant::Mock => "Mock_",
            IdentityVariant::Primary => "Primary_",
        }
    }

    pub fn of_username(username: &str) -> Self {
        if username.starts_with(IdentityVariant::Mock.prefix()) {
            IdentityVariant::Mock
        } else {
            IdentityVariant::Primary
        }
    }

    /// Session provider username for an upstream subject.
    pub fn username_for(self, subject: &str) -> String {
        format!("{}{}", self.prefix(), subject)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IdentityVariant::Mock => "mock",
            IdentityVariant::Primary => "primary",
        }
    }
}

/// Maps the state token sent upstream to the session provider's own state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMapping {
    pub state: String,
    pub cognito_state: String,
    pub expiry: DateTime<Utc>,
}

impl StateMapping {
    pub fn new(state: impl Into<String>, cognito_state: impl Into<String>, ttl: Duration) -> Self {
        Self {
            state: state.into(),
            cognito_state: cognito_state.into(),
            expiry: Utc::now() + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }
}

/// The state value was an ordinary opaque token, not an encoded flow.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("state is not an encoded flow")]
pub struct NotEncodedFlow;

/// Flow context carried inside the OAuth `state` by pull-request environments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedFlowState {
    pub is_pull_request: bool,
    pub original_state: String,
    pub redirect_uri: String,
}

impl EncodedFlowState {
    pub fn encode(&self) -> String {
        // Serializing a struct of plain strings cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        STANDARD.encode(json)
    }

    /// Decode a callback `state`.
    ///
    /// Any failure means the state is a plain token and the caller takes the
    /// standard path.
    pub fn decode(state: &str) -> Result<Self, NotEncodedFlow> {
        let bytes = STANDARD
            .decode(state)
            .or_else(|_| URL_SAFE_NO_PAD.decode(state.trim_end_matches('=')))
            .map_err(|_| NotEncodedFlow)?;
        let flow: EncodedFlowState = serde_json::from_slice(&bytes).map_err(|_| NotEncodedFlow)?;
        Url::parse(&flow.redirect_uri).map_err(|_| NotEncodedFlow)?;
        Ok(flow)
    }
}

/// A role held by a user at an organisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDetails {
    pub role_id: String,
    #[serde(default)]
    pub role_name: Option<String>,
    #[serde(default)]
    pub role_code: Option<String>,
    #[serde(default)]
    pub org_code: Option<String>,
    #[serde(default)]
    pub org_name: Option<String>,
}

/// Upstream tokens kept so a session can be invalidated later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMapping {
    pub access_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    pub last_activity: DateTime<Utc>,
}

/// Identity Table row, one per username.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    pub username: String,
    /// Session id of the primary session, once confirmed.
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub roles_with_access: Vec<RoleDetails>,
    #[serde(default)]
    pub roles_without_access: Vec<RoleDetails>,
    #[serde(default)]
    pub currently_selected_role: Option<RoleDetails>,
    #[serde(default)]
    pub token_mapping: Option<TokenMapping>,
}

impl IdentityRecord {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            session_id: None,
            roles_with_access: Vec::new(),
            roles_without_access: Vec::new(),
            currently_selected_role: None,
            token_mapping: None,
        }
    }
}

/// Concurrency Table row, one per `(username, session_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcurrencyRecord {
    pub username: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
}

impl ConcurrencyRecord {
    /// Record of a confirmed session for `username`.
    pub fn confirmed(username: &str, session_id: &str, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            username: username.to_string(),
            session_id: session_id.to_string(),
            created_at: now,
            expiry: now + ttl,
        }
    }

    /// Record minted at sign-in, keyed `Draft_<username>`.
    pub fn draft(username: &str, session_id: &str, ttl: Duration) -> Self {
        Self::confirmed(&draft_username(username), session_id, ttl)
    }

    pub fn is_draft(&self) -> bool {
        self.username.starts_with(DRAFT_PREFIX)
    }
}

pub fn draft_username(username: &str) -> String {
    format!("{}{}", DRAFT_PREFIX, username)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_from_username() {
        assert_eq!(
            IdentityVariant::of_username("Mock_555043300081"),
            IdentityVariant::Mock
        );
        assert_eq!(
            IdentityVariant::of_username("Primary_alice"),
            IdentityVariant::Primary
        );
        assert_eq!(
            IdentityVariant::Primary.username_for("alice"),
            "Primary_alice"
        );
    }

    #[test]
    fn test_state_mapping_expiry() {
        let mapping = StateMapping::new("s", "c", Duration::seconds(60));
        assert!(!mapping.is_expired(Utc::now()));
        assert!(mapping.is_expired(Utc::now() + Duration::seconds(61)));
    }

    #[test]
    fn test_encoded_flow_state_decodes() {
        let flow = EncodedFlowState {
            is_pull_request: true,
            original_state: "abc".into(),
            redirect_uri: "https://pr-42.example.com/callback".into(),
        };
        assert_eq!(EncodedFlowState::decode(&flow.encode()), Ok(flow));
    }

    #[test]
    fn test_plain_state_is_not_encoded_flow() {
        assert_eq!(
            EncodedFlowState::decode("6f1c2a8e-1d8b-4bb5-8a55-2f6c4f1f0f0a"),
            Err(NotEncodedFlow)
        );
        // Valid base64, but not JSON
        assert_eq!(EncodedFlowState::decode("aGVsbG8="), Err(NotEncodedFlow));
    }

    #[test]
    fn test_encoded_flow_uses_camel_case_keys() {
        let json = r#"{"isPullRequest":false,"originalState":"x","redirectUri":"https://a.example.com/cb"}"#;
        let encoded = STANDARD.encode(json);
        let flow = EncodedFlowState::decode(&encoded).unwrap();
        assert!(!flow.is_pull_request);
        assert_eq!(flow.original_state, "x");
    }

    #[test]
    fn test_draft_record() {
        let record = ConcurrencyRecord::draft("Primary_alice", "sid", Duration::hours(1));
        assert_eq!(record.username, "Draft_Primary_alice");
        assert!(record.is_draft());
    }
}
