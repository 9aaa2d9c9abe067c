//! Session Identity Issuer
//!
//! Runs as the session provider's pre-token-generation trigger. Every token
//! mint gets a fresh session id, recorded as a draft concurrency entry before
//! the id is handed back as a claim override.

use super::MockGate;
use crate::error::BrokerError;
use crate::model::ConcurrencyRecord;
use crate::store::SessionDirectory;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Claim the session id is published under
pub const SESSION_ID_CLAIM: &str = "session_id";

/// Pre-token-generation trigger event
///
/// Fields other than `userName` and `response` are carried through unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreTokenGenerationEvent {
    pub user_name: String,
    #[serde(default)]
    pub response: PreTokenGenerationResponse,
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreTokenGenerationResponse {
    #[serde(default)]
    pub claims_override_details: Option<ClaimsOverrideDetails>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimsOverrideDetails {
    #[serde(default)]
    pub claims_to_add_or_override: HashMap<String, String>,
}

impl PreTokenGenerationEvent {
    /// Session id set by a previous [`SessionIdentityIssuer::issue`]
    pub fn session_id(&self) -> Option<&str> {
        self.response
            .claims_override_details
            .as_ref()
            .and_then(|d| d.claims_to_add_or_override.get(SESSION_ID_CLAIM))
            .map(String::as_str)
    }
}

pub struct SessionIdentityIssuer {
    directory: Arc<dyn SessionDirectory>,
    gate: MockGate,
    session_ttl: chrono::Duration,
}

impl SessionIdentityIssuer {
    pub fn new(
        directory: Arc<dyn SessionDirectory>,
        gate: MockGate,
        session_ttl: chrono::Duration,
    ) -> Self {
        Self {
            directory,
            gate,
            session_ttl,
        }
    }

    /// Mint a session id for the user in `event`
    ///
    /// The draft record is written before the event is returned; a failed
    /// write fails the sign-in.
    #[tracing::instrument(name = "broker.issue_session", skip_all, err)]
    pub async fn issue(
        &self,
        mut event: PreTokenGenerationEvent,
    ) -> Result<PreTokenGenerationEvent, BrokerError> {
        self.gate.check(&event.user_name)?;

        let session_id = uuid::Uuid::new_v4().to_string();
        let draft = ConcurrencyRecord::draft(&event.user_name, &session_id, self.session_ttl);
        self.directory.put_session(&draft).await?;

        let details = event
            .response
            .claims_override_details
            .get_or_insert_with(ClaimsOverrideDetails::default);
        details
            .claims_to_add_or_override
            .insert(SESSION_ID_CLAIM.to_string(), session_id);

        tracing::info!("Session identity issued");
        Ok(event)
    }
}
