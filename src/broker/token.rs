//! Token Exchanger
//!
//! Proxies the session provider's token request to the upstream IdP. The
//! request is rewritten to authenticate with a signed client assertion, and a
//! successful response seeds the user's Identity Table record unless a primary
//! session already holds it.

use super::roles::{classify, roles_from_userinfo};
use crate::auth::AssertionSigner;
use crate::config::ProviderConfig;
use crate::error::BrokerError;
use crate::model::{IdentityRecord, IdentityVariant, RoleDetails, TokenMapping};
use crate::store::SessionDirectory;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use std::sync::Arc;

/// Form fields replaced or removed before the request goes upstream
const STRIPPED: [&str; 4] = [
    "client_secret",
    "redirect_uri",
    "client_assertion",
    "client_assertion_type",
];

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

pub struct TokenExchanger {
    signer: AssertionSigner,
    directory: Arc<dyn SessionDirectory>,
    access_role_codes: Vec<String>,
    http: reqwest::Client,
}

impl TokenExchanger {
    pub fn new(
        signer: AssertionSigner,
        directory: Arc<dyn SessionDirectory>,
        access_role_codes: Vec<String>,
    ) -> Self {
        Self {
            signer,
            directory,
            access_role_codes,
            http: reqwest::Client::new(),
        }
    }

    /// Exchange an authorization code upstream and return the upstream JSON
    #[tracing::instrument(name = "broker.token", skip(self, form, variant, provider), fields(variant = variant.as_str()), err)]
    pub async fn exchange(
        &self,
        form: &str,
        variant: IdentityVariant,
        provider: &ProviderConfig,
    ) -> Result<serde_json::Value, BrokerError> {
        let assertion = self
            .signer
            .sign(
                &provider.client_id,
                &provider.token_endpoint,
                &provider.signing_key_ref,
                &provider.signing_key_id,
            )
            .await?;

        let mut params = upstream_form(form, provider);
        params.extend(assertion.form_params().map(|(k, v)| (k.to_string(), v)));

        let response = self
            .http
            .post(&provider.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| BrokerError::Upstream(format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BrokerError::Upstream(format!(
                "token endpoint returned {}",
                status
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BrokerError::Upstream(format!("malformed token response: {}", e)))?;

        let tokens = TokenResponse::deserialize(&body)
            .map_err(|e| BrokerError::Upstream(format!("malformed token response: {}", e)))?;

        match tokens.id_token {
            Some(ref id_token) => self.record_sign_in(id_token, &tokens, variant, provider).await?,
            None => tracing::warn!("Token response has no id_token; identity record not updated"),
        }

        Ok(body)
    }

    async fn record_sign_in(
        &self,
        id_token: &str,
        tokens: &TokenResponse,
        variant: IdentityVariant,
        provider: &ProviderConfig,
    ) -> Result<(), BrokerError> {
        let subject = subject_from_id_token(id_token)?;
        let username = variant.username_for(&subject);

        // The record belongs to the primary session while one is recorded
        let existing = self.directory.get_identity(&username).await?;
        if existing.as_ref().is_some_and(|r| r.session_id.is_some()) {
            tracing::info!("Primary session active; identity record left unchanged");
            return Ok(());
        }
        let previous_role = existing.and_then(|r| r.currently_selected_role);

        let roles = match provider.userinfo_endpoint {
            Some(ref endpoint) => self.fetch_roles(endpoint, &tokens.access_token).await?,
            None => Vec::new(),
        };
        let (with_access, without_access) = classify(roles, &self.access_role_codes);

        let mut record = IdentityRecord::new(username);
        record.currently_selected_role = select_initial_role(previous_role, &with_access);
        record.roles_with_access = with_access;
        record.roles_without_access = without_access;
        record.token_mapping = Some(TokenMapping {
            access_token: tokens.access_token.clone(),
            id_token: Some(id_token.to_string()),
            expires_in: tokens.expires_in,
            last_activity: chrono::Utc::now(),
        });

        self.directory.put_identity(&record).await?;
        tracing::info!(
            roles_with_access = record.roles_with_access.len(),
            "Identity record written"
        );
        Ok(())
    }

    async fn fetch_roles(
        &self,
        endpoint: &str,
        access_token: &str,
    ) -> Result<Vec<RoleDetails>, BrokerError> {
        let response = self
            .http
            .get(endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| BrokerError::Upstream(format!("userinfo request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(BrokerError::Upstream(format!(
                "userinfo endpoint returned {}",
                response.status()
            )));
        }

        let userinfo: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BrokerError::Upstream(format!("malformed userinfo: {}", e)))?;

        roles_from_userinfo(&userinfo)
    }
}

/// Inbound form with credentials and `redirect_uri` replaced
fn upstream_form(form: &str, provider: &ProviderConfig) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url::form_urlencoded::parse(form.as_bytes())
        .into_owned()
        .filter(|(name, _)| !STRIPPED.contains(&name.as_str()))
        .collect();
    params.push((
        "redirect_uri".to_string(),
        provider.upstream_redirect_uri().to_string(),
    ));
    params
}

/// `sub` claim of an ID token received directly from the token endpoint
fn subject_from_id_token(id_token: &str) -> Result<String, BrokerError> {
    let payload = id_token
        .split('.')
        .nth(1)
        .ok_or_else(|| BrokerError::Upstream("id_token is not a JWT".into()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| BrokerError::Upstream(format!("id_token payload: {}", e)))?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| BrokerError::Upstream(format!("id_token payload: {}", e)))?;

    claims
        .get("sub")
        .and_then(|sub| sub.as_str())
        .filter(|sub| !sub.is_empty())
        .map(str::to_string)
        .ok_or_else(|| BrokerError::Upstream("id_token has no sub".into()))
}

/// Keep a still-valid previous selection, or auto-select a sole role
fn select_initial_role(
    previous: Option<RoleDetails>,
    with_access: &[RoleDetails],
) -> Option<RoleDetails> {
    if let Some(previous) = previous {
        if with_access.iter().any(|r| r.role_id == previous.role_id) {
            return Some(previous);
        }
    }
    match with_access {
        [only] => Some(only.clone()),
        _ => None,
    }
}
