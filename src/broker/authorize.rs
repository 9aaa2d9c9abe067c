//! Authorization Redirector
//!
//! Rewrites the session provider's authorization request toward the upstream
//! IdP, swapping the session provider's `state` for a broker-minted token.

use super::Redirect;
use crate::config::ProviderConfig;
use crate::error::BrokerError;
use crate::model::{EncodedFlowState, StateMapping};
use crate::store::StateStore;
use std::sync::Arc;
use url::Url;

/// Parameters the redirector always sets itself
const OVERRIDDEN: [&str; 2] = ["redirect_uri", "prompt"];

pub struct AuthorizationRedirector {
    state_store: Arc<dyn StateStore>,
    state_ttl: chrono::Duration,
}

impl AuthorizationRedirector {
    pub fn new(state_store: Arc<dyn StateStore>, state_ttl: chrono::Duration) -> Self {
        Self {
            state_store,
            state_ttl,
        }
    }

    /// Build the upstream authorize redirect for an inbound query string.
    ///
    /// Every inbound parameter is forwarded except `redirect_uri` and
    /// `prompt`, which become the broker callback and `login`. An inbound
    /// `state` is replaced by a freshly minted token whose mapping is stored
    /// before the redirect is returned.
    #[tracing::instrument(name = "broker.authorize", skip_all, err)]
    pub async fn redirect(
        &self,
        query: Option<&str>,
        provider: &ProviderConfig,
    ) -> Result<Redirect, BrokerError> {
        let params: Vec<(String, String)> = query
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();

        if params.is_empty() {
            return Err(BrokerError::MissingParameters(
                "authorize request has no query parameters".into(),
            ));
        }

        let mut upstream = Url::parse(&provider.authorize_endpoint)
            .map_err(|e| BrokerError::Upstream(format!("invalid authorize endpoint: {}", e)))?;

        let mut forwarded = Vec::with_capacity(params.len() + OVERRIDDEN.len());
        let mut saw_state = false;
        for (name, value) in params {
            if OVERRIDDEN.contains(&name.as_str()) {
                continue;
            }
            if name == "state" {
                saw_state = true;
                let minted = self.mint_state(&value, provider).await?;
                forwarded.push((name, minted));
            } else {
                forwarded.push((name, value));
            }
        }

        if !saw_state {
            tracing::warn!("Authorize request carries no state; forwarding without mapping");
        }

        forwarded.push((
            "redirect_uri".to_string(),
            provider.upstream_redirect_uri().to_string(),
        ));
        forwarded.push(("prompt".to_string(), "login".to_string()));

        upstream.query_pairs_mut().extend_pairs(forwarded);

        Ok(Redirect::to(upstream))
    }

    /// Store a mapping for `cognito_state` and return the value to send upstream
    async fn mint_state(
        &self,
        cognito_state: &str,
        provider: &ProviderConfig,
    ) -> Result<String, BrokerError> {
        let minted = uuid::Uuid::new_v4().to_string();
        let mapping = StateMapping::new(minted.clone(), cognito_state, self.state_ttl);
        self.state_store.put(&mapping).await?;

        if provider.pull_request.is_some() {
            let flow = EncodedFlowState {
                is_pull_request: true,
                original_state: minted,
                redirect_uri: provider.callback_url.clone(),
            };
            return Ok(flow.encode());
        }

        Ok(minted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::provider;
    use crate::config::PullRequestConfig;
    use crate::store::{MemoryStore, MockStateStore, StoreError};
    use std::collections::HashMap;

    fn query_of(redirect: &Redirect) -> HashMap<String, String> {
        Url::parse(&redirect.location)
            .unwrap()
            .query_pairs()
            .into_owned()
            .collect()
    }

    fn redirector(store: Arc<dyn StateStore>) -> AuthorizationRedirector {
        AuthorizationRedirector::new(store, chrono::Duration::minutes(10))
    }

    #[tokio::test]
    async fn test_redirect_replaces_state_and_overrides() {
        let store = Arc::new(MemoryStore::new());
        let redirector = redirector(store.clone());
        let provider = provider("https://cis2.example.com");

        let redirect = redirector
            .redirect(
                Some("client_id=pool&state=cognito-state&scope=openid&redirect_uri=https%3A%2F%2Fevil.example.com&prompt=none"),
                &provider,
            )
            .await
            .unwrap();

        assert!(redirect
            .location
            .starts_with("https://cis2.example.com/authorize?"));
        let query = query_of(&redirect);
        assert_eq!(query["client_id"], "pool");
        assert_eq!(query["scope"], "openid");
        assert_eq!(query["redirect_uri"], "https://broker.example.com/callback");
        assert_eq!(query["prompt"], "login");

        let minted = &query["state"];
        assert_ne!(minted, "cognito-state");
        let mapping = store.get(minted).await.unwrap();
        assert_eq!(mapping.cognito_state, "cognito-state");
        assert!(!mapping.is_expired(chrono::Utc::now()));
    }

    #[tokio::test]
    async fn test_missing_query_is_fatal() {
        let redirector = redirector(Arc::new(MemoryStore::new()));
        let provider = provider("https://cis2.example.com");

        for query in [None, Some("")] {
            let err = redirector.redirect(query, &provider).await.unwrap_err();
            assert!(matches!(err, BrokerError::MissingParameters(_)));
        }
    }

    #[tokio::test]
    async fn test_pull_request_encodes_state_and_uses_relay() {
        let store = Arc::new(MemoryStore::new());
        let redirector = redirector(store.clone());
        let mut provider = provider("https://cis2.example.com");
        provider.callback_url = "https://pr-42.example.com/callback".into();
        provider.pull_request = Some(PullRequestConfig {
            relay_callback_url: "https://main.example.com/callback".into(),
        });

        let redirect = redirector
            .redirect(Some("state=cognito-state"), &provider)
            .await
            .unwrap();
        let query = query_of(&redirect);
        assert_eq!(query["redirect_uri"], "https://main.example.com/callback");

        let flow = EncodedFlowState::decode(&query["state"]).unwrap();
        assert!(flow.is_pull_request);
        assert_eq!(flow.redirect_uri, "https://pr-42.example.com/callback");
        assert_eq!(
            store.get(&flow.original_state).await.unwrap().cognito_state,
            "cognito-state"
        );
    }

    #[tokio::test]
    async fn test_store_failure_aborts_redirect() {
        let mut store = MockStateStore::new();
        store
            .expect_put()
            .returning(|_| Err(StoreError::Backend("unavailable".into())));

        let err = redirector(Arc::new(store))
            .redirect(Some("state=s"), &provider("https://cis2.example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Persistence(_)));
    }
}
