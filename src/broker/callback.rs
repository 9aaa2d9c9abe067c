//! Callback Resolver
//!
//! Handles the upstream IdP's redirect back to the broker. A state that
//! decodes as an [`EncodedFlowState`] belongs to a pull-request environment and
//! is bounced there untouched; any other state is resolved through the State
//! Store and the browser continues to the session provider.

use super::Redirect;
use crate::config::ProviderConfig;
use crate::error::BrokerError;
use crate::model::EncodedFlowState;
use crate::store::{StateStore, StoreError};
use std::sync::Arc;
use url::Url;

/// Query parameters of an upstream callback
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub state: Option<String>,
    pub code: Option<String>,
    pub session_state: Option<String>,
    pub iss: Option<String>,
}

impl CallbackParams {
    pub fn from_query(query: Option<&str>) -> Self {
        let mut params = Self::default();
        let Some(query) = query else {
            return params;
        };
        for (name, value) in url::form_urlencoded::parse(query.as_bytes()).into_owned() {
            let slot = match name.as_str() {
                "state" => &mut params.state,
                "code" => &mut params.code,
                "session_state" => &mut params.session_state,
                "iss" => &mut params.iss,
                _ => continue,
            };
            if !value.is_empty() {
                *slot = Some(value);
            }
        }
        params
    }
}

/// Where a resolved callback sends the browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Back to the pull-request environment that started the flow
    PullRequestRedirect(Redirect),
    /// On to the session provider's IdP response endpoint
    Standard(Redirect),
}

impl CallbackOutcome {
    pub fn redirect(&self) -> &Redirect {
        match self {
            CallbackOutcome::PullRequestRedirect(r) | CallbackOutcome::Standard(r) => r,
        }
    }

    pub fn is_pull_request(&self) -> bool {
        matches!(self, CallbackOutcome::PullRequestRedirect(_))
    }
}

pub struct CallbackResolver {
    state_store: Arc<dyn StateStore>,
    idp_response_endpoint: String,
}

impl CallbackResolver {
    pub fn new(state_store: Arc<dyn StateStore>, idp_response_endpoint: &str) -> Self {
        Self {
            state_store,
            idp_response_endpoint: idp_response_endpoint.to_string(),
        }
    }

    #[tracing::instrument(name = "broker.callback", skip_all, err)]
    pub async fn resolve(
        &self,
        params: &CallbackParams,
        provider: &ProviderConfig,
    ) -> Result<CallbackOutcome, BrokerError> {
        let (Some(state), Some(code)) = (params.state.as_deref(), params.code.as_deref()) else {
            return Err(BrokerError::MissingCallbackParameters);
        };

        match EncodedFlowState::decode(state) {
            Ok(flow) if flow.is_pull_request => {
                let redirect = relay(&flow, code, params.session_state.as_deref(), provider)?;
                tracing::info!(target_uri = %flow.redirect_uri, "Relaying callback to pull-request environment");
                Ok(CallbackOutcome::PullRequestRedirect(redirect))
            }
            _ => self
                .standard(state, code, params.iss.as_deref(), provider)
                .await
                .map(CallbackOutcome::Standard),
        }
    }

    async fn standard(
        &self,
        state: &str,
        code: &str,
        iss: Option<&str>,
        provider: &ProviderConfig,
    ) -> Result<Redirect, BrokerError> {
        let mapping = match self.state_store.get(state).await {
            Ok(mapping) => mapping,
            Err(StoreError::NotFound(_)) => return Err(BrokerError::StateNotFound),
            Err(e) => return Err(e.into()),
        };

        // Single use: consumed before the redirect leaves the broker.
        self.state_store.delete(state).await?;

        if mapping.is_expired(chrono::Utc::now()) {
            tracing::warn!("Callback state has expired");
            return Err(BrokerError::StateNotFound);
        }

        let mut target = Url::parse(&self.idp_response_endpoint)
            .map_err(|e| BrokerError::Upstream(format!("invalid IdP response endpoint: {}", e)))?;
        {
            let mut query = target.query_pairs_mut();
            query.append_pair("code", code);
            if let Some(iss) = iss {
                query.append_pair("iss", iss);
            }
            query.append_pair("state", &mapping.cognito_state);
            query.append_pair("client_id", &provider.client_id);
        }

        Ok(Redirect::to(target))
    }
}

fn relay(
    flow: &EncodedFlowState,
    code: &str,
    session_state: Option<&str>,
    provider: &ProviderConfig,
) -> Result<Redirect, BrokerError> {
    let untrusted = || BrokerError::UntrustedRedirect(flow.redirect_uri.clone());

    let mut target = Url::parse(&flow.redirect_uri).map_err(|_| untrusted())?;
    if !provider
        .relay_targets
        .iter()
        .any(|allowed| is_allowed_target(&target, allowed))
    {
        tracing::error!(target_uri = %flow.redirect_uri, "Refusing relay to unlisted target");
        return Err(untrusted());
    }

    {
        let mut query = target.query_pairs_mut();
        query.append_pair("state", &flow.original_state);
        if let Some(session_state) = session_state {
            query.append_pair("session_state", session_state);
        }
        query.append_pair("code", code);
    }

    Ok(Redirect::to(target))
}

/// Same origin as `allowed`, with a path under `allowed`'s path
fn is_allowed_target(target: &Url, allowed: &str) -> bool {
    let Ok(allowed) = Url::parse(allowed) else {
        return false;
    };
    if target.origin() != allowed.origin() || !target.username().is_empty() {
        return false;
    }

    let prefix = allowed.path();
    let path = target.path();
    prefix == "/"
        || path == prefix
        || path
            .strip_prefix(prefix.trim_end_matches('/'))
            .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::provider;
    use crate::model::StateMapping;
    use crate::store::{MemoryStore, MockStateStore};
    use std::collections::HashMap;

    const IDP_RESPONSE: &str = "https://pool.example.com/oauth2/idpresponse";

    fn query_of(redirect: &Redirect) -> HashMap<String, String> {
        Url::parse(&redirect.location)
            .unwrap()
            .query_pairs()
            .into_owned()
            .collect()
    }

    fn params(state: &str, code: &str) -> CallbackParams {
        CallbackParams {
            state: Some(state.into()),
            code: Some(code.into()),
            session_state: Some("ss".into()),
            iss: Some("https://cis2.example.com".into()),
        }
    }

    #[test]
    fn test_params_from_query() {
        let params = CallbackParams::from_query(Some("state=a&code=b&session_state=c&other=d"));
        assert_eq!(params.state.as_deref(), Some("a"));
        assert_eq!(params.code.as_deref(), Some("b"));
        assert_eq!(params.session_state.as_deref(), Some("c"));
        assert_eq!(params.iss, None);

        assert_eq!(
            CallbackParams::from_query(Some("state=&code=b")).state,
            None
        );
        assert_eq!(CallbackParams::from_query(None), CallbackParams::default());
    }

    #[tokio::test]
    async fn test_standard_callback_resolves_and_consumes_state() {
        let store = Arc::new(MemoryStore::new());
        store
            .put(&StateMapping::new(
                "local",
                "cognito-state",
                chrono::Duration::minutes(10),
            ))
            .await
            .unwrap();
        let resolver = CallbackResolver::new(store.clone(), IDP_RESPONSE);
        let provider = provider("https://cis2.example.com");

        let outcome = resolver
            .resolve(&params("local", "auth-code"), &provider)
            .await
            .unwrap();
        assert!(!outcome.is_pull_request());
        assert!(outcome.redirect().location.starts_with(IDP_RESPONSE));

        let query = query_of(outcome.redirect());
        assert_eq!(query["code"], "auth-code");
        assert_eq!(query["state"], "cognito-state");
        assert_eq!(query["client_id"], "broker-client");
        assert_eq!(query["iss"], "https://cis2.example.com");

        // Replaying the same state fails
        let err = resolver
            .resolve(&params("local", "auth-code"), &provider)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::StateNotFound));
    }

    #[tokio::test]
    async fn test_expired_state_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        store
            .put(&StateMapping::new(
                "local",
                "cognito-state",
                chrono::Duration::seconds(-1),
            ))
            .await
            .unwrap();
        let resolver = CallbackResolver::new(store, IDP_RESPONSE);

        let err = resolver
            .resolve(&params("local", "code"), &provider("https://cis2.example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::StateNotFound));
    }

    #[tokio::test]
    async fn test_missing_code_does_not_touch_store() {
        let mut store = MockStateStore::new();
        store.expect_get().never();
        store.expect_delete().never();
        let resolver = CallbackResolver::new(Arc::new(store), IDP_RESPONSE);

        let params = CallbackParams {
            state: Some("local".into()),
            ..Default::default()
        };
        let err = resolver
            .resolve(&params, &provider("https://cis2.example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::MissingCallbackParameters));
    }

    fn relay_provider() -> ProviderConfig {
        let mut provider = provider("https://cis2.example.com");
        provider.relay_targets = vec!["https://pr-42.example.com/callback".into()];
        provider
    }

    fn forged_flow(redirect_uri: &str) -> String {
        EncodedFlowState {
            is_pull_request: true,
            original_state: "s".into(),
            redirect_uri: redirect_uri.into(),
        }
        .encode()
    }

    #[tokio::test]
    async fn test_pull_request_state_is_relayed_without_lookup() {
        let mut store = MockStateStore::new();
        store.expect_get().never();
        let resolver = CallbackResolver::new(Arc::new(store), IDP_RESPONSE);

        let flow = EncodedFlowState {
            is_pull_request: true,
            original_state: "pr-state".into(),
            redirect_uri: "https://pr-42.example.com/callback".into(),
        };
        let outcome = resolver
            .resolve(&params(&flow.encode(), "auth-code"), &relay_provider())
            .await
            .unwrap();

        assert!(outcome.is_pull_request());
        assert!(outcome
            .redirect()
            .location
            .starts_with("https://pr-42.example.com/callback?"));
        let query = query_of(outcome.redirect());
        assert_eq!(query["state"], "pr-state");
        assert_eq!(query["code"], "auth-code");
        assert_eq!(query["session_state"], "ss");
    }

    #[tokio::test]
    async fn test_relay_refused_without_relay_targets() {
        let mut store = MockStateStore::new();
        store.expect_get().never();
        let resolver = CallbackResolver::new(Arc::new(store), IDP_RESPONSE);

        for target in [
            "https://attacker.example.net/steal",
            "https://pr-42.example.com/callback",
        ] {
            let err = resolver
                .resolve(
                    &params(&forged_flow(target), "victim-code"),
                    &provider("https://cis2.example.com"),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, BrokerError::UntrustedRedirect(_)));
        }
    }

    #[tokio::test]
    async fn test_relay_targets_match_origin_and_path() {
        let resolver = CallbackResolver::new(Arc::new(MemoryStore::new()), IDP_RESPONSE);
        let provider = relay_provider();

        for target in [
            "https://evil.example.com/callback",
            "https://pr-42.example.com.attacker.net/callback",
            "https://pr-420.example.com/callback",
            "http://pr-42.example.com/callback",
            "https://pr-42.example.com:8443/callback",
            "https://pr-42.example.com/callback-evil",
            "https://pr-42.example.com/other",
            "https://user@pr-42.example.com/callback",
        ] {
            let err = resolver
                .resolve(&params(&forged_flow(target), "c"), &provider)
                .await
                .unwrap_err();
            assert!(
                matches!(err, BrokerError::UntrustedRedirect(_)),
                "{} should be refused",
                target
            );
        }

        let outcome = resolver
            .resolve(
                &params(&forged_flow("https://pr-42.example.com/callback/"), "c"),
                &provider,
            )
            .await
            .unwrap();
        assert!(outcome.is_pull_request());
    }

    #[test]
    fn test_allowed_target_origin_only() {
        let target = Url::parse("https://pr-7.example.com/any/path").unwrap();
        assert!(is_allowed_target(&target, "https://pr-7.example.com"));
        assert!(!is_allowed_target(&target, "https://pr-"));
        assert!(!is_allowed_target(&target, "not a url"));
    }

    #[tokio::test]
    async fn test_non_pull_request_flow_takes_standard_path() {
        let flow = EncodedFlowState {
            is_pull_request: false,
            original_state: "s".into(),
            redirect_uri: "https://pr-42.example.com/callback".into(),
        };
        let encoded = flow.encode();

        let mut store = MockStateStore::new();
        let expected = encoded.clone();
        store
            .expect_get()
            .withf(move |state| state == expected)
            .times(1)
            .returning(|_| Err(StoreError::NotFound("state".into())));
        let resolver = CallbackResolver::new(Arc::new(store), IDP_RESPONSE);

        let err = resolver
            .resolve(&params(&encoded, "c"), &provider("https://cis2.example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::StateNotFound));
    }
}
