//! Federation flows
//!
//! The [`Broker`] wires every flow component to its collaborators once at
//! startup. Each component is also usable on its own.
//!
//! ```text
//! /authorize ──► AuthorizationRedirector ──► upstream IdP
//!                                                  │
//! /callback  ◄─────────────────────────────────────┘
//!     │  CallbackResolver
//!     ├─ PullRequestRedirect ──► PR environment /callback
//!     └─ Standard ──► session provider ──► /token (TokenExchanger)
//!                                            │
//!          /triggers/pre-token-generation ◄──┘ (SessionIdentityIssuer)
//! ```

use crate::auth::AssertionSigner;
use crate::config::{Config, ProviderConfig};
use crate::error::BrokerError;
use crate::model::IdentityVariant;
use crate::secrets::SecretProvider;
use crate::store::Stores;
use std::sync::Arc;

pub mod authorize;
pub mod callback;
pub mod concurrency;
pub mod logout;
pub mod roles;
pub mod session;
pub mod token;

pub use authorize::AuthorizationRedirector;
pub use callback::{CallbackOutcome, CallbackParams, CallbackResolver};
pub use concurrency::{SessionStatus, SessionTracker};
pub use logout::{LogoutReconciler, LogoutRequest, PurgeReport};
pub use roles::RoleSelector;
pub use session::{PreTokenGenerationEvent, SessionIdentityIssuer};
pub use token::TokenExchanger;

/// A `302 Found` to `location`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub location: String,
}

impl Redirect {
    pub fn to(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }
}

/// Refuses mock identities unless mock mode is enabled
#[derive(Debug, Clone, Copy)]
pub struct MockGate {
    enabled: bool,
}

impl MockGate {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Variant of `username`, or `MockModeDisabled` for a refused mock identity
    pub fn check(&self, username: &str) -> Result<IdentityVariant, BrokerError> {
        let variant = IdentityVariant::of_username(username);
        if variant == IdentityVariant::Mock && !self.enabled {
            tracing::error!(
                username = %username,
                "Mock identity presented while mock mode is disabled"
            );
            return Err(BrokerError::MockModeDisabled);
        }
        Ok(variant)
    }
}

/// All flow components sharing one set of collaborators
pub struct Broker {
    config: Arc<Config>,
    gate: MockGate,
    pub redirector: AuthorizationRedirector,
    pub callbacks: CallbackResolver,
    pub exchanger: TokenExchanger,
    pub issuer: SessionIdentityIssuer,
    pub sessions: SessionTracker,
    pub logout: LogoutReconciler,
    pub roles: RoleSelector,
}

impl Broker {
    pub fn new(config: Arc<Config>, stores: Stores, secrets: Arc<dyn SecretProvider>) -> Self {
        let lifetimes = &config.lifetimes;
        let state_ttl = chrono::Duration::seconds(lifetimes.state_ttl_seconds as i64);
        let assertion_ttl = chrono::Duration::seconds(lifetimes.assertion_ttl_seconds as i64);
        let session_ttl = chrono::Duration::seconds(lifetimes.session_ttl_seconds as i64);
        let gate = MockGate::new(config.mock_mode_enabled);

        let signer = AssertionSigner::new(secrets, assertion_ttl);

        Self {
            redirector: AuthorizationRedirector::new(stores.state.clone(), state_ttl),
            callbacks: CallbackResolver::new(
                stores.state.clone(),
                &config.session_provider.idp_response_endpoint,
            ),
            exchanger: TokenExchanger::new(
                signer,
                stores.directory.clone(),
                config.access_role_codes.clone(),
            ),
            issuer: SessionIdentityIssuer::new(stores.directory.clone(), gate, session_ttl),
            sessions: SessionTracker::new(stores.directory.clone(), session_ttl),
            logout: LogoutReconciler::new(stores.directory.clone(), gate),
            roles: RoleSelector::new(stores.directory),
            gate,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn gate(&self) -> MockGate {
        self.gate
    }

    /// Provider configuration for `variant`
    ///
    /// The mock provider is only reachable when mock mode is enabled.
    pub fn provider(&self, variant: IdentityVariant) -> Result<&ProviderConfig, BrokerError> {
        match variant {
            IdentityVariant::Primary => Ok(&self.config.providers.primary),
            IdentityVariant::Mock => {
                if !self.gate.enabled() {
                    tracing::error!("Mock flow requested while mock mode is disabled");
                    return Err(BrokerError::MockModeDisabled);
                }
                self.config
                    .providers
                    .mock
                    .as_ref()
                    .ok_or(BrokerError::MockModeDisabled)
            }
        }
    }

    /// Authorization Redirector for `variant`
    pub async fn authorize(
        &self,
        variant: IdentityVariant,
        query: Option<&str>,
    ) -> Result<Redirect, BrokerError> {
        let provider = self.provider(variant)?;
        self.redirector.redirect(query, provider).await
    }

    /// Callback Resolver for `variant`
    pub async fn callback(
        &self,
        variant: IdentityVariant,
        query: Option<&str>,
    ) -> Result<CallbackOutcome, BrokerError> {
        let provider = self.provider(variant)?;
        let params = CallbackParams::from_query(query);
        self.callbacks.resolve(&params, provider).await
    }

    /// Token Exchanger for `variant`
    pub async fn token(
        &self,
        variant: IdentityVariant,
        form: &str,
    ) -> Result<serde_json::Value, BrokerError> {
        let provider = self.provider(variant)?;
        self.exchanger.exchange(form, variant, provider).await
    }
}
