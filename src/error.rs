//! Broker error kinds and their mapping onto HTTP responses.
//!
//! Every fatal error on a user-facing path reaches the client as the same
//! opaque system error; only the log says which step failed.

use crate::auth::AuthError;
use crate::store::StoreError;
use hyper::StatusCode;
use thiserror::Error;

/// Body returned for every server-side failure.
pub const SYSTEM_ERROR_BODY: &str = r#"{"message":"A system error has occurred"}"#;

/// Errors raised by the broker components
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Missing request parameters: {0}")]
    MissingParameters(String),

    #[error("Callback is missing state or code")]
    MissingCallbackParameters,

    #[error("State not found")]
    StateNotFound,

    #[error("Mock identity rejected: mock mode is disabled")]
    MockModeDisabled,

    #[error("Failed to retrieve signing key: {0}")]
    KeyRetrieval(String),

    #[error("Failed to sign client assertion: {0}")]
    Signing(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(#[from] AuthError),

    #[error("Role not available to user: {0}")]
    InvalidRole(String),

    #[error("Redirect target not allowed: {0}")]
    UntrustedRedirect(String),

    #[error("Upstream error: {0}")]
    Upstream(String),
}

impl BrokerError {
    /// Status code presented to the caller
    pub fn status_code(&self) -> StatusCode {
        match self {
            BrokerError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::MissingParameters(_) => "missing_parameters",
            BrokerError::MissingCallbackParameters => "missing_callback_parameters",
            BrokerError::StateNotFound => "state_not_found",
            BrokerError::MockModeDisabled => "mock_mode_disabled",
            BrokerError::KeyRetrieval(_) => "key_retrieval",
            BrokerError::Signing(_) => "signing",
            BrokerError::Persistence(_) => "persistence",
            BrokerError::Unauthenticated(_) => "unauthenticated",
            BrokerError::InvalidRole(_) => "invalid_role",
            BrokerError::UntrustedRedirect(_) => "untrusted_redirect",
            BrokerError::Upstream(_) => "upstream",
        }
    }
}

impl From<StoreError> for BrokerError {
    fn from(err: StoreError) -> Self {
        BrokerError::Persistence(err.to_string())
    }
}
