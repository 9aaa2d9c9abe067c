//! Secret provider
//!
//! Resolves a secret reference (such as the client assertion signing key) to
//! its value using a trait-based design.
//!
//! # Implementations
//!
//! - `StaticSecrets` - Secrets from configuration (values may use `${VAR}`)
//! - `AwsSecretsManager` - Secrets fetched from AWS Secrets Manager
//!
//! # Example
//!
//! ```
//! use cis2_broker::secrets::{SecretProvider, StaticSecrets};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = StaticSecrets::new().with_secret("signing-key", "-----BEGIN ...");
//! let value = provider.get_secret("signing-key").await?;
//! assert!(value.starts_with("-----BEGIN"));
//! # Ok(())
//! # }
//! ```

use crate::config::SecretsConfig;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub mod aws;

pub use aws::AwsSecretsManager;

/// Secret lookup errors
#[derive(Error, Debug)]
pub enum SecretError {
    #[error("Secret not found: {0}")]
    NotFound(String),

    #[error("Secret provider unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid secret value for {0}")]
    InvalidValue(String),
}

/// Trait for secret providers
///
/// Every call goes to the backing provider; implementations do not cache.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Fetch the secret stored under `reference`
    async fn get_secret(&self, reference: &str) -> Result<String, SecretError>;
}

/// Static secret provider
///
/// Holds secrets directly. Useful for tests and local development.
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    values: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_secret(mut self, reference: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(reference.into(), value.into());
        self
    }
}

impl From<HashMap<String, String>> for StaticSecrets {
    fn from(values: HashMap<String, String>) -> Self {
        Self { values }
    }
}

#[async_trait]
impl SecretProvider for StaticSecrets {
    async fn get_secret(&self, reference: &str) -> Result<String, SecretError> {
        let value = self
            .values
            .get(reference)
            .ok_or_else(|| SecretError::NotFound(reference.to_string()))?;

        if value.is_empty() {
            return Err(SecretError::InvalidValue(reference.to_string()));
        }

        Ok(value.clone())
    }
}

/// Build the provider selected by configuration
pub async fn from_config(config: &SecretsConfig) -> Arc<dyn SecretProvider> {
    match config {
        SecretsConfig::Static { values } => Arc::new(StaticSecrets::from(values.clone())),
        SecretsConfig::Aws { region, endpoint } => {
            Arc::new(AwsSecretsManager::new(region, endpoint.as_deref()).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_secret_found() {
        let provider = StaticSecrets::new().with_secret("key", "value");
        assert_eq!(provider.get_secret("key").await.unwrap(), "value");
    }

    #[tokio::test]
    async fn test_static_secret_missing() {
        let provider = StaticSecrets::new();
        assert!(matches!(
            provider.get_secret("key").await,
            Err(SecretError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_static_secret_empty_is_invalid() {
        let provider = StaticSecrets::new().with_secret("key", "");
        assert!(matches!(
            provider.get_secret("key").await,
            Err(SecretError::InvalidValue(_))
        ));
    }
}
