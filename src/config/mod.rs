//! Configuration module for the CIS2 broker
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation of every upstream endpoint.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use url::Url;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// # Examples
///
/// ```ignore
/// std::env::set_var("CLIENT_ID", "abc");
/// assert_eq!(expand_env_vars("id-${CLIENT_ID}"), "id-abc");
/// assert_eq!(expand_env_vars("${MISSING:-fallback}"), "fallback");
/// ```
pub(crate) fn expand_env_vars(s: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") {
        Ok(re) => re,
        Err(_) => return s.to_string(),
    };
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name.as_str()) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default. Keep the original placeholder.
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);
    result
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL parses and uses http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    Url::parse(url)
        .map(|u| u.scheme() == "http" || u.scheme() == "https")
        .unwrap_or(false)
}

fn require_url(field: &str, url: &str) -> Result<(), ConfigError> {
    if is_valid_http_url(url) {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "Invalid {}: '{}' must be an http:// or https:// URL",
            field, url
        )))
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub providers: ProvidersConfig,
    pub session_provider: SessionProviderConfig,
    pub tables: TablesConfig,
    /// Enables the mock identity provider and `Mock_` identities.
    #[serde(default)]
    pub mock_mode_enabled: bool,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub lifetimes: LifetimeConfig,
    /// Role codes (the `Rnnnn` suffix of a role code) that grant access.
    /// An empty list grants access to every role.
    #[serde(default)]
    pub access_role_codes: Vec<String>,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.providers.primary.validate("providers.primary")?;

        if let Some(ref mock) = self.providers.mock {
            mock.validate("providers.mock")?;
        } else if self.mock_mode_enabled {
            return Err(ConfigError::ValidationError(
                "mock_mode_enabled requires providers.mock to be configured".into(),
            ));
        }

        require_url(
            "session_provider.idp_response_endpoint",
            &self.session_provider.idp_response_endpoint,
        )?;
        require_url("session_provider.jwks_url", &self.session_provider.jwks_url)?;

        for (name, table) in [
            ("tables.state_table", &self.tables.state_table),
            ("tables.identity_table", &self.tables.identity_table),
            ("tables.concurrency_table", &self.tables.concurrency_table),
        ] {
            if table.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "{} cannot be empty",
                    name
                )));
            }
        }

        if let StorageConfig::DynamoDb {
            endpoint: Some(ref endpoint),
            ..
        } = self.storage
        {
            require_url("storage.endpoint", endpoint)?;
        }

        if self.lifetimes.state_ttl_seconds == 0 || self.lifetimes.assertion_ttl_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "state and assertion lifetimes must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
}

/// Upstream identity providers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub primary: ProviderConfig,
    #[serde(default)]
    pub mock: Option<ProviderConfig>,
}

/// A single upstream OpenID Connect provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub authorize_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    pub client_id: String,
    /// Reference handed to the secret provider to fetch the private key.
    pub signing_key_ref: String,
    /// Key id placed in the client assertion header.
    pub signing_key_id: String,
    /// The broker's own callback endpoint for this provider.
    pub callback_url: String,
    #[serde(default)]
    pub pull_request: Option<PullRequestConfig>,
    /// Callbacks a pull-request state may redirect to, matched on origin and
    /// path prefix. Empty refuses every relay.
    #[serde(default)]
    pub relay_targets: Vec<String>,
}

impl ProviderConfig {
    fn validate(&self, prefix: &str) -> Result<(), ConfigError> {
        require_url(&format!("{}.authorize_endpoint", prefix), &self.authorize_endpoint)?;
        require_url(&format!("{}.token_endpoint", prefix), &self.token_endpoint)?;
        require_url(&format!("{}.callback_url", prefix), &self.callback_url)?;
        if let Some(ref userinfo) = self.userinfo_endpoint {
            require_url(&format!("{}.userinfo_endpoint", prefix), userinfo)?;
        }
        if let Some(ref pr) = self.pull_request {
            require_url(
                &format!("{}.pull_request.relay_callback_url", prefix),
                &pr.relay_callback_url,
            )?;
        }
        for target in &self.relay_targets {
            require_url(&format!("{}.relay_targets", prefix), target)?;
        }
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "{}.client_id cannot be empty",
                prefix
            )));
        }
        if self.signing_key_ref.trim().is_empty() || self.signing_key_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "{} requires signing_key_ref and signing_key_id",
                prefix
            )));
        }
        Ok(())
    }

    /// The `redirect_uri` the upstream provider sees.
    ///
    /// Pull-request environments route the upstream callback through the
    /// shared relay instead of their own callback.
    pub fn upstream_redirect_uri(&self) -> &str {
        match self.pull_request {
            Some(ref pr) => &pr.relay_callback_url,
            None => &self.callback_url,
        }
    }
}

/// Pull-request environment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestConfig {
    /// Callback of the shared environment registered with the upstream IdP.
    pub relay_callback_url: String,
}

/// Managed session provider (Cognito user pool)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionProviderConfig {
    /// Endpoint receiving the code after the upstream round-trip.
    pub idp_response_endpoint: String,
    /// JWKS of the user pool, used to verify session tokens.
    pub jwks_url: String,
    /// Expected `iss` of session tokens.
    #[serde(default)]
    pub issuer: Option<String>,
    /// How long fetched JWKS keys are cached.
    #[serde(default = "default_jwks_cache_ttl")]
    pub jwks_cache_ttl_seconds: u64,
}

/// Durable table identifiers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablesConfig {
    pub state_table: String,
    pub identity_table: String,
    pub concurrency_table: String,
}

/// Key-value storage backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    #[default]
    #[serde(rename = "memory")]
    Memory,
    #[serde(rename = "dynamodb")]
    DynamoDb {
        region: String,
        #[serde(default)]
        endpoint: Option<String>,
    },
}

/// Secret provider backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SecretsConfig {
    #[serde(rename = "static")]
    Static {
        #[serde(default)]
        values: HashMap<String, String>,
    },
    #[serde(rename = "aws")]
    Aws {
        region: String,
        #[serde(default)]
        endpoint: Option<String>,
    },
}

impl Default for SecretsConfig {
    fn default() -> Self {
        SecretsConfig::Static {
            values: HashMap::new(),
        }
    }
}

/// Lifetimes of the short-lived artefacts the broker creates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifetimeConfig {
    #[serde(default = "default_state_ttl")]
    pub state_ttl_seconds: u64,
    #[serde(default = "default_assertion_ttl")]
    pub assertion_ttl_seconds: u64,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: u64,
}

impl Default for LifetimeConfig {
    fn default() -> Self {
        Self {
            state_ttl_seconds: default_state_ttl(),
            assertion_ttl_seconds: default_assertion_ttl(),
            session_ttl_seconds: default_session_ttl(),
        }
    }
}

fn default_state_ttl() -> u64 {
    600
}

fn default_assertion_ttl() -> u64 {
    300
}

fn default_jwks_cache_ttl() -> u64 {
    3600
}

fn default_session_ttl() -> u64 {
    43200 // 12 hours
}
