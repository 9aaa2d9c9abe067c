//! AWS Secrets Manager secret provider.

use super::{SecretError, SecretProvider};
use async_trait::async_trait;

/// Secret provider that reads from AWS Secrets Manager.
#[derive(Debug, Clone)]
pub struct AwsSecretsManager {
    client: aws_sdk_secretsmanager::Client,
    region: String,
}

impl AwsSecretsManager {
    /// Create a client for `region`, optionally against a custom endpoint
    pub async fn new(region: &str, endpoint: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()));
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        tracing::info!(region = %region, "AWS Secrets Manager provider initialized");

        Self {
            client: aws_sdk_secretsmanager::Client::new(&sdk_config),
            region: region.to_string(),
        }
    }
}

#[async_trait]
impl SecretProvider for AwsSecretsManager {
    #[tracing::instrument(name = "secrets.get", skip(self), err)]
    async fn get_secret(&self, reference: &str) -> Result<String, SecretError> {
        let result = self
            .client
            .get_secret_value()
            .secret_id(reference)
            .send()
            .await
            .map_err(|e| {
                SecretError::Unavailable(format!(
                    "Failed to get secret '{}' (region: {}): {}",
                    reference,
                    self.region,
                    aws_sdk_secretsmanager::error::DisplayErrorContext(&e)
                ))
            })?;

        match result.secret_string() {
            Some(value) if !value.is_empty() => Ok(value.to_string()),
            _ => Err(SecretError::InvalidValue(reference.to_string())),
        }
    }
}
