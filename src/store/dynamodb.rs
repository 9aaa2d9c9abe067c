//! DynamoDB backend.
//!
//! Table layouts:
//!
//! | Table | Key | Attributes |
//! |-------|-----|------------|
//! | state | `State` | `CognitoState`, `ExpiryTime` |
//! | identity | `Username` | `SessionId`, `RolesWithAccess`, `RolesWithoutAccess`, `CurrentlySelectedRole`, `TokenMapping` |
//! | concurrency | `Username` + `SessionId` | `CreatedAt`, `ExpiryTime` |
//!
//! `ExpiryTime` is epoch seconds so it can double as the table TTL attribute.
//! Nested structures are stored as JSON strings.

use super::{SessionDirectory, StateStore, StoreError};
use crate::config::TablesConfig;
use crate::model::{ConcurrencyRecord, IdentityRecord, StateMapping};
use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::AttributeValue;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;

type Item = HashMap<String, AttributeValue>;

/// DynamoDB-backed store
#[derive(Debug, Clone)]
pub struct DynamoDbStore {
    client: aws_sdk_dynamodb::Client,
    tables: TablesConfig,
}

impl DynamoDbStore {
    /// Connect to DynamoDB in `region`, optionally against a custom endpoint
    pub async fn connect(region: &str, endpoint: Option<&str>, tables: &TablesConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()));
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        tracing::info!(
            region = %region,
            state_table = %tables.state_table,
            identity_table = %tables.identity_table,
            concurrency_table = %tables.concurrency_table,
            "DynamoDB store initialized"
        );

        Self::with_client(aws_sdk_dynamodb::Client::new(&sdk_config), tables)
    }

    pub fn with_client(client: aws_sdk_dynamodb::Client, tables: &TablesConfig) -> Self {
        Self {
            client,
            tables: tables.clone(),
        }
    }
}

fn backend<E>(operation: &str, err: E) -> StoreError
where
    E: std::error::Error,
{
    StoreError::Backend(format!("{} failed: {}", operation, DisplayErrorContext(err)))
}

fn string_attr(item: &Item, name: &str) -> Result<String, StoreError> {
    match item.get(name) {
        Some(AttributeValue::S(value)) => Ok(value.clone()),
        _ => Err(StoreError::Malformed(format!("missing string attribute {}", name))),
    }
}

fn optional_string_attr(item: &Item, name: &str) -> Option<String> {
    match item.get(name) {
        Some(AttributeValue::S(value)) => Some(value.clone()),
        _ => None,
    }
}

fn time_attr(item: &Item, name: &str) -> Result<DateTime<Utc>, StoreError> {
    let seconds = match item.get(name) {
        Some(AttributeValue::N(value)) => value
            .parse::<i64>()
            .map_err(|e| StoreError::Malformed(format!("{}: {}", name, e)))?,
        _ => return Err(StoreError::Malformed(format!("missing number attribute {}", name))),
    };
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| StoreError::Malformed(format!("{} out of range", name)))
}

fn time_value(time: DateTime<Utc>) -> AttributeValue {
    AttributeValue::N(time.timestamp().to_string())
}

fn json_value<T: Serialize>(value: &T) -> Result<AttributeValue, StoreError> {
    serde_json::to_string(value)
        .map(AttributeValue::S)
        .map_err(|e| StoreError::Malformed(e.to_string()))
}

fn json_attr<T: DeserializeOwned + Default>(item: &Item, name: &str) -> Result<T, StoreError> {
    match optional_string_attr(item, name) {
        Some(json) => serde_json::from_str(&json)
            .map_err(|e| StoreError::Malformed(format!("{}: {}", name, e))),
        None => Ok(T::default()),
    }
}

fn identity_from_item(item: &Item) -> Result<IdentityRecord, StoreError> {
    Ok(IdentityRecord {
        username: string_attr(item, "Username")?,
        session_id: optional_string_attr(item, "SessionId"),
        roles_with_access: json_attr(item, "RolesWithAccess")?,
        roles_without_access: json_attr(item, "RolesWithoutAccess")?,
        currently_selected_role: json_attr(item, "CurrentlySelectedRole")?,
        token_mapping: json_attr(item, "TokenMapping")?,
    })
}

fn session_from_item(item: &Item) -> Result<ConcurrencyRecord, StoreError> {
    Ok(ConcurrencyRecord {
        username: string_attr(item, "Username")?,
        session_id: string_attr(item, "SessionId")?,
        created_at: time_attr(item, "CreatedAt")?,
        expiry: time_attr(item, "ExpiryTime")?,
    })
}

#[async_trait]
impl StateStore for DynamoDbStore {
    #[tracing::instrument(name = "dynamodb.state.put", skip(self, mapping), err)]
    async fn put(&self, mapping: &StateMapping) -> Result<(), StoreError> {
        self.client
            .put_item()
            .table_name(&self.tables.state_table)
            .item("State", AttributeValue::S(mapping.state.clone()))
            .item("CognitoState", AttributeValue::S(mapping.cognito_state.clone()))
            .item("ExpiryTime", time_value(mapping.expiry))
            .send()
            .await
            .map_err(|e| backend("PutItem", e))?;
        Ok(())
    }

    #[tracing::instrument(name = "dynamodb.state.get", skip(self, state), err)]
    async fn get(&self, state: &str) -> Result<StateMapping, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.tables.state_table)
            .key("State", AttributeValue::S(state.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| backend("GetItem", e))?;

        let item = output
            .item()
            .ok_or_else(|| StoreError::NotFound("state".into()))?;

        Ok(StateMapping {
            state: string_attr(item, "State")?,
            cognito_state: string_attr(item, "CognitoState")?,
            expiry: time_attr(item, "ExpiryTime")?,
        })
    }

    #[tracing::instrument(name = "dynamodb.state.delete", skip(self, state), err)]
    async fn delete(&self, state: &str) -> Result<(), StoreError> {
        self.client
            .delete_item()
            .table_name(&self.tables.state_table)
            .key("State", AttributeValue::S(state.to_string()))
            .send()
            .await
            .map_err(|e| backend("DeleteItem", e))?;
        Ok(())
    }
}

#[async_trait]
impl SessionDirectory for DynamoDbStore {
    #[tracing::instrument(name = "dynamodb.identity.get", skip(self), err)]
    async fn get_identity(&self, username: &str) -> Result<Option<IdentityRecord>, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.tables.identity_table)
            .key("Username", AttributeValue::S(username.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| backend("GetItem", e))?;

        output.item().map(identity_from_item).transpose()
    }

    #[tracing::instrument(name = "dynamodb.identity.put", skip(self, record), err)]
    async fn put_identity(&self, record: &IdentityRecord) -> Result<(), StoreError> {
        let mut request = self
            .client
            .put_item()
            .table_name(&self.tables.identity_table)
            .item("Username", AttributeValue::S(record.username.clone()))
            .item("RolesWithAccess", json_value(&record.roles_with_access)?)
            .item("RolesWithoutAccess", json_value(&record.roles_without_access)?)
            .item(
                "CurrentlySelectedRole",
                json_value(&record.currently_selected_role)?,
            )
            .item("TokenMapping", json_value(&record.token_mapping)?);

        if let Some(ref session_id) = record.session_id {
            request = request.item("SessionId", AttributeValue::S(session_id.clone()));
        }

        request.send().await.map_err(|e| backend("PutItem", e))?;
        Ok(())
    }

    #[tracing::instrument(name = "dynamodb.identity.delete", skip(self), err)]
    async fn delete_identity(&self, username: &str) -> Result<(), StoreError> {
        self.client
            .delete_item()
            .table_name(&self.tables.identity_table)
            .key("Username", AttributeValue::S(username.to_string()))
            .send()
            .await
            .map_err(|e| backend("DeleteItem", e))?;
        Ok(())
    }

    #[tracing::instrument(name = "dynamodb.session.get", skip(self), err)]
    async fn get_session(
        &self,
        username: &str,
        session_id: &str,
    ) -> Result<Option<ConcurrencyRecord>, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.tables.concurrency_table)
            .key("Username", AttributeValue::S(username.to_string()))
            .key("SessionId", AttributeValue::S(session_id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| backend("GetItem", e))?;

        output.item().map(session_from_item).transpose()
    }

    #[tracing::instrument(name = "dynamodb.session.list", skip(self), err)]
    async fn list_sessions(&self, username: &str) -> Result<Vec<ConcurrencyRecord>, StoreError> {
        let mut items = self
            .client
            .query()
            .table_name(&self.tables.concurrency_table)
            .key_condition_expression("#u = :u")
            .expression_attribute_names("#u", "Username")
            .expression_attribute_values(":u", AttributeValue::S(username.to_string()))
            .consistent_read(true)
            .into_paginator()
            .items()
            .send();

        let mut sessions = Vec::new();
        while let Some(item) = items.next().await {
            let item = item.map_err(|e| backend("Query", e))?;
            sessions.push(session_from_item(&item)?);
        }
        Ok(sessions)
    }

    #[tracing::instrument(name = "dynamodb.session.put", skip(self, record), err)]
    async fn put_session(&self, record: &ConcurrencyRecord) -> Result<(), StoreError> {
        self.client
            .put_item()
            .table_name(&self.tables.concurrency_table)
            .item("Username", AttributeValue::S(record.username.clone()))
            .item("SessionId", AttributeValue::S(record.session_id.clone()))
            .item("CreatedAt", time_value(record.created_at))
            .item("ExpiryTime", time_value(record.expiry))
            .send()
            .await
            .map_err(|e| backend("PutItem", e))?;
        Ok(())
    }

    #[tracing::instrument(name = "dynamodb.session.delete", skip(self), err)]
    async fn delete_session(&self, username: &str, session_id: &str) -> Result<(), StoreError> {
        self.client
            .delete_item()
            .table_name(&self.tables.concurrency_table)
            .key("Username", AttributeValue::S(username.to_string()))
            .key("SessionId", AttributeValue::S(session_id.to_string()))
            .send()
            .await
            .map_err(|e| backend("DeleteItem", e))?;
        Ok(())
    }
}
