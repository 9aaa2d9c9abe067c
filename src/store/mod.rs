//! Durable key-value collaborators
//!
//! - [`StateStore`] keeps `StateMapping`s across the upstream redirect hop.
//! - [`SessionDirectory`] fronts the Identity Table (keyed by username) and
//!   the Concurrency Table (keyed by username and session id).
//!
//! Lookups on the State Store are error-if-absent, while every delete is
//! delete-if-exists. Backends: [`memory::MemoryStore`] and
//! [`dynamodb::DynamoDbStore`].

use crate::config::{StorageConfig, TablesConfig};
use crate::model::{ConcurrencyRecord, IdentityRecord, StateMapping};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub mod dynamodb;
pub mod memory;

pub use dynamodb::DynamoDbStore;
pub use memory::MemoryStore;

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Malformed item: {0}")]
    Malformed(String),
}

/// State token storage
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn put(&self, mapping: &StateMapping) -> Result<(), StoreError>;

    /// Fails with [`StoreError::NotFound`] when no mapping exists.
    async fn get(&self, state: &str) -> Result<StateMapping, StoreError>;

    async fn delete(&self, state: &str) -> Result<(), StoreError>;
}

/// Identity and concurrency tables
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    async fn get_identity(&self, username: &str) -> Result<Option<IdentityRecord>, StoreError>;

    async fn put_identity(&self, record: &IdentityRecord) -> Result<(), StoreError>;

    async fn delete_identity(&self, username: &str) -> Result<(), StoreError>;

    async fn get_session(
        &self,
        username: &str,
        session_id: &str,
    ) -> Result<Option<ConcurrencyRecord>, StoreError>;

    async fn list_sessions(&self, username: &str) -> Result<Vec<ConcurrencyRecord>, StoreError>;

    async fn put_session(&self, record: &ConcurrencyRecord) -> Result<(), StoreError>;

    async fn delete_session(&self, username: &str, session_id: &str) -> Result<(), StoreError>;
}

/// Both collaborators, sharing one backend
#[derive(Clone)]
pub struct Stores {
    pub state: Arc<dyn StateStore>,
    pub directory: Arc<dyn SessionDirectory>,
}

impl Stores {
    /// Connect to the backend selected by configuration
    pub async fn from_config(storage: &StorageConfig, tables: &TablesConfig) -> Self {
        match storage {
            StorageConfig::Memory => {
                tracing::warn!("Using in-memory storage; state is lost on restart");
                let store = Arc::new(MemoryStore::new());
                Self {
                    state: store.clone(),
                    directory: store,
                }
            }
            StorageConfig::DynamoDb { region, endpoint } => {
                let store =
                    Arc::new(DynamoDbStore::connect(region, endpoint.as_deref(), tables).await);
                Self {
                    state: store.clone(),
                    directory: store,
                }
            }
        }
    }
}
