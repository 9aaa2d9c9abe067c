//! In-memory backend for development and tests.

use super::{SessionDirectory, StateStore, StoreError};
use crate::model::{ConcurrencyRecord, IdentityRecord, StateMapping};
use async_trait::async_trait;
use dashmap::DashMap;

/// Process-local store implementing both collaborators
#[derive(Debug, Default)]
pub struct MemoryStore {
    states: DashMap<String, StateMapping>,
    identities: DashMap<String, IdentityRecord>,
    sessions: DashMap<(String, String), ConcurrencyRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn put(&self, mapping: &StateMapping) -> Result<(), StoreError> {
        let now = chrono::Utc::now();
        self.states.retain(|_, existing| !existing.is_expired(now));
        self.states.insert(mapping.state.clone(), mapping.clone());
        Ok(())
    }

    async fn get(&self, state: &str) -> Result<StateMapping, StoreError> {
        self.states
            .get(state)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(format!("state {}", state)))
    }

    async fn delete(&self, state: &str) -> Result<(), StoreError> {
        self.states.remove(state);
        Ok(())
    }
}

#[async_trait]
impl SessionDirectory for MemoryStore {
    async fn get_identity(&self, username: &str) -> Result<Option<IdentityRecord>, StoreError> {
        Ok(self
            .identities
            .get(username)
            .map(|entry| entry.value().clone()))
    }

    async fn put_identity(&self, record: &IdentityRecord) -> Result<(), StoreError> {
        self.identities
            .insert(record.username.clone(), record.clone());
        Ok(())
    }

    async fn delete_identity(&self, username: &str) -> Result<(), StoreError> {
        self.identities.remove(username);
        Ok(())
    }

    async fn get_session(
        &self,
        username: &str,
        session_id: &str,
    ) -> Result<Option<ConcurrencyRecord>, StoreError> {
        Ok(self
            .sessions
            .get(&(username.to_string(), session_id.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn list_sessions(&self, username: &str) -> Result<Vec<ConcurrencyRecord>, StoreError> {
        Ok(self
            .sessions
            .iter()
            .filter(|entry| entry.key().0 == username)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn put_session(&self, record: &ConcurrencyRecord) -> Result<(), StoreError> {
        self.sessions.insert(
            (record.username.clone(), record.session_id.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn delete_session(&self, username: &str, session_id: &str) -> Result<(), StoreError> {
        self.sessions
            .remove(&(username.to_string(), session_id.to_string()));
        Ok(())
    }
}
