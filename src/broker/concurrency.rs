//! Concurrent session detection and resolution
//!
//! A user's primary session is the `session_id` held on their Identity Table
//! record. A sign-in whose session id differs must either take over as
//! primary or be confirmed as a concurrent session.

use crate::error::BrokerError;
use crate::model::{draft_username, ConcurrencyRecord, IdentityRecord};
use crate::store::SessionDirectory;
use serde::Serialize;
use std::sync::Arc;

/// How a session relates to the user's recorded sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// The session is the recorded primary session
    Primary,
    /// Another primary session exists, or this session was confirmed as concurrent
    Concurrent,
    /// No primary session has been recorded yet
    Unconfirmed,
}

pub struct SessionTracker {
    directory: Arc<dyn SessionDirectory>,
    session_ttl: chrono::Duration,
}

impl SessionTracker {
    pub fn new(directory: Arc<dyn SessionDirectory>, session_ttl: chrono::Duration) -> Self {
        Self {
            directory,
            session_ttl,
        }
    }

    #[tracing::instrument(name = "broker.session_status", skip_all, err)]
    pub async fn status(
        &self,
        username: &str,
        session_id: &str,
    ) -> Result<SessionStatus, BrokerError> {
        let primary = self
            .directory
            .get_identity(username)
            .await?
            .and_then(|record| record.session_id);

        match primary {
            Some(ref primary) if primary == session_id => Ok(SessionStatus::Primary),
            Some(_) => Ok(SessionStatus::Concurrent),
            None => {
                let confirmed = self.directory.get_session(username, session_id).await?;
                Ok(if confirmed.is_some() {
                    SessionStatus::Concurrent
                } else {
                    SessionStatus::Unconfirmed
                })
            }
        }
    }

    /// Resolve a session after sign-in
    ///
    /// With `take_over`, or when no primary session exists, the session
    /// becomes primary. Otherwise it is recorded as a concurrent session.
    /// The sign-in's draft record is removed either way.
    #[tracing::instrument(name = "broker.session_confirm", skip(self, username, session_id), err)]
    pub async fn confirm(
        &self,
        username: &str,
        session_id: &str,
        take_over: bool,
    ) -> Result<SessionStatus, BrokerError> {
        let existing = self.directory.get_identity(username).await?;
        let current_primary = existing.as_ref().and_then(|r| r.session_id.clone());

        let becomes_primary = take_over
            || current_primary.is_none()
            || current_primary.as_deref() == Some(session_id);

        let status = if becomes_primary {
            let mut record = existing.unwrap_or_else(|| IdentityRecord::new(username));
            record.session_id = Some(session_id.to_string());
            self.directory.put_identity(&record).await?;
            self.directory.delete_session(username, session_id).await?;
            if current_primary.is_some_and(|p| p != session_id) {
                tracing::info!("Primary session taken over");
            }
            SessionStatus::Primary
        } else {
            let record = ConcurrencyRecord::confirmed(username, session_id, self.session_ttl);
            self.directory.put_session(&record).await?;
            SessionStatus::Concurrent
        };

        self.directory
            .delete_session(&draft_username(username), session_id)
            .await?;

        Ok(status)
    }
}
