//! Logout Reconciler
//!
//! A primary logout removes the user's Identity Table record; a concurrent
//! logout removes only that session's Concurrency Table record. Deletes are
//! idempotent, so a retried logout is harmless.

use super::MockGate;
use crate::error::BrokerError;
use crate::model::draft_username;
use crate::store::SessionDirectory;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutRequest {
    pub username: String,
    pub session_id: Option<String>,
    pub concurrent: bool,
}

/// Outcome of [`LogoutReconciler::purge`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeReport {
    pub identity_deleted: bool,
    pub sessions_deleted: usize,
    pub failures: usize,
}

pub struct LogoutReconciler {
    directory: Arc<dyn SessionDirectory>,
    gate: MockGate,
}

impl LogoutReconciler {
    pub fn new(directory: Arc<dyn SessionDirectory>, gate: MockGate) -> Self {
        Self { directory, gate }
    }

    #[tracing::instrument(name = "broker.logout", skip_all, fields(concurrent = request.concurrent), err)]
    pub async fn logout(&self, request: &LogoutRequest) -> Result<(), BrokerError> {
        self.gate.check(&request.username)?;

        if request.concurrent {
            let session_id = request.session_id.as_deref().ok_or_else(|| {
                BrokerError::MissingParameters("concurrent logout requires a session id".into())
            })?;
            self.directory
                .delete_session(&request.username, session_id)
                .await?;
        } else {
            self.directory.delete_identity(&request.username).await?;
        }

        tracing::info!("Logout complete");
        Ok(())
    }

    /// Remove every record held for `username`
    ///
    /// Individual failures are logged and counted; the purge carries on.
    #[tracing::instrument(name = "broker.purge", skip(self))]
    pub async fn purge(&self, username: &str) -> PurgeReport {
        let mut report = PurgeReport::default();

        match self.directory.delete_identity(username).await {
            Ok(()) => report.identity_deleted = true,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to delete identity record");
                report.failures += 1;
            }
        }

        for owner in [username.to_string(), draft_username(username)] {
            let sessions = match self.directory.list_sessions(&owner).await {
                Ok(sessions) => sessions,
                Err(e) => {
                    tracing::warn!(error = %e, owner = %owner, "Failed to list sessions");
                    report.failures += 1;
                    continue;
                }
            };
            for session in sessions {
                match self
                    .directory
                    .delete_session(&session.username, &session.session_id)
                    .await
                {
                    Ok(()) => report.sessions_deleted += 1,
                    Err(e) => {
                        tracing::warn!(error = %e, owner = %owner, "Failed to delete session");
                        report.failures += 1;
                    }
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConcurrencyRecord, IdentityRecord};
    use crate::store::{MemoryStore, MockSessionDirectory, StoreError};

    fn request(username: &str, session_id: Option<&str>, concurrent: bool) -> LogoutRequest {
        LogoutRequest {
            username: username.into(),
            session_id: session_id.map(str::to_string),
            concurrent,
        }
    }

    #[tokio::test]
    async fn test_concurrent_logout_requires_session_id() {
        let mut directory = MockSessionDirectory::new();
        directory.expect_delete_session().never();
        directory.expect_delete_identity().never();
        let reconciler = LogoutReconciler::new(Arc::new(directory), MockGate::new(false));

        let err = reconciler
            .logout(&request("Primary_alice", None, true))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::MissingParameters(_)));
    }

    #[tokio::test]
    async fn test_mock_logout_refused_when_disabled() {
        let mut directory = MockSessionDirectory::new();
        directory.expect_delete_identity().never();
        let reconciler = LogoutReconciler::new(Arc::new(directory), MockGate::new(false));

        let err = reconciler
            .logout(&request("Mock_555043300081", Some("s"), false))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::MockModeDisabled));
    }

    #[tokio::test]
    async fn test_purge_removes_everything_and_tolerates_failures() {
        let store = Arc::new(MemoryStore::new());
        let ttl = chrono::Duration::hours(1);
        store
            .put_identity(&IdentityRecord::new("Primary_alice"))
            .await
            .unwrap();
        store
            .put_session(&ConcurrencyRecord::confirmed("Primary_alice", "a", ttl))
            .await
            .unwrap();
        store
            .put_session(&ConcurrencyRecord::draft("Primary_alice", "b", ttl))
            .await
            .unwrap();

        let report = LogoutReconciler::new(store.clone(), MockGate::new(true))
            .purge("Primary_alice")
            .await;
        assert_eq!(
            report,
            PurgeReport {
                identity_deleted: true,
                sessions_deleted: 2,
                failures: 0
            }
        );
        assert_eq!(store.session_count(), 0);

        let mut directory = MockSessionDirectory::new();
        directory
            .expect_delete_identity()
            .returning(|_| Err(StoreError::Backend("down".into())));
        directory
            .expect_list_sessions()
            .times(2)
            .returning(|_| Ok(vec![]));
        let report = LogoutReconciler::new(Arc::new(directory), MockGate::new(true))
            .purge("Primary_alice")
            .await;
        assert!(!report.identity_deleted);
        assert_eq!(report.failures, 1);
    }
}
