//! Logout through the router

mod common;

#[cfg(test)]
mod tests {
    use super::common;
    use cis2_broker::model::{ConcurrencyRecord, IdentityRecord};
    use cis2_broker::server::routes::CONCURRENT_SESSION_HEADER;
    use cis2_broker::server::{route, BrokerRequest};
    use cis2_broker::store::{MemoryStore, SessionDirectory};
    use hyper::{Method, StatusCode};

    const USERNAME: &str = "Primary_555043300081";

    async fn seed(store: &MemoryStore) {
        let mut record = IdentityRecord::new(USERNAME);
        record.session_id = Some("primary-session".into());
        store.put_identity(&record).await.unwrap();
        store
            .put_session(&ConcurrencyRecord::confirmed(
                USERNAME,
                "second-session",
                chrono::Duration::hours(1),
            ))
            .await
            .unwrap();
    }

    fn logout_request(session_id: &str) -> BrokerRequest {
        let token = common::session_token(USERNAME, Some(session_id));
        BrokerRequest::new(Method::POST, "/logout")
            .header("authorization", &format!("Bearer {}", token))
    }

    #[tokio::test]
    async fn test_primary_logout_removes_identity() {
        let (state, store) = common::app_state(common::config("https://cis2.example.com", false));
        seed(&store).await;

        let response = route(&state, logout_request("primary-session")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body(), r#"{"message":"Logged out"}"#);

        assert!(store.get_identity(USERNAME).await.unwrap().is_none());
        // Concurrent sessions expire on their own
        assert!(store
            .get_session(USERNAME, "second-session")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_concurrent_logout_removes_only_that_session() {
        let (state, store) = common::app_state(common::config("https://cis2.example.com", false));
        seed(&store).await;

        let response = route(
            &state,
            logout_request("second-session").header(CONCURRENT_SESSION_HEADER, "TRUE"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        assert!(store
            .get_session(USERNAME, "second-session")
            .await
            .unwrap()
            .is_none());
        let record = store.get_identity(USERNAME).await.unwrap().unwrap();
        assert_eq!(record.session_id.as_deref(), Some("primary-session"));
    }

    #[tokio::test]
    async fn test_concurrent_header_presence_selects_concurrent_path() {
        for value in ["", "1", "yes", "false"] {
            let (state, store) =
                common::app_state(common::config("https://cis2.example.com", false));
            seed(&store).await;

            let response = route(
                &state,
                logout_request("second-session").header(CONCURRENT_SESSION_HEADER, value),
            )
            .await;
            assert_eq!(response.status(), StatusCode::OK, "header value {:?}", value);

            assert!(
                store.get_identity(USERNAME).await.unwrap().is_some(),
                "identity removed for header value {:?}",
                value
            );
            assert!(store
                .get_session(USERNAME, "second-session")
                .await
                .unwrap()
                .is_none());
        }
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let (state, store) = common::app_state(common::config("https://cis2.example.com", false));
        seed(&store).await;

        for _ in 0..2 {
            let response = route(&state, logout_request("primary-session")).await;
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_logout_requires_valid_token() {
        let (state, store) = common::app_state(common::config("https://cis2.example.com", false));
        seed(&store).await;

        let response = route(&state, BrokerRequest::new(Method::POST, "/logout")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = route(
            &state,
            BrokerRequest::new(Method::POST, "/logout")
                .header("authorization", "Bearer not.a.token"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(store.get_identity(USERNAME).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_mock_logout_refused_when_mock_mode_disabled() {
        let (state, store) = common::app_state(common::config("https://cis2.example.com", false));
        store
            .put_identity(&IdentityRecord::new("Mock_555043300081"))
            .await
            .unwrap();

        let token = common::session_token("Mock_555043300081", Some("s"));
        let response = route(
            &state,
            BrokerRequest::new(Method::POST, "/logout")
                .header("authorization", &format!("Bearer {}", token)),
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(store
            .get_identity("Mock_555043300081")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_purge_in_mock_mode() {
        let (state, store) = common::app_state(common::config("https://cis2.example.com", true));
        seed(&store).await;

        let response = route(
            &state,
            BrokerRequest::new(Method::DELETE, &format!("/test-support/users/{}", USERNAME)),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let report: serde_json::Value = serde_json::from_str(response.body()).unwrap();
        assert_eq!(report["identityDeleted"], true);
        assert_eq!(report["sessionsDeleted"], 1);
        assert_eq!(store.session_count(), 0);
    }
}
