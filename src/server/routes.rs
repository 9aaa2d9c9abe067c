//! Request routing
//!
//! | Route | Handler |
//! |-------|---------|
//! | `GET /authorize`, `GET /mock/authorize` | Authorization Redirector |
//! | `GET /callback`, `GET /mock/callback` | Callback Resolver |
//! | `POST /token`, `POST /mock/token` | Token Exchanger |
//! | `POST /triggers/pre-token-generation` | Session Identity Issuer |
//! | `POST /logout` | Logout Reconciler |
//! | `GET /session`, `POST /session/confirm` | Concurrency status and resolution |
//! | `POST /roles/select` | Role selection |
//! | `DELETE /test-support/users/{username}` | Purge, mock mode only |
//! | `GET /health`, `GET /metrics` | Liveness and counters |

use super::AppState;
use crate::auth::{AuthRequest, AuthResult};
use crate::broker::{LogoutRequest, PreTokenGenerationEvent};
use crate::error::{BrokerError, SYSTEM_ERROR_BODY};
use crate::metrics;
use crate::model::IdentityVariant;
use hyper::header::{HeaderValue, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use hyper::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::{error, warn};

/// Header marking a logout as ending a concurrent session only
pub const CONCURRENT_SESSION_HEADER: &str = "concurrent-session";

const TEST_SUPPORT_USERS: &str = "/test-support/users/";

/// A buffered HTTP request
#[derive(Debug, Clone)]
pub struct BrokerRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    /// Header names are lowercase
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl BrokerRequest {
    pub fn new(method: Method, path_and_query: &str) -> Self {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (path_and_query.to_string(), None),
        };
        Self {
            method,
            path,
            query,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_lowercase(), value.to_string());
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    fn auth_request(&self) -> AuthRequest {
        AuthRequest {
            headers: self.headers.clone(),
            method: self.method.to_string(),
            path: self.path.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmBody {
    #[serde(default)]
    take_over: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectRoleBody {
    role_id: String,
}

/// Dispatch `request` and render the response
pub async fn route(state: &AppState, request: BrokerRequest) -> Response<String> {
    let method = request.method.clone();
    let path = request.path.clone();

    let (flow, result) = match (&method, path.as_str()) {
        (&Method::GET, "/health") => {
            return json_response(StatusCode::OK, json!({"status": "ok"}))
        }
        (&Method::GET, "/metrics") => return metrics_response(),

        (&Method::GET, "/authorize") => (
            "authorize",
            authorize(state, IdentityVariant::Primary, &request).await,
        ),
        (&Method::GET, "/mock/authorize") => (
            "authorize",
            authorize(state, IdentityVariant::Mock, &request).await,
        ),
        (&Method::GET, "/callback") => (
            "callback",
            callback(state, IdentityVariant::Primary, &request).await,
        ),
        (&Method::GET, "/mock/callback") => (
            "callback",
            callback(state, IdentityVariant::Mock, &request).await,
        ),
        (&Method::POST, "/token") => (
            "token",
            token(state, IdentityVariant::Primary, &request).await,
        ),
        (&Method::POST, "/mock/token") => (
            "token",
            token(state, IdentityVariant::Mock, &request).await,
        ),

        (&Method::POST, "/triggers/pre-token-generation") => {
            ("session_issue", pre_token_generation(state, &request).await)
        }
        (&Method::POST, "/logout") => ("logout", logout(state, &request).await),
        (&Method::GET, "/session") => {
            ("session_status", session_status(state, &request).await)
        }
        (&Method::POST, "/session/confirm") => {
            ("session_confirm", session_confirm(state, &request).await)
        }
        (&Method::POST, "/roles/select") => {
            ("role_select", select_role(state, &request).await)
        }

        // Hidden unless mock mode is enabled
        (&Method::DELETE, p)
            if p.starts_with(TEST_SUPPORT_USERS) && state.broker.gate().enabled() =>
        {
            ("purge", purge(state, &p[TEST_SUPPORT_USERS.len()..]).await)
        }

        _ => return not_found(),
    };

    metrics::record_flow(flow, result.is_ok());
    match result {
        Ok(response) => response,
        Err(err) => error_response(flow, &err),
    }
}

async fn authorize(
    state: &AppState,
    variant: IdentityVariant,
    request: &BrokerRequest,
) -> Result<Response<String>, BrokerError> {
    let redirect = state
        .broker
        .authorize(variant, request.query.as_deref())
        .await?;
    redirect_response(&redirect.location)
}

async fn callback(
    state: &AppState,
    variant: IdentityVariant,
    request: &BrokerRequest,
) -> Result<Response<String>, BrokerError> {
    let outcome = state
        .broker
        .callback(variant, request.query.as_deref())
        .await?;
    redirect_response(&outcome.redirect().location)
}

async fn token(
    state: &AppState,
    variant: IdentityVariant,
    request: &BrokerRequest,
) -> Result<Response<String>, BrokerError> {
    let form = std::str::from_utf8(&request.body)
        .map_err(|_| BrokerError::MissingParameters("token request body is not UTF-8".into()))?;
    let body = state.broker.token(variant, form).await?;
    Ok(json_response(StatusCode::OK, body))
}

async fn pre_token_generation(
    state: &AppState,
    request: &BrokerRequest,
) -> Result<Response<String>, BrokerError> {
    let event: PreTokenGenerationEvent = parse_json(&request.body)?;
    let variant = IdentityVariant::of_username(&event.user_name);
    let event = state.broker.issuer.issue(event).await?;
    metrics::record_session_issued(variant.as_str());
    Ok(json_response(StatusCode::OK, event))
}

async fn logout(
    state: &AppState,
    request: &BrokerRequest,
) -> Result<Response<String>, BrokerError> {
    let identity = authenticate(state, request).await?;
    // Presence of the header selects the concurrent path, whatever its value
    let concurrent = request.headers.contains_key(CONCURRENT_SESSION_HEADER);

    state
        .broker
        .logout
        .logout(&LogoutRequest {
            username: identity.username,
            session_id: identity.session_id,
            concurrent,
        })
        .await?;

    metrics::record_logout(if concurrent { "concurrent" } else { "primary" });
    Ok(json_response(StatusCode::OK, json!({"message": "Logged out"})))
}

async fn session_status(
    state: &AppState,
    request: &BrokerRequest,
) -> Result<Response<String>, BrokerError> {
    let (username, session_id) = session_identity(state, request).await?;
    let status = state.broker.sessions.status(&username, &session_id).await?;
    Ok(json_response(StatusCode::OK, json!({"status": status})))
}

async fn session_confirm(
    state: &AppState,
    request: &BrokerRequest,
) -> Result<Response<String>, BrokerError> {
    let (username, session_id) = session_identity(state, request).await?;
    let body: ConfirmBody = parse_json(&request.body)?;
    let status = state
        .broker
        .sessions
        .confirm(&username, &session_id, body.take_over)
        .await?;
    Ok(json_response(StatusCode::OK, json!({"status": status})))
}

async fn select_role(
    state: &AppState,
    request: &BrokerRequest,
) -> Result<Response<String>, BrokerError> {
    let identity = authenticate(state, request).await?;
    state.broker.gate().check(&identity.username)?;
    let body: SelectRoleBody = parse_json(&request.body)?;
    let role = state
        .broker
        .roles
        .select(&identity.username, &body.role_id)
        .await?;
    Ok(json_response(StatusCode::OK, role))
}

async fn purge(state: &AppState, username: &str) -> Result<Response<String>, BrokerError> {
    if username.is_empty() || username.contains(['/', '%']) {
        return Err(BrokerError::MissingParameters("username".into()));
    }
    let report = state.broker.logout.purge(username).await;
    Ok(json_response(StatusCode::OK, report))
}

async fn authenticate(state: &AppState, request: &BrokerRequest) -> Result<AuthResult, BrokerError> {
    Ok(state.verifier.authenticate(&request.auth_request()).await?)
}

/// Username and session id of a verified session token
async fn session_identity(
    state: &AppState,
    request: &BrokerRequest,
) -> Result<(String, String), BrokerError> {
    let identity = authenticate(state, request).await?;
    state.broker.gate().check(&identity.username)?;
    let session_id = identity
        .session_id
        .ok_or(crate::auth::AuthError::MissingClaim(
            crate::auth::verifier::SESSION_ID_CLAIM,
        ))?;
    Ok((identity.username, session_id))
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, BrokerError> {
    serde_json::from_slice(body)
        .map_err(|e| BrokerError::MissingParameters(format!("invalid JSON body: {}", e)))
}

fn response(status: StatusCode, content_type: &'static str, body: String) -> Response<String> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn json_response<T: serde::Serialize>(status: StatusCode, body: T) -> Response<String> {
    match serde_json::to_string(&body) {
        Ok(body) => response(status, "application/json", body),
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            system_error()
        }
    }
}

fn redirect_response(location: &str) -> Result<Response<String>, BrokerError> {
    let value = HeaderValue::from_str(location)
        .map_err(|e| BrokerError::Upstream(format!("invalid redirect location: {}", e)))?;
    let mut response = Response::new(String::new());
    *response.status_mut() = StatusCode::FOUND;
    response.headers_mut().insert(LOCATION, value);
    Ok(response)
}

fn metrics_response() -> Response<String> {
    match metrics::render() {
        Ok((content_type, body)) => {
            let mut response = Response::new(String::from_utf8_lossy(&body).into_owned());
            if let Ok(value) = HeaderValue::from_str(&content_type) {
                response.headers_mut().insert(CONTENT_TYPE, value);
            }
            response
        }
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            system_error()
        }
    }
}

fn not_found() -> Response<String> {
    response(
        StatusCode::NOT_FOUND,
        "application/json",
        r#"{"message":"Not Found"}"#.to_string(),
    )
}

fn system_error() -> Response<String> {
    response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "application/json",
        SYSTEM_ERROR_BODY.to_string(),
    )
}

fn error_response(flow: &str, err: &BrokerError) -> Response<String> {
    metrics::record_error(err.kind());

    if err.status_code() == StatusCode::UNAUTHORIZED {
        warn!(flow = flow, error = %err, "Request not authenticated");
        let mut response = response(
            StatusCode::UNAUTHORIZED,
            "application/json",
            r#"{"message":"Unauthorized"}"#.to_string(),
        );
        response
            .headers_mut()
            .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        return response;
    }

    error!(flow = flow, kind = err.kind(), error = %err, "Request failed");
    system_error()
}
