//! Metrics module
//!
//! Prometheus counters for the federation flows, exposed at `GET /metrics`.

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, CounterVec, Encoder, TextEncoder};

lazy_static! {
    pub static ref AUTH_FLOW_TOTAL: CounterVec = register_counter_vec!(
        "cis2_broker_auth_flow_total",
        "Federation flow steps by outcome",
        &["flow", "outcome"]
    ).unwrap();

    pub static ref SESSIONS_ISSUED: CounterVec = register_counter_vec!(
        "cis2_broker_sessions_issued_total",
        "Session identities issued at token generation",
        &["variant"]
    ).unwrap();

    pub static ref LOGOUTS_TOTAL: CounterVec = register_counter_vec!(
        "cis2_broker_logouts_total",
        "Logouts by kind",
        &["kind"]
    ).unwrap();

    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "cis2_broker_errors_total",
        "Errors by kind",
        &["kind"]
    ).unwrap();
}

/// Record the outcome of a flow step such as `authorize` or `callback`
pub fn record_flow(flow: &str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    AUTH_FLOW_TOTAL.with_label_values(&[flow, outcome]).inc();
}

pub fn record_session_issued(variant: &str) {
    SESSIONS_ISSUED.with_label_values(&[variant]).inc();
}

/// Record a logout, `kind` is `primary` or `concurrent`
pub fn record_logout(kind: &str) {
    LOGOUTS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_error(kind: &str) {
    ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

/// Render every registered metric in the Prometheus text format
///
/// Returns the content type and the encoded body.
pub fn render() -> Result<(String, Vec<u8>), prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok((encoder.format_type().to_string(), buffer))
}
