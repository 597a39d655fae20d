//! Audit logging for mediation decisions.
//!
//! Every branch of the mediation path emits a structured event on the
//! `tollgate::audit` target. Secrets - fake or real - never appear in
//! any event; pattern strings, host, method, and path are the only
//! request-derived fields logged.

use tracing::{info, warn};

/// Request carried no configured fake secret and passed through.
pub fn log_passthrough(host: &str, method: &str, path: &str) {
    info!(
        target: "tollgate::audit",
        host = host,
        method = method,
        path = path,
        decision = "passthrough",
        "request without fake secret forwarded unmodified"
    );
}

/// A stored rejection pattern matched.
pub fn log_rejection_matched(host: &str, key: &str, pattern: &str) {
    info!(
        target: "tollgate::audit",
        host = host,
        key = key,
        pattern = pattern,
        decision = "reject",
        "permanent rejection matched pattern"
    );
}

/// A stored grant pattern matched.
pub fn log_grant_matched(host: &str, key: &str, pattern: &str) {
    info!(
        target: "tollgate::audit",
        host = host,
        key = key,
        pattern = pattern,
        decision = "allow",
        "grant matched pattern"
    );
}

/// Operator approved and persisted a pattern.
pub fn log_approved_forever(host: &str, pattern: &str) {
    info!(
        target: "tollgate::audit",
        host = host,
        pattern = pattern,
        decision = "allow",
        "approved forever with pattern"
    );
}

/// Operator rejected and persisted a pattern.
pub fn log_rejected_forever(host: &str, pattern: &str) {
    info!(
        target: "tollgate::audit",
        host = host,
        pattern = pattern,
        decision = "reject",
        "rejected forever with pattern"
    );
}

/// One-shot operator decision.
pub fn log_once_decision(host: &str, resource: &str, allowed: bool) {
    info!(
        target: "tollgate::audit",
        host = host,
        resource = resource,
        decision = if allowed { "allow" } else { "reject" },
        "one-shot approval decision"
    );
}

/// Approval prompt timed out; the transport reports it as reject-once.
pub fn log_approval_timeout(host: &str, resource: &str) {
    warn!(
        target: "tollgate::audit",
        host = host,
        resource = resource,
        decision = "reject",
        "approval timeout"
    );
}

/// Request needed approval but no transport is bound.
pub fn log_no_handler(host: &str, key: &str) {
    warn!(
        target: "tollgate::audit",
        host = host,
        key = key,
        decision = "reject",
        "no approval handler bound"
    );
}

/// The real secret env var is unset at forward time.
pub fn log_missing_real_secret(host: &str, env_var: &str) {
    warn!(
        target: "tollgate::audit",
        host = host,
        env_var = env_var,
        decision = "error",
        "no real secret configured"
    );
}

/// Mediated request forwarded with substitution.
pub fn log_forwarded(host: &str, method: &str, path: &str) {
    info!(
        target: "tollgate::audit",
        host = host,
        method = method,
        path = path,
        decision = "forward",
        "request forwarded with substituted credential"
    );
}
