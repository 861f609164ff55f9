// =============================================================================
// Shared-Secret Authentication — evaluator endpoint
// =============================================================================
//
// The evaluator accepts the secret either as `?key=<secret>` or as
// `Authorization: Bearer <secret>`. Comparison is performed in constant
// time to prevent timing side-channels. A missing or wrong secret is an
// immediate 401 with no state writes and no heartbeat.

use axum::http::HeaderMap;

/// Compare two byte slices in constant time. The comparison always examines
/// every byte even when a mismatch is found early.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        // A length mismatch already leaks that lengths differ, which is
        // acceptable for token authentication (the attacker does not
        // control the expected token length).
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Validate a presented secret (query param and/or bearer header) against
/// the configured one. An empty configured secret rejects everything.
pub fn authorize(expected: &str, query_key: Option<&str>, headers: &HeaderMap) -> bool {
    if expected.is_empty() {
        return false;
    }

    if let Some(key) = query_key {
        if constant_time_eq(key.as_bytes(), expected.as_bytes()) {
            return true;
        }
    }

    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match bearer {
        Some(token) => constant_time_eq(token.as_bytes(), expected.as_bytes()),
        None => false,
    }
}

// =============================================================================
// Tests
// =============================================================================
