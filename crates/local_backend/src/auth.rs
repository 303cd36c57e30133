//! Bearer-token check for operator-protected endpoints (`POST
//! /backfill/start`, per §4.2.1). Compared in constant time so response
//! latency can't leak how many leading bytes of a guessed token matched.

use axum::http::HeaderMap;
use errors::ErrorMetadata;

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

pub fn require_operator_bearer(headers: &HeaderMap, expected: &str) -> anyhow::Result<()> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| anyhow::anyhow!("missing authorization header").context(ErrorMetadata::unauthenticated("MissingAuth", "missing authorization header")))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| anyhow::anyhow!("malformed authorization header").context(ErrorMetadata::unauthenticated("MalformedAuth", "authorization header must be a bearer token")))?;
    if !constant_time_eq(token.as_bytes(), expected.as_bytes()) {
        anyhow::bail!(ErrorMetadata::unauthenticated("InvalidOperatorToken", "invalid operator bearer token"));
    }
    Ok(())
}
