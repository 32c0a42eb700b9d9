//! Client fingerprint: SHA-256 hex digest over selected request headers.
//! It is a weak anti-theft signal, never an authentication factor.

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

pub const DEFAULT_HEADERS: [&str; 2] = ["user-agent", "accept"];

/// Hash the values of `names` in order. Missing headers contribute an empty
/// value so the digest stays positional.
#[must_use]
pub fn from_headers(headers: &HeaderMap, names: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for name in names {
        let value = headers
            .get(*name)
            .map(|value| value.as_bytes())
            .unwrap_or_default();
        hasher.update(name.as_bytes());
        hasher.update(b":");
        hasher.update(value);
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Fingerprint over [`DEFAULT_HEADERS`].
#[must_use]
pub fn compute(headers: &HeaderMap) -> String {
    from_headers(headers, &DEFAULT_HEADERS)
}

#[must_use]
pub fn matches(expected: &str, actual: &str) -> bool {
    expected.as_bytes().ct_eq(actual.as_bytes()).into()
}
