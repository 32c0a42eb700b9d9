//! RFC 7662 token introspection.

use super::{token::status_error, transport_error};
use crate::{Error, Result};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Introspection {
    pub active: bool,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    /// Provider-side group membership; replaces the ID token groups when set.
    #[serde(default)]
    pub groups: Option<Vec<String>>,
}

/// POST the token to the introspection endpoint.
///
/// # Errors
/// `TemporarilyUnavailable` on timeout or 5xx, `InvalidRequest` otherwise.
pub async fn request(
    http: &Client,
    endpoint: &str,
    params: &[(String, String)],
) -> Result<Introspection> {
    debug!("POST {endpoint}");
    let response = http
        .post(endpoint)
        .form(params)
        .send()
        .await
        .map_err(|err| transport_error("introspection request failed", err))?;

    if !response.status().is_success() {
        return Err(status_error("introspection", response).await);
    }

    response
        .json()
        .await
        .map_err(|err| Error::invalid_request(format!("invalid introspection response: {err}")))
}
