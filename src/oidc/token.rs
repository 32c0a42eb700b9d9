//! Token endpoint requests (authorization code and refresh grants).

use super::transport_error;
use crate::{Error, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::fmt;
use tracing::{debug, warn};

#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds.
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token_type", &self.token_type)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "***"))
            .field("expires_in", &self.expires_in)
            .field("id_token", &self.id_token.as_ref().map(|_| "***"))
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// RFC 6749 section 5.2 error body.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct OAuthError {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl fmt::Display for OAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_description {
            Some(description) => write!(f, "{}: {description}", self.error),
            None => f.write_str(&self.error),
        }
    }
}

/// Map a non-2xx provider response: 5xx is transient, anything else is a
/// rejected request.
pub(crate) async fn status_error(endpoint: &'static str, response: reqwest::Response) -> Error {
    let status = response.status();
    let body: OAuthError = response.json().await.unwrap_or_default();
    warn!(%status, error = %body, "{endpoint} endpoint rejected request");
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Error::TemporarilyUnavailable(format!("{endpoint} endpoint returned {status}"))
    } else {
        Error::invalid_request(format!("{endpoint} endpoint returned {status}: {body}"))
    }
}

/// POST a form to the token endpoint.
///
/// # Errors
/// `TemporarilyUnavailable` on timeout or 5xx, `InvalidRequest` on 4xx or a
/// malformed body.
pub async fn request(
    http: &Client,
    token_endpoint: &str,
    params: &[(String, String)],
) -> Result<TokenResponse> {
    debug!("POST {token_endpoint}");
    let response = http
        .post(token_endpoint)
        .form(params)
        .send()
        .await
        .map_err(|err| transport_error("token request failed", err))?;

    if !response.status().is_success() {
        return Err(status_error("token", response).await);
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|err| Error::invalid_request(format!("invalid token response: {err}")))?;
    if token.access_token.is_empty() {
        return Err(Error::invalid_request("token response without access_token"));
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::{
        matchers::{body_string_contains, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn params() -> Vec<(String, String)> {
        vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), "r1".to_string()),
        ]
    }

    #[tokio::test]
    async fn posts_form_and_parses_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "a2",
                "token_type": "Bearer",
                "expires_in": 300,
                "refresh_token": "r2",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = request(&Client::new(), &format!("{}/token", server.uri()), &params())
            .await
            .expect("token");
        assert_eq!(token.access_token, "a2");
        assert_eq!(token.refresh_token.as_deref(), Some("r2"));
        assert_eq!(token.expires_in, Some(300));
        assert!(!format!("{token:?}").contains("r2"));
    }

    #[tokio::test]
    async fn status_classes_map_to_error_kinds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bad"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let http = Client::new();
        let err = request(&http, &format!("{}/bad", server.uri()), &params())
            .await
            .expect_err("400");
        assert!(matches!(err, Error::InvalidRequest(ref m) if m.contains("invalid_grant")));

        let err = request(&http, &format!("{}/down", server.uri()), &params())
            .await
            .expect_err("503");
        assert!(matches!(err, Error::TemporarilyUnavailable(_)));
    }

    #[tokio::test]
    async fn timeout_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "a"}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let http = Client::builder()
            .timeout(Duration::from_millis(50))
            .build()
            .expect("client");
        let err = request(&http, &format!("{}/token", server.uri()), &params())
            .await
            .expect_err("timeout");
        assert!(matches!(err, Error::TemporarilyUnavailable(_)));
    }
}
