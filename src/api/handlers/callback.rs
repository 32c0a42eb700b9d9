use super::found;
use crate::{api::cookies::CookieConfig, fingerprint, session::SessionManager, Error, Result};
use axum::{
    extract::{Extension, Query},
    http::{header::SET_COOKIE, HeaderMap},
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use utoipa::IntoParams;

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct CallbackQuery {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub code: String,
    /// Set by the provider when the login did not succeed.
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[utoipa::path(
    get,
    path = "/callback",
    params(CallbackQuery),
    responses(
        (status = 302, description = "Session established, redirect to the original request"),
        (status = 400, description = "Invalid callback or provider error"),
        (status = 403, description = "Fingerprint mismatch, blocked tenant or denied by the provider"),
        (status = 410, description = "Authorization state expired"),
    ),
    tag = "session"
)]
pub async fn callback(
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
    manager: Extension<SessionManager>,
    cookies: Extension<Arc<CookieConfig>>,
) -> Result<Response> {
    if let Some(error) = query.error {
        let description = query.error_description.unwrap_or_default();
        warn!(error = %error, "Provider returned an error: {description}");
        return Err(if error == "access_denied" {
            Error::AccessDenied(description)
        } else {
            Error::invalid_request(format!("{error}: {description}"))
        });
    }
    if query.state.is_empty() {
        return Err(Error::invalid_request("state is required"));
    }

    let fingerprint = fingerprint::compute(&headers);
    let outcome = manager
        .callback(
            &query.state,
            &query.code,
            &fingerprint,
            &CancellationToken::new(),
        )
        .await?;

    let session_cookie =
        cookies
            .session
            .set(&outcome.tenant_id, &outcome.session_id, cookies.max_age)?;
    let csrf_cookie = cookies
        .csrf
        .set(&outcome.tenant_id, &outcome.csrf_token, cookies.max_age)?;

    let mut response = found(&outcome.redirect_uri)?;
    response.headers_mut().append(SET_COOKIE, session_cookie);
    response.headers_mut().append(SET_COOKIE, csrf_cookie);
    Ok(response)
}
