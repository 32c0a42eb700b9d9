use super::{found, CSRF_HEADER};
use crate::{
    api::cookies::{self, CookieConfig},
    session::SessionManager,
    trust::validate_tenant_id,
    Error, Result,
};
use axum::{
    extract::{Extension, Query},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use utoipa::IntoParams;

#[derive(Debug, Deserialize, IntoParams)]
pub struct LogoutQuery {
    #[serde(default)]
    pub tenant_id: String,
}

#[utoipa::path(
    post,
    path = "/logout",
    params(LogoutQuery),
    responses(
        (status = 302, description = "Session ended, redirect to the provider or post-logout page"),
        (status = 204, description = "Session ended, no redirect configured"),
        (status = 400, description = "Missing tenant or session cookie"),
        (status = 403, description = "Missing or invalid CSRF token"),
    ),
    tag = "session"
)]
pub async fn logout(
    headers: HeaderMap,
    Query(query): Query<LogoutQuery>,
    manager: Extension<SessionManager>,
    cookies: Extension<Arc<CookieConfig>>,
) -> Result<Response> {
    validate_tenant_id(&query.tenant_id)?;

    let session_id = cookies::read(&headers, &cookies.session.name_for(&query.tenant_id))
        .ok_or_else(|| Error::invalid_request("missing session cookie"))?;
    let csrf_token = headers
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| Error::AccessDenied("missing csrf token".to_string()))?;
    if !manager.verify_csrf(csrf_token, &session_id) {
        return Err(Error::AccessDenied("invalid csrf token".to_string()));
    }

    let url = manager
        .logout(&session_id, &CancellationToken::new())
        .await?;

    let mut response = if url.is_empty() {
        StatusCode::NO_CONTENT.into_response()
    } else {
        found(&url)?
    };
    response
        .headers_mut()
        .append(SET_COOKIE, cookies.session.clear(&query.tenant_id)?);
    response
        .headers_mut()
        .append(SET_COOKIE, cookies.csrf.clear(&query.tenant_id)?);
    Ok(response)
}
