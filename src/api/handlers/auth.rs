use super::found;
use crate::{fingerprint, session::SessionManager, Result};
use axum::{
    extract::{Extension, Query},
    http::HeaderMap,
    response::Response,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use utoipa::IntoParams;

#[derive(Debug, Deserialize, IntoParams)]
pub struct AuthQuery {
    /// Tenant whose identity provider should authenticate the user.
    #[serde(default)]
    pub tenant_id: String,
    /// Where the browser returns after a successful login.
    #[serde(default)]
    pub request_uri: String,
}

#[utoipa::path(
    get,
    path = "/auth",
    params(AuthQuery),
    responses(
        (status = 302, description = "Redirect to the identity provider"),
        (status = 400, description = "Missing parameters or unknown tenant"),
        (status = 403, description = "Tenant is blocked"),
    ),
    tag = "session"
)]
pub async fn auth(
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    manager: Extension<SessionManager>,
) -> Result<Response> {
    let fingerprint = fingerprint::compute(&headers);
    let url = manager
        .auth(
            &query.tenant_id,
            &fingerprint,
            &query.request_uri,
            &CancellationToken::new(),
        )
        .await?;
    found(&url)
}
