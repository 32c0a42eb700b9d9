//! Probe and build information endpoints.
//!
//! - `/ping`: constant reply
//! - `/probe/liveness`: process liveness only
//! - `/probe/readiness`: trust registry and session store reachability
//! - `/version`: build metadata, also exposed through the `X-App` header

use crate::{session::SessionManager, GIT_COMMIT_HASH};
use axum::{
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tokio::time::{timeout, Duration};
use tracing::{error, warn};
use utoipa::ToSchema;

const PROBE_TIMEOUT_SECONDS: u64 = 2;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Version {
    commit: String,
    name: String,
    version: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Readiness {
    database: String,
    store: String,
}

#[utoipa::path(
    get,
    path = "/ping",
    responses((status = 200, description = "pong", body = String)),
    tag = "health",
)]
pub async fn ping() -> &'static str {
    "pong"
}

#[utoipa::path(
    get,
    path = "/probe/liveness",
    responses((status = 200, description = "Process is alive")),
    tag = "health",
)]
pub async fn liveness() -> impl IntoResponse {
    StatusCode::OK
}

#[utoipa::path(
    get,
    path = "/probe/readiness",
    responses(
        (status = 200, description = "Dependencies are reachable", body = Readiness),
        (status = 503, description = "A dependency is not reachable", body = Readiness)
    ),
    tag = "health",
)]
pub async fn readiness(manager: Extension<SessionManager>) -> impl IntoResponse {
    let deadline = Duration::from_secs(PROBE_TIMEOUT_SECONDS);

    let database = match timeout(deadline, manager.trust().ping()).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            error!("Database probe failed: {err}");
            false
        }
        Err(_) => {
            warn!("Database probe timed out");
            false
        }
    };
    let store = match timeout(deadline, manager.store().ping()).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            error!("Session store probe failed: {err}");
            false
        }
        Err(_) => {
            warn!("Session store probe timed out");
            false
        }
    };

    let label = |ok: bool| if ok { "ok" } else { "error" }.to_string();
    let status = if database && store {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(Readiness {
            database: label(database),
            store: label(store),
        }),
    )
}

#[utoipa::path(
    get,
    path = "/version",
    responses((status = 200, description = "Build information", body = Version)),
    tag = "health",
)]
pub async fn version() -> impl IntoResponse {
    let body = Version {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let short_hash = if GIT_COMMIT_HASH.len() > 7 {
        &GIT_COMMIT_HASH[0..7]
    } else {
        ""
    };

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&format!(
        "{}:{}:{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_hash
    )) {
        headers.insert("X-App", value);
    }

    (headers, Json(body))
}
