//! Browser-facing HTTP surface.

use crate::{
    api::{
        cookies::CookieConfig,
        handlers::{auth, callback, health, logout},
    },
    session::SessionManager,
};
use anyhow::Result;
use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    routing::{get, post},
    Extension, Json, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{debug_span, info, Span};
use ulid::Ulid;

pub mod cookies;
mod handlers;
pub mod openapi;

pub use handlers::CSRF_HEADER;

/// Build the router with every route and the request-id and tracing layers.
#[must_use]
pub fn router(manager: SessionManager, cookies: Arc<CookieConfig>) -> Router {
    let document = openapi::openapi();

    Router::new()
        .route("/auth", get(auth::auth))
        .route("/callback", get(callback::callback))
        .route("/logout", post(logout::logout))
        .route("/ping", get(health::ping))
        .route("/probe/liveness", get(health::liveness))
        .route("/probe/readiness", get(health::readiness))
        .route("/version", get(health::version))
        .route(
            "/openapi.json",
            get(move || {
                let document = document.clone();
                async move { Json(document) }
            }),
        )
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(manager))
                .layer(Extension(cookies)),
        )
}

/// Listen on `port` until `cancel` fires.
///
/// # Errors
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn serve(port: u16, router: Router, cancel: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("HTTP listening on [::]:{}", port);

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
            info!("Gracefully shutdown HTTP server");
        })
        .await?;

    Ok(())
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let path = request.uri().path();
    let request_id = headers
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", path, ?headers, request_id)
}
