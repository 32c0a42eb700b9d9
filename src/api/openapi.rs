use super::handlers::{auth, callback, health, logout};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::auth,
        callback::callback,
        logout::logout,
        health::ping,
        health::liveness,
        health::readiness,
        health::version,
    ),
    components(schemas(health::Version, health::Readiness)),
    tags(
        (name = "session", description = "Browser login and logout"),
        (name = "health", description = "Probes and build information"),
    )
)]
pub struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.info.title = env!("CARGO_PKG_NAME").to_string();
    doc.info.version = env!("CARGO_PKG_VERSION").to_string();
    doc.info.description = Some(env!("CARGO_PKG_DESCRIPTION").to_string());
    doc
}
