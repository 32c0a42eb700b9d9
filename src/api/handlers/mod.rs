pub mod auth;
pub mod callback;
pub mod health;
pub mod logout;

use crate::{Error, Result};
use axum::{
    http::{header::LOCATION, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

/// Header carrying the CSRF token on state-changing requests.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// 302 to `location`.
pub(crate) fn found(location: &str) -> Result<Response> {
    let location = HeaderValue::from_str(location)
        .map_err(|err| Error::server("invalid redirect location", err))?;
    Ok((StatusCode::FOUND, [(LOCATION, location)]).into_response())
}
