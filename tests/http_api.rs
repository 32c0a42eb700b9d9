mod common;

use anyhow::Result;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use common::{Fixture, REQUEST_URI, TENANT};
use serde_json::{json, Value};
use sessiond::{
    api::{self, cookies::CookieConfig, CSRF_HEADER},
    oidc::AuthorizationRequest,
    session::SessionConfig,
};
use std::{sync::Arc, time::Duration};
use tower::ServiceExt;

const USER_AGENT: &str = "integration-browser/1.0";

fn router(fx: &Fixture) -> (Router, Arc<CookieConfig>) {
    let cookies = Arc::new(CookieConfig::new(Duration::from_secs(3600)));
    (api::router(fx.manager.clone(), cookies.clone()), cookies)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::USER_AGENT, USER_AGENT)
        .body(Body::empty())
        .expect("request")
}

fn location(response: &axum::response::Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn ping_and_version() -> Result<()> {
    let fx = Fixture::new(SessionConfig::default()).await?;
    let (app, _) = router(&fx);

    let response = app.clone().oneshot(get("/ping")).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await?;
    assert_eq!(&body[..], b"pong");

    let response = app.oneshot(get("/version")).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let x_app = response
        .headers()
        .get("X-App")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(x_app.starts_with(&format!(
        "{}:{}:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )));
    let body: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await?)?;
    assert_eq!(body["name"], env!("CARGO_PKG_NAME"));
    Ok(())
}

#[tokio::test]
async fn readiness_with_memory_backends() -> Result<()> {
    let fx = Fixture::new(SessionConfig::default()).await?;
    let (app, _) = router(&fx);

    let response = app.oneshot(get("/probe/readiness")).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await?)?;
    assert_eq!(body, json!({"database": "ok", "store": "ok"}));
    Ok(())
}

#[tokio::test]
async fn auth_redirects_to_the_provider() -> Result<()> {
    let fx = Fixture::new(SessionConfig::default()).await?;
    let (app, _) = router(&fx);

    let response = app
        .clone()
        .oneshot(get(&format!(
            "/auth?tenant_id={TENANT}&request_uri=https%3A%2F%2Fapp.example%2Fhome"
        )))
        .await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(location(&response).starts_with(&format!("{}/authorize?", fx.idp.issuer())));

    let response = app
        .oneshot(get("/auth?tenant_id=unknown&request_uri=https%3A%2F%2Fapp.example"))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn provider_denial_is_forbidden() -> Result<()> {
    let fx = Fixture::new(SessionConfig::default()).await?;
    let (app, _) = router(&fx);

    let response = app
        .oneshot(get("/callback?error=access_denied&error_description=nope"))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn logout_requires_cookie_and_csrf_token() -> Result<()> {
    let fx = Fixture::new(SessionConfig::default()).await?;
    let (app, cookies) = router(&fx);
    let outcome = fx.login("fp").await?;
    let cookie = format!("{}={}", cookies.session.name_for(TENANT), outcome.session_id);

    let response = app
        .clone()
        .oneshot(
            Request::post(format!("/logout?tenant_id={TENANT}"))
                .header(CSRF_HEADER, outcome.csrf_token.as_str())
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(
            Request::post(format!("/logout?tenant_id={TENANT}"))
                .header(header::COOKIE, cookie.as_str())
                .header(CSRF_HEADER, "forged")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .oneshot(
            Request::post(format!("/logout?tenant_id={TENANT}"))
                .header(header::COOKIE, cookie.as_str())
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn browser_login_and_logout() -> Result<()> {
    let fx = Fixture::new(SessionConfig::default()).await?;
    let (app, cookies) = router(&fx);

    let response = app
        .clone()
        .oneshot(get(&format!(
            "/auth?tenant_id={TENANT}&request_uri=https%3A%2F%2Fapp.example%2Fhome"
        )))
        .await?;
    let request = AuthorizationRequest::from_url(&location(&response))?;

    let id_token = fx.idp.id_token(&fx.clock, &request.nonce, "a1")?;
    fx.idp
        .expect_code_exchange(json!({
            "access_token": "a1",
            "refresh_token": "r1",
            "expires_in": 3600,
            "id_token": id_token,
        }))
        .await;

    let response = app
        .clone()
        .oneshot(get(&format!("/callback?state={}&code=c1", request.state)))
        .await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), REQUEST_URI);

    let set_cookies: Vec<String> = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(str::to_string)
        .collect();
    assert_eq!(set_cookies.len(), 2);
    let value_of = |name: &str| {
        set_cookies
            .iter()
            .find_map(|cookie| {
                cookie
                    .split(';')
                    .next()
                    .and_then(|pair| pair.strip_prefix(&format!("{name}=")))
                    .map(str::to_string)
            })
            .unwrap_or_default()
    };
    let session_id = value_of(&cookies.session.name_for(TENANT));
    let csrf_token = value_of(&cookies.csrf.name_for(TENANT));
    assert!(!session_id.is_empty());
    assert!(set_cookies.iter().any(|cookie| cookie.contains("HttpOnly")));

    let response = app
        .clone()
        .oneshot(
            Request::post(format!("/logout?tenant_id={TENANT}"))
                .header(
                    header::COOKIE,
                    format!("{}={session_id}", cookies.session.name_for(TENANT)),
                )
                .header(CSRF_HEADER, csrf_token)
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(location(&response).starts_with(&format!("{}/logout?", fx.idp.issuer())));
    assert_eq!(response.headers().get_all(header::SET_COOKIE).iter().count(), 2);

    assert!(fx
        .manager
        .store()
        .load_session(&session_id)
        .await
        .unwrap_err()
        .is_not_found());
    Ok(())
}
