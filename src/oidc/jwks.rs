//! JWKS cache keyed by the resolved `jwks_uri`, so tenants that share an
//! issuer but override the key set never see each other's keys. Sets are
//! fetched on first use and refetched once when a token names an unknown
//! `kid`.

use super::transport_error;
use crate::{Error, Result};
use jsonwebtoken::{
    jwk::{Jwk, JwkSet},
    DecodingKey,
};
use reqwest::Client;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

#[derive(Clone, Debug, Default)]
pub struct JwksCache {
    entries: Arc<RwLock<HashMap<String, Arc<JwkSet>>>>,
}

impl JwksCache {
    pub async fn invalidate(&self, jwks_uri: &str) {
        self.entries.write().await.remove(jwks_uri);
    }

    /// Resolve the key for `kid`, refreshing the set at most once.
    ///
    /// # Errors
    /// `InvalidRequest` when no usable key matches, transport errors otherwise.
    #[instrument(skip(self, http, timeout))]
    pub async fn decoding_key(
        &self,
        http: &Client,
        jwks_uri: &str,
        kid: Option<&str>,
        timeout: Duration,
    ) -> Result<DecodingKey> {
        let cached = self.entries.read().await.get(jwks_uri).cloned();
        let was_cached = cached.is_some();
        let jwks = match cached {
            Some(jwks) => jwks,
            None => self.refresh(http, jwks_uri, timeout).await?,
        };

        if let Some(jwk) = select_key(&jwks, kid) {
            return decoding_key_from_jwk(jwk);
        }
        if !was_cached {
            return Err(unknown_key(kid));
        }

        debug!("Signing key not in cached JWKS, refreshing");
        let jwks = self.refresh(http, jwks_uri, timeout).await?;
        select_key(&jwks, kid)
            .ok_or_else(|| unknown_key(kid))
            .and_then(decoding_key_from_jwk)
    }

    async fn refresh(
        &self,
        http: &Client,
        jwks_uri: &str,
        timeout: Duration,
    ) -> Result<Arc<JwkSet>> {
        debug!("Fetching JWKS from {jwks_uri}");
        let response = http
            .get(jwks_uri)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| transport_error("failed to fetch jwks", err))?;

        if !response.status().is_success() {
            return Err(Error::PreconditionFailed(format!(
                "invalid OIDC provider: jwks endpoint returned {}",
                response.status()
            )));
        }

        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|err| Error::PreconditionFailed(format!("invalid jwks document: {err}")))?;
        let jwks = Arc::new(jwks);

        self.entries
            .write()
            .await
            .insert(jwks_uri.to_string(), jwks.clone());
        Ok(jwks)
    }
}

fn select_key<'a>(jwks: &'a JwkSet, kid: Option<&str>) -> Option<&'a Jwk> {
    match kid {
        Some(kid) => jwks.find(kid),
        // Without a kid the set must be unambiguous.
        None if jwks.keys.len() == 1 => jwks.keys.first(),
        None => None,
    }
}

fn decoding_key_from_jwk(jwk: &Jwk) -> Result<DecodingKey> {
    DecodingKey::from_jwk(jwk)
        .map_err(|err| Error::invalid_request(format!("unusable signing key: {err}")))
}

fn unknown_key(kid: Option<&str>) -> Error {
    Error::invalid_request(format!(
        "no signing key for kid {}",
        kid.unwrap_or("<none>")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    const N: &str = "yGiWU8Yj6L3gLRfGJLezLcAq3t2pbQ6rHG5TkjIg0eUbV2d2tO2gcoeq71GFo9Bcpw2kKSZC0Z_hqq5PeXUrklrvO84sLYYdFso8XBiBy6Q52kmwdLRmw88ZMHW0y79hjub64i4QXByzSztEK0Sx3bAaop5ktdSXwRkNC-9cyhL63fKQrntf0cjPGbdThgxk0CrKSolgVh6wFTxf9fIZ3c-wvvn2SCMElNRIHQqI_aW7GuVRgzIQS9yVJVRxlNvlrw0JRHzjLTN4iD5wFqvAp8LpBs7VuVFFsHQB9hXiwwvojehG7iQq25SbAgw4VK6X_6OlO9Zw9bRwWIsvsqEb1w";

    fn jwks(kids: &[&str]) -> serde_json::Value {
        let keys: Vec<_> = kids
            .iter()
            .map(|kid| json!({"kty": "RSA", "kid": kid, "use": "sig", "alg": "RS256", "n": N, "e": "AQAB"}))
            .collect();
        json!({ "keys": keys })
    }

    #[tokio::test]
    async fn fetches_once_and_serves_from_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks(&["k1"])))
            .expect(1)
            .mount(&server)
            .await;

        let cache = JwksCache::default();
        let uri = format!("{}/jwks", server.uri());
        let http = Client::new();
        for _ in 0..3 {
            cache
                .decoding_key(&http, &uri, Some("k1"), Duration::from_millis(900))
                .await
                .expect("key");
        }
    }

    #[tokio::test]
    async fn unknown_kid_refreshes_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks(&["k1"])))
            .expect(2)
            .mount(&server)
            .await;

        let cache = JwksCache::default();
        let uri = format!("{}/jwks", server.uri());
        let http = Client::new();
        cache
            .decoding_key(&http, &uri, Some("k1"), Duration::from_millis(900))
            .await
            .expect("key");

        let err = cache
            .decoding_key(&http, &uri, Some("rotated"), Duration::from_millis(900))
            .await
            .err()
            .expect("unknown kid");
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn sets_are_kept_per_jwks_uri() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tenant-a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks(&["a1"])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tenant-b"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks(&["b1"])))
            .expect(1)
            .mount(&server)
            .await;

        let http = Client::new();
        let cache = JwksCache::default();
        let uri_a = format!("{}/tenant-a", server.uri());
        let uri_b = format!("{}/tenant-b", server.uri());
        for _ in 0..2 {
            assert!(cache
                .decoding_key(&http, &uri_a, Some("a1"), Duration::from_millis(900))
                .await
                .is_ok());
            assert!(cache
                .decoding_key(&http, &uri_b, Some("b1"), Duration::from_millis(900))
                .await
                .is_ok());
        }
    }

    #[tokio::test]
    async fn missing_kid_needs_single_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/one"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks(&["k1"])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/two"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks(&["k1", "k2"])))
            .mount(&server)
            .await;

        let http = Client::new();
        let cache = JwksCache::default();
        assert!(cache
            .decoding_key(&http, &format!("{}/one", server.uri()), None, Duration::from_millis(900))
            .await
            .is_ok());
        assert!(cache
            .decoding_key(&http, &format!("{}/two", server.uri()), None, Duration::from_millis(900))
            .await
            .is_err());
    }
}
