//! OIDC discovery and the per-issuer metadata cache.

use super::transport_error;
use crate::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

/// Subset of the provider metadata document this service uses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    #[serde(default)]
    pub introspection_endpoint: Option<String>,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
}

/// `<issuer>/.well-known/openid-configuration`, ignoring a trailing slash on
/// the issuer.
#[must_use]
pub fn well_known_url(issuer: &str) -> String {
    let issuer = issuer.trim_end_matches('/');
    format!("{issuer}/.well-known/openid-configuration")
}

/// Issuer-keyed metadata cache. Entries never expire; they are replaced only
/// through [`DiscoveryCache::invalidate`] or [`DiscoveryCache::clear`].
#[derive(Clone, Debug, Default)]
pub struct DiscoveryCache {
    entries: Arc<RwLock<HashMap<String, Arc<ProviderMetadata>>>>,
}

impl DiscoveryCache {
    pub async fn get(&self, issuer: &str) -> Option<Arc<ProviderMetadata>> {
        self.entries.read().await.get(issuer).cloned()
    }

    pub async fn insert(&self, issuer: &str, metadata: Arc<ProviderMetadata>) {
        self.entries
            .write()
            .await
            .insert(issuer.to_string(), metadata);
    }

    pub async fn invalidate(&self, issuer: &str) {
        self.entries.write().await.remove(issuer);
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Fetch and validate the metadata document for `issuer`.
///
/// # Errors
/// `PreconditionFailed` when the document is unusable or names a different
/// issuer, `TemporarilyUnavailable` on timeout.
#[instrument(skip(http))]
pub async fn fetch(http: &Client, issuer: &str, timeout: Duration) -> Result<ProviderMetadata> {
    let url = well_known_url(issuer);
    debug!("Fetching provider metadata from {url}");

    let response = http
        .get(&url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|err| transport_error("failed to fetch provider metadata", err))?;

    if !response.status().is_success() {
        return Err(Error::PreconditionFailed(format!(
            "invalid OIDC provider: discovery returned {}",
            response.status()
        )));
    }

    let metadata: ProviderMetadata = response.json().await.map_err(|err| {
        if err.is_timeout() {
            transport_error("failed to read provider metadata", err)
        } else {
            Error::PreconditionFailed(format!("invalid OIDC provider: {err}"))
        }
    })?;

    if metadata.issuer != issuer {
        return Err(Error::PreconditionFailed(format!(
            "invalid OIDC provider: discovery issuer {:?} does not match {:?}",
            metadata.issuer, issuer
        )));
    }

    info!(
        authorization_endpoint = %metadata.authorization_endpoint,
        token_endpoint = %metadata.token_endpoint,
        "Discovered OIDC provider"
    );

    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn document(issuer: &str) -> serde_json::Value {
        json!({
            "issuer": issuer,
            "authorization_endpoint": format!("{issuer}/authorize"),
            "token_endpoint": format!("{issuer}/token"),
            "jwks_uri": format!("{issuer}/jwks"),
        })
    }

    #[test]
    fn well_known_url_trims_trailing_slash() {
        assert_eq!(
            well_known_url("https://idp/"),
            "https://idp/.well-known/openid-configuration"
        );
        assert_eq!(
            well_known_url("https://idp/realms/a"),
            "https://idp/realms/a/.well-known/openid-configuration"
        );
    }

    #[tokio::test]
    async fn fetch_accepts_matching_issuer() {
        let server = MockServer::start().await;
        let issuer = format!("{}/", server.uri());
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(document(&issuer)))
            .expect(1)
            .mount(&server)
            .await;

        let metadata = fetch(&Client::new(), &issuer, Duration::from_millis(900))
            .await
            .expect("discovery");
        assert_eq!(metadata.issuer, issuer);
        assert_eq!(metadata.introspection_endpoint, None);
    }

    #[tokio::test]
    async fn fetch_rejects_issuer_mismatch() {
        let server = MockServer::start().await;
        let issuer = format!("{}/", server.uri());
        // Same issuer without the trailing slash is a different issuer.
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(document(&server.uri())))
            .mount(&server)
            .await;

        let err = fetch(&Client::new(), &issuer, Duration::from_millis(900))
            .await
            .expect_err("mismatch");
        assert!(matches!(err, Error::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn fetch_times_out_quickly() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(document(&server.uri()))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let err = fetch(&Client::new(), &server.uri(), Duration::from_millis(50))
            .await
            .expect_err("timeout");
        assert!(matches!(err, Error::TemporarilyUnavailable(_)));
    }

    #[tokio::test]
    async fn cache_invalidate_and_clear() {
        let cache = DiscoveryCache::default();
        let metadata: ProviderMetadata =
            serde_json::from_value(document("https://idp")).expect("metadata");
        cache.insert("https://idp", Arc::new(metadata.clone())).await;
        cache.insert("https://other", Arc::new(metadata)).await;
        assert_eq!(cache.len().await, 2);

        cache.invalidate("https://idp").await;
        assert!(cache.get("https://idp").await.is_none());
        assert!(cache.get("https://other").await.is_some());

        cache.clear().await;
        assert!(cache.is_empty().await);
    }
}
