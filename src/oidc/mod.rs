//! OpenID Connect relying-party client.
//!
//! One [`OidcClient`] is shared by the whole process. It owns the HTTP client,
//! the discovery cache and the JWKS cache; tenant specifics come in through
//! the [`OidcMapping`] passed to each call.

pub mod discovery;
pub mod id_token;
pub mod introspection;
pub mod jwks;
pub mod token;

pub use self::discovery::{DiscoveryCache, ProviderMetadata};
pub use self::id_token::IdTokenClaims;
pub use self::introspection::Introspection;
pub use self::jwks::JwksCache;
pub use self::token::TokenResponse;

use crate::{ids::PKCE_METHOD_S256, trust::OidcMapping, Error, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, Identity};
use std::{fmt, str::FromStr, sync::Arc, time::Duration};
use tracing::{debug, instrument};
use url::Url;

/// Scopes requested on every authorization.
pub const SCOPE: &str = "openid profile email groups";

/// Default deadline for discovery and JWKS requests.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_millis(900);

/// Map a `reqwest` failure: timeouts and refused connections are transient.
pub(crate) fn transport_error(context: &'static str, err: reqwest::Error) -> Error {
    if err.is_timeout() || err.is_connect() {
        Error::TemporarilyUnavailable(format!("{context}: {err}"))
    } else {
        Error::server(context, err)
    }
}

/// How the client authenticates to the token and introspection endpoints.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClientAuth {
    /// TLS client certificate on the shared HTTP client.
    #[default]
    Mtls,
    /// `client_secret` mapping property posted in the form body.
    ClientSecret,
    /// `client_id` only.
    Insecure,
}

impl ClientAuth {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mtls => "mtls",
            Self::ClientSecret => "client_secret",
            Self::Insecure => "insecure",
        }
    }
}

impl fmt::Display for ClientAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientAuth {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mtls" => Ok(Self::Mtls),
            "client_secret" | "client-secret" => Ok(Self::ClientSecret),
            "insecure" => Ok(Self::Insecure),
            other => Err(format!(
                "invalid client auth {other:?}, expected one of: mtls, client_secret, insecure"
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct OidcConfig {
    pub client_id: String,
    pub redirect_uri: String,
    pub client_auth: ClientAuth,
    pub discovery_timeout: Duration,
}

impl OidcConfig {
    #[must_use]
    pub fn new(client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            client_auth: ClientAuth::default(),
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_client_auth(mut self, client_auth: ClientAuth) -> Self {
        self.client_auth = client_auth;
        self
    }

    #[must_use]
    pub const fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }
}

/// Build the process-wide HTTP client.
///
/// # Errors
/// Returns an error if the TLS backend cannot be initialised.
pub fn build_http_client(timeout: Duration, identity: Option<Identity>) -> anyhow::Result<Client> {
    let mut builder = Client::builder()
        .user_agent(crate::APP_USER_AGENT)
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none());
    if let Some(identity) = identity {
        builder = builder.identity(identity);
    }
    Ok(builder.build()?)
}

/// Load a PEM certificate chain and PKCS#8 key for mutual TLS.
///
/// # Errors
/// Returns an error if either file cannot be read or parsed.
pub fn load_identity(cert_path: &str, key_path: &str) -> anyhow::Result<Identity> {
    use anyhow::Context;

    let cert = std::fs::read(cert_path)
        .with_context(|| format!("failed to read mtls certificate {cert_path}"))?;
    let key =
        std::fs::read(key_path).with_context(|| format!("failed to read mtls key {key_path}"))?;
    Identity::from_pkcs8_pem(&cert, &key).context("invalid mtls identity")
}

/// Query parameters of an authorization request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub state: String,
    pub nonce: String,
    pub code_challenge: String,
    pub scope: String,
}

impl AuthorizationRequest {
    /// Append this request to `authorization_endpoint`, keeping any query the
    /// endpoint already carries.
    ///
    /// # Errors
    /// `PreconditionFailed` if the endpoint is not an absolute URL.
    pub fn to_url(&self, authorization_endpoint: &str) -> Result<String> {
        let mut url = Url::parse(authorization_endpoint).map_err(|err| {
            Error::PreconditionFailed(format!("invalid authorization endpoint: {err}"))
        })?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", &self.scope)
            .append_pair("state", &self.state)
            .append_pair("nonce", &self.nonce)
            .append_pair("code_challenge", &self.code_challenge)
            .append_pair("code_challenge_method", PKCE_METHOD_S256);
        Ok(url.into())
    }

    /// Parse an authorization URL produced by [`AuthorizationRequest::to_url`].
    ///
    /// # Errors
    /// `InvalidRequest` if the URL is malformed or a parameter is missing.
    pub fn from_url(url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|err| Error::invalid_request(err.to_string()))?;
        let param = |name: &str| {
            url.query_pairs()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.into_owned())
                .ok_or_else(|| Error::invalid_request(format!("missing {name}")))
        };

        if param("response_type")? != "code" {
            return Err(Error::invalid_request("response_type must be code"));
        }
        if param("code_challenge_method")? != PKCE_METHOD_S256 {
            return Err(Error::invalid_request("code_challenge_method must be S256"));
        }

        Ok(Self {
            client_id: param("client_id")?,
            redirect_uri: param("redirect_uri")?,
            state: param("state")?,
            nonce: param("nonce")?,
            code_challenge: param("code_challenge")?,
            scope: param("scope")?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct OidcClient {
    http: Client,
    discovery: DiscoveryCache,
    jwks: JwksCache,
    config: Arc<OidcConfig>,
}

impl OidcClient {
    #[must_use]
    pub fn new(http: Client, config: OidcConfig) -> Self {
        Self {
            http,
            discovery: DiscoveryCache::default(),
            jwks: JwksCache::default(),
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    #[must_use]
    pub const fn discovery_cache(&self) -> &DiscoveryCache {
        &self.discovery
    }

    /// Provider metadata for `issuer`, from cache when present.
    ///
    /// # Errors
    /// See [`discovery::fetch`].
    pub async fn discover(&self, issuer: &str) -> Result<Arc<ProviderMetadata>> {
        if let Some(metadata) = self.discovery.get(issuer).await {
            return Ok(metadata);
        }
        let metadata =
            Arc::new(discovery::fetch(&self.http, issuer, self.config.discovery_timeout).await?);
        self.discovery.insert(issuer, metadata.clone()).await;
        Ok(metadata)
    }

    /// The mapping `client_id` property wins over the global client id.
    #[must_use]
    pub fn client_id_for<'a>(&'a self, mapping: &'a OidcMapping) -> &'a str {
        mapping
            .property("client_id")
            .unwrap_or(&self.config.client_id)
    }

    #[must_use]
    pub fn jwks_uri_for<'a>(mapping: &'a OidcMapping, metadata: &'a ProviderMetadata) -> &'a str {
        mapping.jwks_uri.as_deref().unwrap_or(&metadata.jwks_uri)
    }

    /// Authorization URL for a new login.
    ///
    /// # Errors
    /// `PreconditionFailed` if the provider endpoint is not a valid URL.
    pub fn authorization_url(
        &self,
        metadata: &ProviderMetadata,
        mapping: &OidcMapping,
        state: &str,
        code_challenge: &str,
        nonce: &str,
    ) -> Result<String> {
        AuthorizationRequest {
            client_id: self.client_id_for(mapping).to_string(),
            redirect_uri: self.config.redirect_uri.clone(),
            state: state.to_string(),
            nonce: nonce.to_string(),
            code_challenge: code_challenge.to_string(),
            scope: SCOPE.to_string(),
        }
        .to_url(&metadata.authorization_endpoint)
    }

    /// Form body for a token or introspection request: `base` plus the
    /// mapping properties, with `base` taking precedence.
    fn form_params(
        &self,
        mapping: &OidcMapping,
        base: Vec<(&'static str, String)>,
    ) -> Result<Vec<(String, String)>> {
        let mut params: Vec<(String, String)> = base
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect();
        params.push((
            "client_id".to_string(),
            self.client_id_for(mapping).to_string(),
        ));

        if self.config.client_auth == ClientAuth::ClientSecret
            && mapping.property("client_secret").is_none()
        {
            return Err(Error::PreconditionFailed(format!(
                "tenant {} has no client_secret property",
                mapping.tenant_id
            )));
        }

        for (key, value) in &mapping.properties {
            if key == "client_secret" && self.config.client_auth != ClientAuth::ClientSecret {
                continue;
            }
            if params.iter().any(|(existing, _)| existing == key) {
                continue;
            }
            params.push((key.clone(), value.clone()));
        }
        Ok(params)
    }

    /// Exchange an authorization code.
    ///
    /// # Errors
    /// See [`token::request`].
    #[instrument(skip_all, fields(tenant_id = %mapping.tenant_id))]
    pub async fn exchange_code(
        &self,
        metadata: &ProviderMetadata,
        mapping: &OidcMapping,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse> {
        let params = self.form_params(
            mapping,
            vec![
                ("grant_type", "authorization_code".to_string()),
                ("code", code.to_string()),
                ("code_verifier", code_verifier.to_string()),
                ("redirect_uri", self.config.redirect_uri.clone()),
            ],
        )?;
        token::request(&self.http, &metadata.token_endpoint, &params).await
    }

    /// Redeem a refresh token.
    ///
    /// # Errors
    /// See [`token::request`].
    #[instrument(skip_all, fields(tenant_id = %mapping.tenant_id))]
    pub async fn refresh(
        &self,
        metadata: &ProviderMetadata,
        mapping: &OidcMapping,
        refresh_token: &str,
    ) -> Result<TokenResponse> {
        let params = self.form_params(
            mapping,
            vec![
                ("grant_type", "refresh_token".to_string()),
                ("refresh_token", refresh_token.to_string()),
            ],
        )?;
        token::request(&self.http, &metadata.token_endpoint, &params).await
    }

    /// Introspect `access_token`; `None` when the provider does not advertise
    /// an introspection endpoint.
    ///
    /// # Errors
    /// See [`introspection::request`].
    #[instrument(skip_all, fields(tenant_id = %mapping.tenant_id))]
    pub async fn introspect(
        &self,
        metadata: &ProviderMetadata,
        mapping: &OidcMapping,
        access_token: &str,
    ) -> Result<Option<Introspection>> {
        let Some(endpoint) = metadata.introspection_endpoint.as_deref() else {
            debug!("Provider does not advertise introspection");
            return Ok(None);
        };
        let params = self.form_params(
            mapping,
            vec![
                ("token", access_token.to_string()),
                ("token_type_hint", "access_token".to_string()),
            ],
        )?;
        introspection::request(&self.http, endpoint, &params)
            .await
            .map(Some)
    }

    /// Verify an ID token issued to `mapping`'s tenant.
    ///
    /// # Errors
    /// `InvalidAtHashToken` or `InvalidRequest` on verification failure,
    /// transport errors while fetching keys.
    #[instrument(skip_all, fields(tenant_id = %mapping.tenant_id))]
    pub async fn verify_id_token(
        &self,
        metadata: &ProviderMetadata,
        mapping: &OidcMapping,
        raw: &str,
        nonce: Option<&str>,
        access_token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<IdTokenClaims> {
        let header = id_token::header(raw)?;
        let key = self
            .jwks
            .decoding_key(
                &self.http,
                Self::jwks_uri_for(mapping, metadata),
                header.kid.as_deref(),
                self.config.discovery_timeout,
            )
            .await?;
        id_token::verify(
            raw,
            &header,
            &key,
            &id_token::Expectations {
                issuer: &mapping.issuer_url,
                audiences: &mapping.audiences,
                nonce,
                access_token,
                now,
            },
        )
    }

    /// RP-initiated logout URL, when the provider supports it.
    #[must_use]
    pub fn end_session_url(
        &self,
        metadata: &ProviderMetadata,
        mapping: &OidcMapping,
        id_token_hint: Option<&str>,
        post_logout_redirect_uri: &str,
    ) -> Option<String> {
        let endpoint = metadata.end_session_endpoint.as_deref()?;
        let mut url = Url::parse(endpoint).ok()?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(hint) = id_token_hint {
                query.append_pair("id_token_hint", hint);
            }
            if !post_logout_redirect_uri.is_empty() {
                query.append_pair("post_logout_redirect_uri", post_logout_redirect_uri);
            }
            query.append_pair("client_id", self.client_id_for(mapping));
        }
        Some(url.into())
    }
}
