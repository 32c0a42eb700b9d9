#![allow(dead_code)]

use anyhow::{Context, Result};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use sessiond::{
    audit::MemoryAuditSink,
    clock::{Clock, ManualClock},
    csrf::CsrfBinder,
    oidc::{id_token::at_hash_for, AuthorizationRequest, ClientAuth, OidcClient, OidcConfig},
    session::{CallbackOutcome, SessionConfig, SessionManager},
    store::{KeySpace, MemoryKvStore, SessionStore},
    trust::{MemoryTrustRepository, OidcMapping, TrustRegistry},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::{
    matchers::{body_string_contains, method, path},
    Mock, MockGuard, MockServer, ResponseTemplate,
};

pub const TENANT: &str = "acme";
pub const CLIENT_ID: &str = "sessiond-web";
pub const REDIRECT_URI: &str = "https://sessiond.example/callback";
pub const REQUEST_URI: &str = "https://app.example/home";
pub const SUBJECT: &str = "alice";
pub const KID: &str = "k1";

const PRIVATE_KEY: &str = include_str!("../fixtures/idp_key.pem");
const MODULUS: &str = "yGiWU8Yj6L3gLRfGJLezLcAq3t2pbQ6rHG5TkjIg0eUbV2d2tO2gcoeq71GFo9Bcpw2kKSZC0Z_hqq5PeXUrklrvO84sLYYdFso8XBiBy6Q52kmwdLRmw88ZMHW0y79hjub64i4QXByzSztEK0Sx3bAaop5ktdSXwRkNC-9cyhL63fKQrntf0cjPGbdThgxk0CrKSolgVh6wFTxf9fIZ3c-wvvn2SCMElNRIHQqI_aW7GuVRgzIQS9yVJVRxlNvlrw0JRHzjLTN4iD5wFqvAp8LpBs7VuVFFsHQB9hXiwwvojehG7iQq25SbAgw4VK6X_6OlO9Zw9bRwWIsvsqEb1w";

/// Identity provider double: discovery, JWKS, token and end-session
/// endpoints on a local wiremock server.
pub struct Idp {
    pub server: MockServer,
    key: EncodingKey,
}

impl Idp {
    pub async fn start() -> Result<Self> {
        Self::start_with(false).await
    }

    /// `introspection` adds an introspection endpoint to the metadata; its
    /// answers are mounted with [`Idp::introspection`].
    pub async fn start_with(introspection: bool) -> Result<Self> {
        let server = MockServer::start().await;
        let issuer = server.uri();

        let mut metadata = json!({
            "issuer": issuer,
            "authorization_endpoint": format!("{issuer}/authorize"),
            "token_endpoint": format!("{issuer}/token"),
            "jwks_uri": format!("{issuer}/jwks"),
            "end_session_endpoint": format!("{issuer}/logout"),
            "code_challenge_methods_supported": ["S256"],
        });
        if introspection {
            metadata["introspection_endpoint"] = json!(format!("{issuer}/introspect"));
        }
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(metadata))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "keys": [{
                    "kty": "RSA",
                    "kid": KID,
                    "use": "sig",
                    "alg": "RS256",
                    "n": MODULUS,
                    "e": "AQAB",
                }]
            })))
            .mount(&server)
            .await;

        let key = EncodingKey::from_rsa_pem(PRIVATE_KEY.as_bytes()).context("test signing key")?;
        Ok(Self { server, key })
    }

    pub fn issuer(&self) -> String {
        self.server.uri()
    }

    /// Sign an ID token for `nonce`, bound to `access_token` through `at_hash`.
    pub fn id_token(&self, clock: &ManualClock, nonce: &str, access_token: &str) -> Result<String> {
        let now = clock.now().timestamp();
        let claims = json!({
            "iss": self.issuer(),
            "sub": SUBJECT,
            "aud": CLIENT_ID,
            "iat": now,
            "exp": now + 3600,
            "nonce": nonce,
            "at_hash": at_hash_for(Algorithm::RS256, access_token),
            "email": "alice@acme.example",
            "given_name": "Alice",
            "family_name": "Liddell",
            "groups": ["staff"],
            "acr": "urn:acme:mfa",
        });
        self.sign(&claims)
    }

    pub fn sign(&self, claims: &Value) -> Result<String> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(KID.to_string());
        jsonwebtoken::encode(&header, claims, &self.key).context("sign id token")
    }

    /// Answer the next authorization code redemption with `body`.
    pub async fn expect_code_exchange(&self, body: Value) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .up_to_n_times(1)
            .mount(&self.server)
            .await;
    }

    pub async fn expect_refresh(&self, body: Value) {
        self.respond_to_refresh(ResponseTemplate::new(200).set_body_json(body))
            .await;
    }

    pub async fn respond_to_refresh(&self, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }

    /// Answer introspection requests with `response` until the guard drops.
    pub async fn introspection(&self, response: ResponseTemplate) -> MockGuard {
        Mock::given(method("POST"))
            .and(path("/introspect"))
            .respond_with(response)
            .mount_as_scoped(&self.server)
            .await
    }
}

pub struct Fixture {
    pub idp: Idp,
    pub clock: ManualClock,
    pub trust: TrustRegistry,
    pub audit: MemoryAuditSink,
    pub manager: SessionManager,
    pub cancel: CancellationToken,
}

impl Fixture {
    pub async fn new(config: SessionConfig) -> Result<Self> {
        Self::with_idp(Idp::start().await?, config).await
    }

    pub async fn with_idp(idp: Idp, config: SessionConfig) -> Result<Self> {
        let clock = ManualClock::default();

        let trust = TrustRegistry::new(Arc::new(MemoryTrustRepository::default()));
        trust
            .create(
                TENANT,
                OidcMapping::new(TENANT, idp.issuer()).with_audiences([CLIENT_ID]),
            )
            .await?;

        let store = SessionStore::new(
            Arc::new(MemoryKvStore::new(Arc::new(clock.clone()))),
            KeySpace::new("it"),
            Arc::new(clock.clone()),
        );
        let oidc = OidcClient::new(
            reqwest::Client::new(),
            OidcConfig::new(CLIENT_ID, REDIRECT_URI).with_client_auth(ClientAuth::Insecure),
        );
        let audit = MemoryAuditSink::default();
        let manager = SessionManager::new(
            trust.clone(),
            store,
            oidc,
            CsrfBinder::new(&[7u8; 32])?,
            Arc::new(audit.clone()),
            Arc::new(clock.clone()),
            config,
        );

        Ok(Self {
            idp,
            clock,
            trust,
            audit,
            manager,
            cancel: CancellationToken::new(),
        })
    }

    /// Start a login and return the parsed authorization request.
    pub async fn begin_login(&self, fingerprint: &str) -> Result<AuthorizationRequest> {
        let url = self
            .manager
            .auth(TENANT, fingerprint, REQUEST_URI, &self.cancel)
            .await?;
        Ok(AuthorizationRequest::from_url(&url)?)
    }

    /// Full login: the provider grants `access_token` for `expires_in`
    /// seconds together with a refresh token.
    pub async fn login_with(
        &self,
        fingerprint: &str,
        access_token: &str,
        expires_in: i64,
    ) -> Result<CallbackOutcome> {
        let request = self.begin_login(fingerprint).await?;
        let id_token = self.idp.id_token(&self.clock, &request.nonce, access_token)?;
        self.idp
            .expect_code_exchange(json!({
                "access_token": access_token,
                "token_type": "Bearer",
                "refresh_token": "r1",
                "expires_in": expires_in,
                "id_token": id_token,
            }))
            .await;
        Ok(self
            .manager
            .callback(&request.state, "code-1", fingerprint, &self.cancel)
            .await?)
    }

    pub async fn login(&self, fingerprint: &str) -> Result<CallbackOutcome> {
        self.login_with(fingerprint, "a1", 3600).await
    }
}
