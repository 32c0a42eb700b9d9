//! Session lifecycle: login initiation, callback, validation, logout and the
//! maintenance operations driven by the housekeeper.

mod config;

pub use self::config::{SessionConfig, DEFAULT_IDLE_TIMEOUT, DEFAULT_SESSION_DURATION};

use self::config::to_chrono;
use crate::{
    audit::{redact, AuditEvent, AuditSink},
    clock::Clock,
    csrf::CsrfBinder,
    fingerprint, ids,
    oidc::{IdTokenClaims, OidcClient},
    store::{AuthState, Claims, Session, SessionStore},
    trust::{validate_tenant_id, OidcMapping, TrustRegistry},
    Error, Result,
};
use chrono::{DateTime, Utc};
use std::{fmt, future::Future, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Drop `fut` when `cancel` fires.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    cancel
        .run_until_cancelled(fut)
        .await
        .unwrap_or_else(|| Err(Error::Canceled))
}

/// Result of a successful callback.
#[derive(Clone)]
pub struct CallbackOutcome {
    pub session_id: String,
    pub csrf_token: String,
    pub redirect_uri: String,
    pub tenant_id: String,
    pub expiry: DateTime<Utc>,
}

impl fmt::Debug for CallbackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackOutcome")
            .field("session_id", &redact(&self.session_id))
            .field("redirect_uri", &self.redirect_uri)
            .field("tenant_id", &self.tenant_id)
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

/// Why a session failed validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidReason {
    Inactive,
    Missing,
    UnknownTenant,
    Blocked,
    FingerprintMismatch,
    TenantMismatch,
    TokenInactive,
}

impl InvalidReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Missing => "missing",
            Self::UnknownTenant => "unknown_tenant",
            Self::Blocked => "blocked",
            Self::FingerprintMismatch => "fingerprint_mismatch",
            Self::TenantMismatch => "tenant_mismatch",
            Self::TokenInactive => "token_inactive",
        }
    }
}

#[derive(Clone, Debug)]
pub enum SessionValidation {
    Valid(Box<Session>),
    Invalid(InvalidReason),
}

impl SessionValidation {
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::Valid(session) => Some(session),
            Self::Invalid(_) => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    /// The provider granted a token that had already expired; the session
    /// was removed.
    Evicted,
}

#[derive(Clone)]
pub struct SessionManager {
    trust: TrustRegistry,
    store: SessionStore,
    oidc: OidcClient,
    csrf: Arc<CsrfBinder>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    config: Arc<SessionConfig>,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        trust: TrustRegistry,
        store: SessionStore,
        oidc: OidcClient,
        csrf: CsrfBinder,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        Self {
            trust,
            store,
            oidc,
            csrf: Arc::new(csrf),
            audit,
            clock,
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub const fn store(&self) -> &SessionStore {
        &self.store
    }

    #[must_use]
    pub const fn trust(&self) -> &TrustRegistry {
        &self.trust
    }

    #[must_use]
    pub const fn oidc(&self) -> &OidcClient {
        &self.oidc
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn verify_csrf(&self, token: &str, session_id: &str) -> bool {
        self.csrf.verify(token, session_id)
    }

    /// Mapping usable for a new login: unknown tenants are a bad request,
    /// blocked tenants are denied.
    async fn login_mapping(&self, tenant_id: &str) -> Result<OidcMapping> {
        let mapping = match self.trust.get(tenant_id).await {
            Ok(mapping) => mapping,
            Err(err) if err.is_not_found() => {
                return Err(Error::invalid_request(format!("unknown tenant {tenant_id}")))
            }
            Err(err) => return Err(err),
        };
        if mapping.blocked {
            return Err(Error::AccessDenied(format!("tenant {tenant_id} is blocked")));
        }
        Ok(mapping)
    }

    /// Start a login and return the provider authorization URL.
    ///
    /// # Errors
    /// `InvalidRequest` for bad input or unknown tenants, `AccessDenied` for
    /// blocked tenants, discovery and storage errors otherwise.
    #[instrument(skip(self, fingerprint, cancel))]
    pub async fn auth(
        &self,
        tenant_id: &str,
        fingerprint: &str,
        request_uri: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        cancellable(cancel, async {
            validate_tenant_id(tenant_id)?;
            if request_uri.is_empty() {
                return Err(Error::invalid_request("request_uri is required"));
            }
            if fingerprint.is_empty() {
                return Err(Error::invalid_request("fingerprint is required"));
            }

            let mapping = self.login_mapping(tenant_id).await?;

            let state_id = ids::new_state()?;
            let pkce = ids::new_pkce()?;
            let nonce = ids::new_nonce()?;
            let state = AuthState {
                id: state_id.clone(),
                tenant_id: tenant_id.to_string(),
                fingerprint: fingerprint.to_string(),
                pkce_verifier: pkce.verifier.clone(),
                nonce: nonce.clone(),
                request_uri: request_uri.to_string(),
                expiry: self.clock.now() + to_chrono(self.config.session_duration),
            };
            self.store.store_state(&state).await?;

            let metadata = self.oidc.discover(&mapping.issuer_url).await?;
            let url =
                self.oidc
                    .authorization_url(&metadata, &mapping, &state_id, &pkce.challenge, &nonce)?;

            self.audit.record(AuditEvent::AuthInitiated {
                tenant_id: tenant_id.to_string(),
            });
            Ok(url)
        })
        .await
    }

    /// Complete a login: redeem the code, verify the ID token and bind a
    /// new session to the fingerprint that started the login.
    ///
    /// # Errors
    /// `StateExpired` for unknown or expired states, `FingerprintMismatch`,
    /// `AccessDenied` for blocked tenants, verification and storage errors.
    #[instrument(skip_all)]
    pub async fn callback(
        &self,
        state_id: &str,
        code: &str,
        fingerprint: &str,
        cancel: &CancellationToken,
    ) -> Result<CallbackOutcome> {
        let state = cancellable(cancel, async {
            match self.store.load_state(state_id).await {
                Ok(state) => Ok(state),
                Err(err) if err.is_not_found() => Err(Error::StateExpired),
                Err(err) => Err(err),
            }
        })
        .await?;

        if self.clock.now() >= state.expiry {
            if let Err(err) = self.store.delete_state(state_id).await {
                warn!("Failed to delete expired state: {err}");
            }
            return Err(Error::StateExpired);
        }
        if !fingerprint::matches(&state.fingerprint, fingerprint) {
            warn!(tenant_id = %state.tenant_id, "Callback fingerprint does not match login");
            return Err(Error::FingerprintMismatch);
        }

        let result = self.complete_login(&state, code, cancel).await;
        match &result {
            Ok(outcome) => {
                info!(tenant_id = %outcome.tenant_id, session_id = %redact(&outcome.session_id), "Login completed");
            }
            Err(err) => {
                warn!(tenant_id = %state.tenant_id, "Login failed: {err}");
                self.audit.record(AuditEvent::AuthFailure {
                    tenant_id: state.tenant_id.clone(),
                    reason: err.code().to_string(),
                });
            }
        }
        result
    }

    async fn complete_login(
        &self,
        state: &AuthState,
        code: &str,
        cancel: &CancellationToken,
    ) -> Result<CallbackOutcome> {
        if code.is_empty() {
            return Err(Error::invalid_request("code is required"));
        }

        let (mapping, token, claims) = cancellable(cancel, async {
            let mapping = self.login_mapping(&state.tenant_id).await?;
            let metadata = self.oidc.discover(&mapping.issuer_url).await?;
            let token = self
                .oidc
                .exchange_code(&metadata, &mapping, code, &state.pkce_verifier)
                .await?;
            let raw = token
                .id_token
                .as_deref()
                .ok_or_else(|| Error::invalid_request("token response without id_token"))?;
            let nonce = Some(state.nonce.as_str()).filter(|nonce| !nonce.is_empty());
            let claims = self
                .oidc
                .verify_id_token(
                    &metadata,
                    &mapping,
                    raw,
                    nonce,
                    Some(&token.access_token),
                    self.clock.now(),
                )
                .await?;
            Ok((mapping, token, claims))
        })
        .await?;

        let session_id = ids::new_session_id()?;
        let csrf_token = self.csrf.mint(&session_id)?;

        let now = self.clock.now();
        let expiry = now + to_chrono(self.config.session_duration);
        let access_token_expiry = token
            .expires_in
            .map(|seconds| token_expiry(now, seconds, expiry))
            .or_else(|| claims.expires_at())
            .unwrap_or(now);

        let session = Session {
            id: session_id.clone(),
            tenant_id: state.tenant_id.clone(),
            fingerprint: state.fingerprint.clone(),
            issuer: mapping.issuer_url.clone(),
            provider_id: claims.sub.clone(),
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            id_token: token.id_token,
            expiry,
            access_token_expiry,
            claims: session_claims(&claims),
            auth_context: claims.auth_context(),
        };

        self.store.store_session(&session, cancel).await?;
        if let Err(err) = self.store.delete_state(&state.id).await {
            warn!("Failed to delete consumed state: {err}");
        }

        if let Err(err) = self
            .store
            .bump_active(&session_id, self.config.idle_timeout)
            .await
        {
            if let Err(cleanup) = self.store.delete_session(&session).await {
                warn!("Failed to remove unusable session: {cleanup}");
            }
            return Err(err);
        }

        self.audit.record(AuditEvent::AuthSuccess {
            tenant_id: state.tenant_id.clone(),
            session_id: session_id.clone(),
            subject: session.provider_id.clone(),
        });

        Ok(CallbackOutcome {
            session_id,
            csrf_token,
            redirect_uri: state.request_uri.clone(),
            tenant_id: state.tenant_id.clone(),
            expiry,
        })
    }

    /// Decide whether `session_id` is usable by `tenant_id` from a client
    /// presenting `fingerprint`. Invalid sessions are not errors.
    ///
    /// # Errors
    /// Storage, discovery and introspection infrastructure failures only.
    #[instrument(skip_all, fields(tenant_id = %tenant_id))]
    pub async fn validate(
        &self,
        session_id: &str,
        tenant_id: &str,
        fingerprint: &str,
        cancel: &CancellationToken,
    ) -> Result<SessionValidation> {
        cancellable(cancel, self.validate_inner(session_id, tenant_id, fingerprint)).await
    }

    async fn validate_inner(
        &self,
        session_id: &str,
        tenant_id: &str,
        fingerprint: &str,
    ) -> Result<SessionValidation> {
        let invalid = |reason: InvalidReason| -> Result<SessionValidation> {
            warn!(session_id = %redact(session_id), reason = reason.as_str(), "Session rejected");
            Ok(SessionValidation::Invalid(reason))
        };

        if !self.store.is_active(session_id).await? {
            return invalid(InvalidReason::Inactive);
        }

        let mut session = match self.store.load_session(session_id).await {
            Ok(session) => session,
            Err(err) if err.is_not_found() => return invalid(InvalidReason::Missing),
            Err(err) => return Err(err),
        };

        let mapping = match self.trust.get(&session.tenant_id).await {
            Ok(mapping) => mapping,
            Err(err) if err.is_not_found() => return invalid(InvalidReason::UnknownTenant),
            Err(err) => return Err(err),
        };
        if mapping.blocked {
            return invalid(InvalidReason::Blocked);
        }

        if !fingerprint::matches(&session.fingerprint, fingerprint) {
            warn!(session_id = %redact(session_id), "Client fingerprint changed");
            if self.config.enforce_fingerprint {
                return invalid(InvalidReason::FingerprintMismatch);
            }
        }

        if session.tenant_id != tenant_id {
            return invalid(InvalidReason::TenantMismatch);
        }

        let metadata = self.oidc.discover(&mapping.issuer_url).await?;
        if let Some(introspection) = self
            .oidc
            .introspect(&metadata, &mapping, &session.access_token)
            .await?
        {
            if !introspection.active {
                warn!(session_id = %redact(session_id), "Provider reports the access token inactive");
                if self.config.enforce_introspection {
                    return invalid(InvalidReason::TokenInactive);
                }
            }
            if let Some(groups) = introspection.groups {
                session.claims.groups = groups;
            }
        }

        if let Err(err) = self
            .store
            .bump_active(session_id, self.config.idle_timeout)
            .await
        {
            warn!("Failed to extend idle window: {err}");
        }

        debug!(session_id = %redact(session_id), "Session valid");
        Ok(SessionValidation::Valid(Box::new(session)))
    }

    /// End a session and return where the browser should go next.
    ///
    /// # Errors
    /// Storage failures while loading or deleting the session.
    #[instrument(skip_all)]
    pub async fn logout(&self, session_id: &str, cancel: &CancellationToken) -> Result<String> {
        cancellable(cancel, async {
            let fallback = self.config.post_logout_redirect_url.clone();
            let session = match self.store.load_session(session_id).await {
                Ok(session) => session,
                Err(err) if err.is_not_found() => {
                    debug!("Logout for unknown session");
                    return Ok(fallback);
                }
                Err(err) => return Err(err),
            };

            self.store.delete_session(&session).await?;
            self.audit.record(AuditEvent::Logout {
                tenant_id: session.tenant_id.clone(),
                session_id: session.id.clone(),
            });

            let mapping = match self.trust.get(&session.tenant_id).await {
                Ok(mapping) => mapping,
                Err(err) => {
                    warn!("No mapping for logout redirect: {err}");
                    return Ok(fallback);
                }
            };
            let metadata = match self.oidc.discover(&mapping.issuer_url).await {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!("Discovery failed during logout: {err}");
                    return Ok(fallback);
                }
            };

            Ok(self
                .oidc
                .end_session_url(&metadata, &mapping, session.id_token.as_deref(), &fallback)
                .unwrap_or(fallback))
        })
        .await
    }

    /// Redeem the session refresh token and store the new tokens. Without
    /// `expires_in` or an ID token the new access token is assumed to live as
    /// long as the session.
    ///
    /// # Errors
    /// Provider rejections and storage failures. The stored session is left
    /// untouched when the provider call fails and stays loadable when the
    /// write fails.
    #[instrument(skip_all, fields(tenant_id = %session.tenant_id))]
    pub async fn refresh(
        &self,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Result<RefreshOutcome> {
        let refresh_token = session
            .refresh_token
            .as_deref()
            .ok_or_else(|| Error::PreconditionFailed("session has no refresh token".to_string()))?;

        let (token, claims) = cancellable(cancel, async {
            let mapping = self.trust.get(&session.tenant_id).await?;
            if mapping.blocked {
                return Err(Error::AccessDenied(format!(
                    "tenant {} is blocked",
                    session.tenant_id
                )));
            }
            let metadata = self.oidc.discover(&mapping.issuer_url).await?;
            let token = self.oidc.refresh(&metadata, &mapping, refresh_token).await?;
            let claims = match token.id_token.as_deref() {
                Some(raw) => Some(
                    self.oidc
                        .verify_id_token(
                            &metadata,
                            &mapping,
                            raw,
                            None,
                            Some(&token.access_token),
                            self.clock.now(),
                        )
                        .await?,
                ),
                None => None,
            };
            Ok((token, claims))
        })
        .await?;

        let now = self.clock.now();
        let access_token_expiry = token
            .expires_in
            .map(|seconds| token_expiry(now, seconds, session.expiry))
            .or_else(|| claims.as_ref().and_then(IdTokenClaims::expires_at))
            .unwrap_or_else(|| {
                debug!(session_id = %redact(&session.id), "Refresh response carries no expiry");
                session.expiry
            });

        if access_token_expiry <= now {
            warn!(session_id = %redact(&session.id), "Refreshed token already expired, removing session");
            self.store.delete_session(session).await?;
            self.audit.record(AuditEvent::SessionEvicted {
                tenant_id: session.tenant_id.clone(),
                session_id: session.id.clone(),
            });
            return Ok(RefreshOutcome::Evicted);
        }

        let mut updated = session.clone();
        updated.access_token = token.access_token;
        if let Some(rotated) = token.refresh_token {
            updated.refresh_token = Some(rotated);
        }
        if let Some(id_token) = token.id_token {
            updated.id_token = Some(id_token);
        }
        updated.access_token_expiry = access_token_expiry;

        self.store.update_session(&updated).await?;
        debug!(session_id = %redact(&session.id), "Access token refreshed");
        Ok(RefreshOutcome::Refreshed)
    }

    /// Remove the session when its idle marker is gone or older than
    /// `idle_timeout`. Returns whether it was removed.
    ///
    /// # Errors
    /// Storage failures only.
    pub async fn evict_idle(
        &self,
        session: &Session,
        idle_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        cancellable(cancel, async {
            let idle = match self.store.last_active(&session.id).await? {
                None => true,
                Some(last_seen) => self.clock.now() - last_seen > to_chrono(idle_timeout),
            };
            if !idle {
                return Ok(false);
            }

            self.store.delete_session(session).await?;
            self.audit.record(AuditEvent::SessionEvicted {
                tenant_id: session.tenant_id.clone(),
                session_id: session.id.clone(),
            });
            info!(session_id = %redact(&session.id), "Evicted idle session");
            Ok(true)
        })
        .await
    }
}

/// `now + seconds` from a provider `expires_in`. Lifetimes that do not fit
/// a timestamp are capped at `ceiling`, or treated as already expired when
/// negative.
fn token_expiry(now: DateTime<Utc>, seconds: i64, ceiling: DateTime<Utc>) -> DateTime<Utc> {
    chrono::Duration::try_seconds(seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .unwrap_or(if seconds < 0 { now } else { ceiling })
}

fn session_claims(claims: &IdTokenClaims) -> Claims {
    Claims {
        subject: claims.sub.clone(),
        given_name: claims.given_name.clone().unwrap_or_default(),
        family_name: claims.family_name.clone().unwrap_or_default(),
        email: claims.email.clone().unwrap_or_default(),
        groups: claims.groups.clone().unwrap_or_default(),
    }
}
