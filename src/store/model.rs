use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Pending authorization, keyed by the `state` parameter.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
    pub id: String,
    pub tenant_id: String,
    pub fingerprint: String,
    pub pkce_verifier: String,
    /// OIDC `nonce` expected back in the ID token.
    #[serde(default)]
    pub nonce: String,
    pub request_uri: String,
    pub expiry: DateTime<Utc>,
}

impl fmt::Debug for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthState")
            .field("tenant_id", &self.tenant_id)
            .field("request_uri", &self.request_uri)
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

/// Identity claims copied from the verified ID token.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub subject: String,
    #[serde(default)]
    pub given_name: String,
    #[serde(default)]
    pub family_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Authenticated browser session.
///
/// Access and refresh tokens live under their own keys and are not part of
/// the serialized session document.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub tenant_id: String,
    pub fingerprint: String,
    pub issuer: String,
    /// Subject of the verified ID token.
    pub provider_id: String,
    #[serde(skip)]
    pub access_token: String,
    #[serde(skip)]
    pub refresh_token: Option<String>,
    /// Raw ID token, sent back as `id_token_hint` on logout.
    #[serde(default)]
    pub id_token: Option<String>,
    pub expiry: DateTime<Utc>,
    pub access_token_expiry: DateTime<Utc>,
    pub claims: Claims,
    #[serde(default)]
    pub auth_context: BTreeMap<String, String>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("tenant_id", &self.tenant_id)
            .field("issuer", &self.issuer)
            .field("provider_id", &self.provider_id)
            .field("expiry", &self.expiry)
            .field("access_token_expiry", &self.access_token_expiry)
            .finish_non_exhaustive()
    }
}
