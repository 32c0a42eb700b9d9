//! ID token verification.
//!
//! Signature, issuer and audience go through `jsonwebtoken`; time claims
//! are checked against the injected clock with a fixed leeway, and
//! `at_hash` is recomputed with the hash family of the header algorithm.

use crate::{Error, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::collections::BTreeMap;
use subtle::ConstantTimeEq;

/// Allowed clock skew for `exp`, `nbf` and `iat`, in seconds.
pub const LEEWAY_SECONDS: i64 = 60;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    #[serde(default)]
    pub aud: Value,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub nbf: Option<i64>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub at_hash: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub groups: Option<Vec<String>>,
    #[serde(default)]
    pub acr: Option<String>,
    #[serde(default)]
    pub amr: Option<Vec<String>>,
    #[serde(default)]
    pub auth_time: Option<i64>,
    #[serde(default)]
    pub sid: Option<String>,
}

impl IdTokenClaims {
    /// Authentication context forwarded to validating services.
    #[must_use]
    pub fn auth_context(&self) -> BTreeMap<String, String> {
        let mut context = BTreeMap::new();
        if let Some(acr) = &self.acr {
            context.insert("acr".to_string(), acr.clone());
        }
        if let Some(amr) = &self.amr {
            context.insert("amr".to_string(), amr.join(" "));
        }
        if let Some(auth_time) = self.auth_time {
            context.insert("auth_time".to_string(), auth_time.to_string());
        }
        if let Some(sid) = &self.sid {
            context.insert("sid".to_string(), sid.clone());
        }
        context
    }

    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// Checks applied to a token once its signing key is known.
#[derive(Clone, Debug)]
pub struct Expectations<'a> {
    pub issuer: &'a str,
    pub audiences: &'a [String],
    pub nonce: Option<&'a str>,
    pub access_token: Option<&'a str>,
    pub now: DateTime<Utc>,
}

/// Read the header without verifying anything.
///
/// # Errors
/// `InvalidRequest` for malformed tokens or symmetric algorithms.
pub fn header(token: &str) -> Result<Header> {
    let header = jsonwebtoken::decode_header(token)
        .map_err(|err| Error::invalid_request(format!("malformed id token: {err}")))?;
    if matches!(
        header.alg,
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
    ) {
        return Err(Error::invalid_request(format!(
            "id token algorithm {:?} is not accepted",
            header.alg
        )));
    }
    Ok(header)
}

/// Verify `token` with `key` against `expect`.
///
/// # Errors
/// `InvalidAtHashToken` when `at_hash` does not match the access token,
/// `InvalidRequest` for every other failure.
pub fn verify(
    token: &str,
    header: &Header,
    key: &DecodingKey,
    expect: &Expectations<'_>,
) -> Result<IdTokenClaims> {
    let mut validation = Validation::new(header.alg);
    validation.set_issuer(&[expect.issuer]);
    validation.set_required_spec_claims(&["exp", "iss", "sub"]);
    validation.validate_aud = false;
    validation.validate_exp = false;
    validation.validate_nbf = false;

    let claims = jsonwebtoken::decode::<IdTokenClaims>(token, key, &validation)
        .map_err(|err| Error::invalid_request(format!("id token verification failed: {err}")))?
        .claims;

    if claims.iss != expect.issuer {
        return Err(Error::invalid_request("id token issuer mismatch"));
    }
    check_audience(&claims.aud, expect.audiences)?;
    check_times(&claims, expect.now)?;

    if let (Some(expected), Some(actual)) = (expect.nonce, claims.nonce.as_deref()) {
        if !bool::from(expected.as_bytes().ct_eq(actual.as_bytes())) {
            return Err(Error::invalid_request("id token nonce mismatch"));
        }
    }

    if let (Some(at_hash), Some(access_token)) = (claims.at_hash.as_deref(), expect.access_token) {
        let expected = at_hash_for(header.alg, access_token);
        if !bool::from(expected.as_bytes().ct_eq(at_hash.as_bytes())) {
            return Err(Error::InvalidAtHashToken);
        }
    }

    Ok(claims)
}

/// `aud` must intersect `accepted` unless `accepted` is empty.
fn check_audience(aud: &Value, accepted: &[String]) -> Result<()> {
    if accepted.is_empty() {
        return Ok(());
    }
    let matches = match aud {
        Value::String(single) => accepted.iter().any(|a| a == single),
        Value::Array(many) => many
            .iter()
            .filter_map(Value::as_str)
            .any(|candidate| accepted.iter().any(|a| a == candidate)),
        _ => false,
    };
    if matches {
        Ok(())
    } else {
        Err(Error::invalid_request("id token audience not accepted"))
    }
}

fn check_times(claims: &IdTokenClaims, now: DateTime<Utc>) -> Result<()> {
    let now = now.timestamp();
    if claims.exp.saturating_add(LEEWAY_SECONDS) <= now {
        return Err(Error::invalid_request("id token expired"));
    }
    if claims.nbf.is_some_and(|nbf| nbf.saturating_sub(LEEWAY_SECONDS) > now) {
        return Err(Error::invalid_request("id token not yet valid"));
    }
    if claims.iat.is_some_and(|iat| iat.saturating_sub(LEEWAY_SECONDS) > now) {
        return Err(Error::invalid_request("id token issued in the future"));
    }
    Ok(())
}

/// Left half of the access token hash, base64url without padding.
#[must_use]
pub fn at_hash_for(alg: Algorithm, access_token: &str) -> String {
    let digest: Vec<u8> = match alg {
        Algorithm::RS256 | Algorithm::PS256 | Algorithm::ES256 | Algorithm::HS256 => {
            Sha256::digest(access_token.as_bytes()).to_vec()
        }
        Algorithm::RS384 | Algorithm::PS384 | Algorithm::ES384 | Algorithm::HS384 => {
            Sha384::digest(access_token.as_bytes()).to_vec()
        }
        Algorithm::RS512 | Algorithm::PS512 | Algorithm::HS512 | Algorithm::EdDSA => {
            Sha512::digest(access_token.as_bytes()).to_vec()
        }
    };
    Base64UrlUnpadded::encode_string(&digest[..digest.len() / 2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey};
    use serde_json::json;

    #[test]
    fn at_hash_uses_left_half() {
        // OIDC Core example: access token "jHkWEdUXMU1BwAsC4vtUsZwnNvTIxEl0z9K3vx5KF0Y"
        let at_hash = at_hash_for(
            Algorithm::RS256,
            "jHkWEdUXMU1BwAsC4vtUsZwnNvTIxEl0z9K3vx5KF0Y",
        );
        assert_eq!(at_hash, "77QmUPtjPfzWtF2AnpK9RQ");
        assert_eq!(at_hash_for(Algorithm::RS384, "x").len(), 32);
        assert_eq!(at_hash_for(Algorithm::RS512, "x").len(), 43);
    }

    #[test]
    fn audience_rules() {
        let accepted = vec!["app".to_string()];
        assert!(check_audience(&json!("app"), &accepted).is_ok());
        assert!(check_audience(&json!(["other", "app"]), &accepted).is_ok());
        assert!(check_audience(&json!("other"), &accepted).is_err());
        assert!(check_audience(&Value::Null, &accepted).is_err());
        assert!(check_audience(&json!("anything"), &[]).is_ok());
    }

    #[test]
    fn time_claims_respect_leeway() {
        let now = Utc::now();
        let t = now.timestamp();
        let claims = |exp: i64, nbf: Option<i64>, iat: Option<i64>| IdTokenClaims {
            exp,
            nbf,
            iat,
            ..IdTokenClaims::default()
        };
        assert!(check_times(&claims(t + 10, None, Some(t)), now).is_ok());
        assert!(check_times(&claims(t - 30, None, None), now).is_ok());
        assert!(check_times(&claims(t - 61, None, None), now).is_err());
        assert!(check_times(&claims(t + 600, Some(t + 120), None), now).is_err());
        assert!(check_times(&claims(t + 600, None, Some(t + 120)), now).is_err());
    }

    #[test]
    fn extreme_time_claims_do_not_overflow() {
        let now = Utc::now();
        let claims = |exp: i64, nbf: Option<i64>| IdTokenClaims {
            exp,
            nbf,
            ..IdTokenClaims::default()
        };
        assert!(check_times(&claims(i64::MAX, None), now).is_ok());
        assert!(check_times(&claims(i64::MIN, None), now).is_err());
        assert!(check_times(&claims(i64::MAX, Some(i64::MIN)), now).is_ok());
        assert!(check_times(&claims(i64::MAX, Some(i64::MAX)), now).is_err());
    }

    #[test]
    fn symmetric_algorithms_are_refused() {
        let token = encode(
            &Header::new(Algorithm::HS256),
            &json!({"iss": "i", "sub": "s", "exp": 0}),
            &EncodingKey::from_secret(b"secret"),
        )
        .expect("token");
        assert!(matches!(header(&token), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn auth_context_collects_known_claims() {
        let claims = IdTokenClaims {
            acr: Some("urn:mace:incommon:iap:silver".to_string()),
            amr: Some(vec!["pwd".to_string(), "otp".to_string()]),
            auth_time: Some(1_700_000_000),
            ..IdTokenClaims::default()
        };
        let context = claims.auth_context();
        assert_eq!(context.get("amr").map(String::as_str), Some("pwd otp"));
        assert_eq!(context.get("auth_time").map(String::as_str), Some("1700000000"));
        assert!(!context.contains_key("sid"));
    }
}
