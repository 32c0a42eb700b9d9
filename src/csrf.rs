//! CSRF tokens bound to a session id.
//!
//! Token layout: `BASE64URL(nonce) "." BASE64URL(HMAC-SHA256(secret, session_id || nonce))`
//! with a 16-byte nonce. Tokens are never stored; they are recomputed and
//! compared in constant time.

use crate::{ids, Error, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretSlice};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const MIN_SECRET_LEN: usize = 32;

pub struct CsrfBinder {
    secret: SecretSlice<u8>,
}

impl std::fmt::Debug for CsrfBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrfBinder")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl CsrfBinder {
    /// # Errors
    /// Returns `PreconditionFailed` when the secret is shorter than 32 bytes.
    pub fn new(secret: &[u8]) -> Result<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(Error::PreconditionFailed(format!(
                "csrf secret must be at least {MIN_SECRET_LEN} bytes, got {}",
                secret.len()
            )));
        }
        Ok(Self {
            secret: SecretSlice::from(secret.to_vec()),
        })
    }

    /// Mint a fresh token for `session_id`.
    ///
    /// # Errors
    /// Returns an error if the nonce cannot be generated.
    pub fn mint(&self, session_id: &str) -> Result<String> {
        let nonce = ids::new_csrf_nonce()?;
        let mac = self.mac(session_id, &nonce)?;
        Ok(format!(
            "{}.{}",
            Base64UrlUnpadded::encode_string(&nonce),
            Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes())
        ))
    }

    /// Check `token` against `session_id`. Malformed tokens are simply invalid.
    #[must_use]
    pub fn verify(&self, token: &str, session_id: &str) -> bool {
        let Some((nonce, signature)) = token.split_once('.') else {
            return false;
        };
        let Ok(nonce) = Base64UrlUnpadded::decode_vec(nonce) else {
            return false;
        };
        if nonce.len() != ids::CSRF_NONCE_BYTES {
            return false;
        }
        let Ok(signature) = Base64UrlUnpadded::decode_vec(signature) else {
            return false;
        };

        self.mac(session_id, &nonce)
            .is_ok_and(|mac| mac.verify_slice(&signature).is_ok())
    }

    fn mac(&self, session_id: &str, nonce: &[u8]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret())
            .map_err(|err| Error::server("failed to initialize csrf hmac", anyhow::anyhow!("{err}")))?;
        mac.update(session_id.as_bytes());
        mac.update(nonce);
        Ok(mac)
    }
}
