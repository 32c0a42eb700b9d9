//! Random identifiers: authorization state, `PKCE` pairs, session ids,
//! CSRF and OIDC nonces. Everything comes from the OS RNG; an RNG failure
//! aborts the calling operation.

use crate::{Error, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

/// 48 bytes encode to 64 URL-safe characters.
const STATE_BYTES: usize = 48;
const VERIFIER_BYTES: usize = 32;
const SESSION_ID_BYTES: usize = 32;
const NONCE_BYTES: usize = 32;
pub const CSRF_NONCE_BYTES: usize = 16;

pub const PKCE_METHOD_S256: &str = "S256";

/// `PKCE` verifier and its `S256` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    /// Derive the pair from an existing verifier.
    #[must_use]
    pub fn from_verifier(verifier: impl Into<String>) -> Self {
        let verifier = verifier.into();
        let challenge = pkce_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    #[must_use]
    pub const fn method(&self) -> &'static str {
        PKCE_METHOD_S256
    }
}

/// `BASE64URL(SHA256(verifier))`
#[must_use]
pub fn pkce_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    Base64UrlUnpadded::encode_string(&digest)
}

fn random_bytes<const N: usize>(what: &'static str) -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| Error::server(what, err))?;
    Ok(bytes)
}

/// Create the `state` parameter sent to the provider.
///
/// # Errors
/// Returns an error if the OS RNG fails.
pub fn new_state() -> Result<String> {
    let bytes = random_bytes::<STATE_BYTES>("failed to generate authorization state")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// # Errors
/// Returns an error if the OS RNG fails.
pub fn new_pkce() -> Result<Pkce> {
    let bytes = random_bytes::<VERIFIER_BYTES>("failed to generate pkce verifier")?;
    Ok(Pkce::from_verifier(Base64UrlUnpadded::encode_string(&bytes)))
}

/// Opaque session identifier stored in the session cookie.
///
/// # Errors
/// Returns an error if the OS RNG fails.
pub fn new_session_id() -> Result<String> {
    let bytes = random_bytes::<SESSION_ID_BYTES>("failed to generate session id")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// # Errors
/// Returns an error if the OS RNG fails.
pub fn new_csrf_nonce() -> Result<[u8; CSRF_NONCE_BYTES]> {
    random_bytes::<CSRF_NONCE_BYTES>("failed to generate csrf nonce")
}

/// OIDC `nonce` echoed back inside the ID token.
///
/// # Errors
/// Returns an error if the OS RNG fails.
pub fn new_nonce() -> Result<String> {
    let bytes = random_bytes::<NONCE_BYTES>("failed to generate oidc nonce")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}
