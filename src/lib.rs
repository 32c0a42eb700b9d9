//! # sessiond (Multi-tenant OIDC session manager)
//!
//! `sessiond` brokers OpenID Connect authorization-code logins (with `PKCE`)
//! between browsers and tenant-specific identity providers. It mints opaque
//! session identifiers bound to a client fingerprint, validates them for
//! downstream services over gRPC, and keeps sessions and tokens alive in the
//! background.
//!
//! ## Tenant Model
//!
//! Every tenant owns exactly one OIDC mapping (issuer, audiences, optional
//! `jwks_uri` override, free-form request properties). A blocked mapping stops
//! new logins and invalidates every existing session of the tenant.
//!
//! ## Storage
//!
//! - **Trust registry:** Postgres table `trust`; every statement runs inside a
//!   transaction that first sets `app.tenant_id` so row-level security can
//!   scope it.
//! - **Sessions:** an expiring key-value store (Redis) holding pending
//!   authorization states, sessions, token companions and the sliding idle
//!   marker.
//!
//! ## Background work
//!
//! The housekeeper periodically refreshes access tokens that are about to
//! expire and evicts idle sessions, bucketing work by provider subject so a
//! single subject is never refreshed twice at once.

pub mod api;
pub mod audit;
pub mod cli;
pub mod clock;
pub mod csrf;
pub mod error;
pub mod fingerprint;
pub mod grpc;
pub mod housekeeper;
pub mod ids;
pub mod oidc;
pub mod session;
pub mod store;
pub mod trust;

pub use error::{Error, Result};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
