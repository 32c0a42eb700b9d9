//! Trust registry: one OIDC mapping per tenant.
//!
//! [`TrustRepository`] is the storage capability (Postgres in production,
//! in-memory for tests and local runs). [`TrustRegistry`] layers the service
//! semantics on top: input validation, upsert, and idempotent
//! block/unblock/remove.

mod memory;
mod postgres;

pub use memory::MemoryTrustRepository;
pub use postgres::PgTrustRepository;

use crate::{Error, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, instrument};

/// Per-tenant identity provider configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcMapping {
    pub tenant_id: String,
    /// Exact issuer, compared byte for byte with `iss` and discovery.
    pub issuer_url: String,
    pub blocked: bool,
    /// Overrides the discovery `jwks_uri` when set.
    pub jwks_uri: Option<String>,
    /// Accepted `aud` values; empty accepts any audience.
    pub audiences: Vec<String>,
    /// Extra parameters for token, refresh and introspection requests.
    pub properties: BTreeMap<String, String>,
}

impl OidcMapping {
    #[must_use]
    pub fn new(tenant_id: impl Into<String>, issuer_url: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            issuer_url: issuer_url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_audiences<I, S>(mut self, audiences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.audiences = audiences.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_jwks_uri(mut self, jwks_uri: impl Into<String>) -> Self {
        self.jwks_uri = Some(jwks_uri.into());
        self
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Storage capability for mappings. Every call is scoped to one tenant.
#[async_trait]
pub trait TrustRepository: Send + Sync {
    /// # Errors
    /// `NotFound` when the tenant has no mapping.
    async fn get(&self, tenant_id: &str) -> Result<OidcMapping>;

    /// # Errors
    /// `Conflict` when the tenant already has a mapping.
    async fn create(&self, mapping: &OidcMapping) -> Result<()>;

    /// Replace issuer, `jwks_uri`, audiences and properties. `blocked` is
    /// left untouched.
    ///
    /// # Errors
    /// `NotFound` when the tenant has no mapping.
    async fn update(&self, mapping: &OidcMapping) -> Result<()>;

    /// # Errors
    /// `NotFound` when the tenant has no mapping.
    async fn delete(&self, tenant_id: &str) -> Result<()>;

    /// # Errors
    /// `NotFound` when the tenant has no mapping.
    async fn set_blocked(&self, tenant_id: &str, blocked: bool) -> Result<()>;

    /// Readiness check for the backing store.
    ///
    /// # Errors
    /// Returns an error when the store cannot be reached.
    async fn ping(&self) -> Result<()>;
}

/// Reject tenant ids that are empty, overlong or contain separators used in
/// cookie names and KV keys.
///
/// # Errors
/// `InvalidRequest` for malformed ids.
pub fn validate_tenant_id(tenant_id: &str) -> Result<()> {
    let valid = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$")
        .is_ok_and(|regex| regex.is_match(tenant_id));
    if valid {
        Ok(())
    } else {
        Err(Error::invalid_request(format!("invalid tenant_id: {tenant_id:?}")))
    }
}

fn validate_mapping(mapping: &OidcMapping) -> Result<()> {
    validate_tenant_id(&mapping.tenant_id)?;
    if mapping.issuer_url.trim().is_empty() {
        return Err(Error::invalid_request("issuer must not be empty"));
    }
    if mapping.jwks_uri.as_deref().is_some_and(str::is_empty) {
        return Err(Error::invalid_request("jwks_uri must not be empty when set"));
    }
    Ok(())
}

/// Service layer over a [`TrustRepository`].
#[derive(Clone)]
pub struct TrustRegistry {
    repo: Arc<dyn TrustRepository>,
}

impl TrustRegistry {
    #[must_use]
    pub fn new(repo: Arc<dyn TrustRepository>) -> Self {
        Self { repo }
    }

    /// # Errors
    /// `InvalidRequest` for malformed ids, `NotFound` when absent.
    pub async fn get(&self, tenant_id: &str) -> Result<OidcMapping> {
        validate_tenant_id(tenant_id)?;
        self.repo.get(tenant_id).await
    }

    /// # Errors
    /// `Conflict` on duplicates, `InvalidRequest` on malformed input.
    pub async fn create(&self, tenant_id: &str, mapping: OidcMapping) -> Result<()> {
        let mapping = bind_tenant(tenant_id, mapping);
        validate_mapping(&mapping)?;
        self.repo.create(&mapping).await
    }

    /// # Errors
    /// `NotFound` when absent, `InvalidRequest` on malformed input.
    pub async fn update(&self, tenant_id: &str, mapping: OidcMapping) -> Result<()> {
        let mapping = bind_tenant(tenant_id, mapping);
        validate_mapping(&mapping)?;
        self.repo.update(&mapping).await
    }

    /// # Errors
    /// `NotFound` when absent.
    pub async fn delete(&self, tenant_id: &str) -> Result<()> {
        validate_tenant_id(tenant_id)?;
        self.repo.delete(tenant_id).await
    }

    /// Create when absent, otherwise update. A concurrent create surfaces as
    /// `Conflict`; callers retry.
    ///
    /// # Errors
    /// `Conflict` on a lost race, `InvalidRequest` on malformed input.
    #[instrument(skip(self, mapping))]
    pub async fn apply(&self, tenant_id: &str, mapping: OidcMapping) -> Result<()> {
        let mapping = bind_tenant(tenant_id, mapping);
        validate_mapping(&mapping)?;

        match self.repo.get(tenant_id).await {
            Ok(_) => {
                debug!("updating existing mapping");
                self.repo.update(&mapping).await
            }
            Err(err) if err.is_not_found() => {
                debug!("creating mapping");
                self.repo.create(&mapping).await
            }
            Err(err) => Err(err),
        }
    }

    /// Idempotent; unknown tenants are a no-op.
    ///
    /// # Errors
    /// Storage failures only.
    #[instrument(skip(self))]
    pub async fn block(&self, tenant_id: &str) -> Result<()> {
        self.set_blocked(tenant_id, true).await
    }

    /// Idempotent; unknown tenants are a no-op.
    ///
    /// # Errors
    /// Storage failures only.
    #[instrument(skip(self))]
    pub async fn unblock(&self, tenant_id: &str) -> Result<()> {
        self.set_blocked(tenant_id, false).await
    }

    /// Idempotent delete.
    ///
    /// # Errors
    /// Storage failures only.
    #[instrument(skip(self))]
    pub async fn remove(&self, tenant_id: &str) -> Result<()> {
        validate_tenant_id(tenant_id)?;
        absorb_not_found(self.repo.delete(tenant_id).await)
    }

    /// # Errors
    /// Returns an error when the backing store cannot be reached.
    pub async fn ping(&self) -> Result<()> {
        self.repo.ping().await
    }

    async fn set_blocked(&self, tenant_id: &str, blocked: bool) -> Result<()> {
        validate_tenant_id(tenant_id)?;
        absorb_not_found(self.repo.set_blocked(tenant_id, blocked).await)
    }
}

fn bind_tenant(tenant_id: &str, mapping: OidcMapping) -> OidcMapping {
    OidcMapping {
        tenant_id: tenant_id.to_string(),
        ..mapping
    }
}

fn absorb_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(err) if err.is_not_found() => {
            debug!("mapping not found, nothing to do");
            Ok(())
        }
        other => other,
    }
}
