use super::{OidcMapping, TrustRepository};
use crate::{Error, Result};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

/// Process-local repository used by tests and `--dsn memory://`.
#[derive(Clone, Debug, Default)]
pub struct MemoryTrustRepository {
    mappings: Arc<RwLock<HashMap<String, OidcMapping>>>,
}

impl MemoryTrustRepository {
    fn poisoned() -> Error {
        Error::server("trust registry lock poisoned", anyhow::anyhow!("poisoned lock"))
    }

    fn not_found(tenant_id: &str) -> Error {
        Error::not_found(format!("no mapping for tenant {tenant_id}"))
    }
}

#[async_trait]
impl TrustRepository for MemoryTrustRepository {
    async fn get(&self, tenant_id: &str) -> Result<OidcMapping> {
        let mappings = self.mappings.read().map_err(|_| Self::poisoned())?;
        mappings
            .get(tenant_id)
            .cloned()
            .ok_or_else(|| Self::not_found(tenant_id))
    }

    async fn create(&self, mapping: &OidcMapping) -> Result<()> {
        let mut mappings = self.mappings.write().map_err(|_| Self::poisoned())?;
        if mappings.contains_key(&mapping.tenant_id) {
            return Err(Error::Conflict(format!(
                "mapping for tenant {} already exists",
                mapping.tenant_id
            )));
        }
        mappings.insert(mapping.tenant_id.clone(), mapping.clone());
        Ok(())
    }

    async fn update(&self, mapping: &OidcMapping) -> Result<()> {
        let mut mappings = self.mappings.write().map_err(|_| Self::poisoned())?;
        let stored = mappings
            .get_mut(&mapping.tenant_id)
            .ok_or_else(|| Self::not_found(&mapping.tenant_id))?;
        *stored = OidcMapping {
            blocked: stored.blocked,
            ..mapping.clone()
        };
        Ok(())
    }

    async fn delete(&self, tenant_id: &str) -> Result<()> {
        let mut mappings = self.mappings.write().map_err(|_| Self::poisoned())?;
        mappings
            .remove(tenant_id)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(tenant_id))
    }

    async fn set_blocked(&self, tenant_id: &str, blocked: bool) -> Result<()> {
        let mut mappings = self.mappings.write().map_err(|_| Self::poisoned())?;
        let stored = mappings
            .get_mut(tenant_id)
            .ok_or_else(|| Self::not_found(tenant_id))?;
        stored.blocked = blocked;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
