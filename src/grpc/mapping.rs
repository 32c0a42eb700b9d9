use super::pb::{oidc_mapping_server::OidcMapping, ApplyRequest, MappingResponse, TenantRequest};
use crate::{
    trust::{OidcMapping as Mapping, TrustRegistry},
    Result,
};
use tonic::{Request, Response, Status};
use tracing::{info, instrument, warn};

/// Administrative mapping service.
#[derive(Clone)]
pub struct MappingService {
    trust: TrustRegistry,
}

impl MappingService {
    #[must_use]
    pub const fn new(trust: TrustRegistry) -> Self {
        Self { trust }
    }
}

fn respond(result: Result<()>) -> std::result::Result<Response<MappingResponse>, Status> {
    result.map_err(Status::from)?;
    Ok(Response::new(MappingResponse {
        success: true,
        message: None,
    }))
}

impl From<ApplyRequest> for Mapping {
    fn from(request: ApplyRequest) -> Self {
        Self {
            tenant_id: request.tenant_id,
            issuer_url: request.issuer,
            blocked: false,
            jwks_uri: request.jwks_uri.filter(|uri| !uri.is_empty()),
            audiences: request.audiences,
            properties: request.properties.into_iter().collect(),
        }
    }
}

#[tonic::async_trait]
impl OidcMapping for MappingService {
    #[instrument(skip_all, fields(tenant_id = %request.get_ref().tenant_id))]
    async fn apply(
        &self,
        request: Request<ApplyRequest>,
    ) -> std::result::Result<Response<MappingResponse>, Status> {
        let request = request.into_inner();
        let tenant_id = request.tenant_id.clone();
        let mapping = Mapping::from(request);

        // A concurrent Apply may create the row between our get and create.
        let result = match self.trust.apply(&tenant_id, mapping.clone()).await {
            Err(err) if err.is_conflict() => {
                warn!("Apply lost a create race, retrying once");
                self.trust.apply(&tenant_id, mapping).await
            }
            other => other,
        };
        if result.is_ok() {
            info!("Mapping applied");
        }
        respond(result)
    }

    #[instrument(skip_all, fields(tenant_id = %request.get_ref().tenant_id))]
    async fn block(
        &self,
        request: Request<TenantRequest>,
    ) -> std::result::Result<Response<MappingResponse>, Status> {
        respond(self.trust.block(&request.get_ref().tenant_id).await)
    }

    #[instrument(skip_all, fields(tenant_id = %request.get_ref().tenant_id))]
    async fn unblock(
        &self,
        request: Request<TenantRequest>,
    ) -> std::result::Result<Response<MappingResponse>, Status> {
        respond(self.trust.unblock(&request.get_ref().tenant_id).await)
    }

    #[instrument(skip_all, fields(tenant_id = %request.get_ref().tenant_id))]
    async fn remove(
        &self,
        request: Request<TenantRequest>,
    ) -> std::result::Result<Response<MappingResponse>, Status> {
        respond(self.trust.remove(&request.get_ref().tenant_id).await)
    }
}
