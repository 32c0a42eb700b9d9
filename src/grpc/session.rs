use super::pb::{
    session_server::Session as SessionRpc, GetOidcProviderRequest, GetOidcProviderResponse,
    GetSessionRequest, GetSessionResponse,
};
use crate::{oidc::OidcClient, session::SessionManager, trust::validate_tenant_id};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::instrument;

/// Session lookups for downstream services.
#[derive(Clone)]
pub struct SessionService {
    manager: SessionManager,
}

impl SessionService {
    #[must_use]
    pub const fn new(manager: SessionManager) -> Self {
        Self { manager }
    }
}

#[tonic::async_trait]
impl SessionRpc for SessionService {
    #[instrument(skip_all, fields(tenant_id = %request.get_ref().tenant_id))]
    async fn get_session(
        &self,
        request: Request<GetSessionRequest>,
    ) -> Result<Response<GetSessionResponse>, Status> {
        let request = request.into_inner();
        let validation = self
            .manager
            .validate(
                &request.session_id,
                &request.tenant_id,
                &request.fingerprint,
                &CancellationToken::new(),
            )
            .await?;

        let Some(session) = validation.session() else {
            return Ok(Response::new(GetSessionResponse::default()));
        };

        Ok(Response::new(GetSessionResponse {
            valid: true,
            issuer: session.issuer.clone(),
            subject: session.claims.subject.clone(),
            given_name: session.claims.given_name.clone(),
            family_name: session.claims.family_name.clone(),
            email: session.claims.email.clone(),
            groups: session.claims.groups.clone(),
            auth_context: session
                .auth_context
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        }))
    }

    #[instrument(skip_all, fields(tenant_id = %request.get_ref().tenant_id))]
    async fn get_oidc_provider(
        &self,
        request: Request<GetOidcProviderRequest>,
    ) -> Result<Response<GetOidcProviderResponse>, Status> {
        let tenant_id = &request.get_ref().tenant_id;
        validate_tenant_id(tenant_id)?;

        let mapping = self.manager.trust().get(tenant_id).await?;
        let jwks_uri = match &mapping.jwks_uri {
            Some(uri) => uri.clone(),
            None => {
                let metadata = self.manager.oidc().discover(&mapping.issuer_url).await?;
                OidcClient::jwks_uri_for(&mapping, &metadata).to_string()
            }
        };

        Ok(Response::new(GetOidcProviderResponse {
            issuer_url: mapping.issuer_url,
            jwks_uri,
            audiences: mapping.audiences,
        }))
    }
}
