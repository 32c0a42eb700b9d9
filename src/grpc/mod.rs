//! gRPC surface: mapping administration and session lookups
//! (`proto/sessiond/v1`).

mod mapping;
pub mod pb;
mod session;

pub use self::mapping::MappingService;
pub use self::session::SessionService;

use crate::session::SessionManager;
use anyhow::Result;
use pb::{oidc_mapping_server::OidcMappingServer, session_server::SessionServer};
use std::net::{Ipv6Addr, SocketAddr};
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::info;

/// Serve both services on `port` until `cancel` fires.
///
/// # Errors
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn serve(port: u16, manager: SessionManager, cancel: CancellationToken) -> Result<()> {
    let addr = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));

    info!("gRPC listening on [::]:{}", port);

    Server::builder()
        .trace_fn(|request| {
            tracing::debug_span!("grpc-request", path = %request.uri().path())
        })
        .add_service(OidcMappingServer::new(MappingService::new(
            manager.trust().clone(),
        )))
        .add_service(SessionServer::new(SessionService::new(manager)))
        .serve_with_shutdown(addr, async move {
            cancel.cancelled().await;
            info!("Gracefully shutdown gRPC server");
        })
        .await?;

    Ok(())
}
