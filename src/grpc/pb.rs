// Messages and service stubs for proto/sessiond/v1/{mapping,session}.proto
// (package sessiond.v1), kept in sync with the proto files by hand.
#![allow(clippy::all, clippy::pedantic, missing_docs)]

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApplyRequest {
    #[prost(string, tag = "1")]
    pub tenant_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub issuer: ::prost::alloc::string::String,
    #[prost(string, optional, tag = "3")]
    pub jwks_uri: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, repeated, tag = "4")]
    pub audiences: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(map = "string, string", tag = "5")]
    pub properties:
        ::std::collections::HashMap<::prost::alloc::string::String, ::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TenantRequest {
    #[prost(string, tag = "1")]
    pub tenant_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MappingResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, optional, tag = "2")]
    pub message: ::core::option::Option<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetSessionRequest {
    #[prost(string, tag = "1")]
    pub session_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub tenant_id: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub fingerprint: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetSessionResponse {
    #[prost(bool, tag = "1")]
    pub valid: bool,
    #[prost(string, tag = "2")]
    pub issuer: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub subject: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub given_name: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub family_name: ::prost::alloc::string::String,
    #[prost(string, tag = "6")]
    pub email: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "7")]
    pub groups: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(map = "string, string", tag = "8")]
    pub auth_context:
        ::std::collections::HashMap<::prost::alloc::string::String, ::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetOidcProviderRequest {
    #[prost(string, tag = "1")]
    pub tenant_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetOidcProviderResponse {
    #[prost(string, tag = "1")]
    pub issuer_url: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub jwks_uri: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "3")]
    pub audiences: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

/// Server glue for a unary method: wraps `$method` of trait `$trait` as a
/// `tonic::server::UnaryService` and drives it through `Grpc::unary`.
macro_rules! unary_route {
    ($inner:expr, $req:expr, $trait:ident, $method:ident, $request:ty, $response:ty) => {{
        #[allow(non_camel_case_types)]
        struct Svc<T: $trait>(pub Arc<T>);
        impl<T: $trait> tonic::server::UnaryService<$request> for Svc<T> {
            type Response = $response;
            type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
            fn call(&mut self, request: tonic::Request<$request>) -> Self::Future {
                let inner = Arc::clone(&self.0);
                let fut = async move { <T as $trait>::$method(&inner, request).await };
                Box::pin(fut)
            }
        }
        let inner = $inner;
        let req = $req;
        let fut = async move {
            let method = Svc(inner);
            let codec = tonic::codec::ProstCodec::default();
            let mut grpc = tonic::server::Grpc::new(codec);
            let res = grpc.unary(method, req).await;
            Ok(res)
        };
        Box::pin(fut)
    }};
}

fn unimplemented_route<E: Send + 'static>(
) -> tonic::codegen::BoxFuture<tonic::codegen::http::Response<tonic::body::BoxBody>, E> {
    Box::pin(async move {
        let mut response = tonic::codegen::http::Response::new(tonic::codegen::empty_body());
        let headers = response.headers_mut();
        headers.insert(
            tonic::Status::GRPC_STATUS,
            (tonic::Code::Unimplemented as i32).into(),
        );
        headers.insert(
            tonic::codegen::http::header::CONTENT_TYPE,
            tonic::metadata::GRPC_CONTENT_TYPE,
        );
        Ok(response)
    })
}

pub mod oidc_mapping_server {
    use tonic::codegen::*;

    #[async_trait]
    pub trait OidcMapping: std::marker::Send + std::marker::Sync + 'static {
        async fn apply(
            &self,
            request: tonic::Request<super::ApplyRequest>,
        ) -> std::result::Result<tonic::Response<super::MappingResponse>, tonic::Status>;
        async fn block(
            &self,
            request: tonic::Request<super::TenantRequest>,
        ) -> std::result::Result<tonic::Response<super::MappingResponse>, tonic::Status>;
        async fn unblock(
            &self,
            request: tonic::Request<super::TenantRequest>,
        ) -> std::result::Result<tonic::Response<super::MappingResponse>, tonic::Status>;
        async fn remove(
            &self,
            request: tonic::Request<super::TenantRequest>,
        ) -> std::result::Result<tonic::Response<super::MappingResponse>, tonic::Status>;
    }

    #[derive(Debug)]
    pub struct OidcMappingServer<T> {
        inner: Arc<T>,
    }

    impl<T> OidcMappingServer<T> {
        pub fn new(inner: T) -> Self {
            Self::from_arc(Arc::new(inner))
        }

        pub fn from_arc(inner: Arc<T>) -> Self {
            Self { inner }
        }
    }

    impl<T, B> tonic::codegen::Service<http::Request<B>> for OidcMappingServer<T>
    where
        T: OidcMapping,
        B: Body + std::marker::Send + 'static,
        B::Error: Into<StdError> + std::marker::Send + 'static,
    {
        type Response = http::Response<tonic::body::BoxBody>;
        type Error = std::convert::Infallible;
        type Future = BoxFuture<Self::Response, Self::Error>;

        fn poll_ready(
            &mut self,
            _cx: &mut Context<'_>,
        ) -> Poll<std::result::Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            match req.uri().path() {
                "/sessiond.v1.OIDCMapping/Apply" => unary_route!(
                    self.inner.clone(),
                    req,
                    OidcMapping,
                    apply,
                    super::ApplyRequest,
                    super::MappingResponse
                ),
                "/sessiond.v1.OIDCMapping/Block" => unary_route!(
                    self.inner.clone(),
                    req,
                    OidcMapping,
                    block,
                    super::TenantRequest,
                    super::MappingResponse
                ),
                "/sessiond.v1.OIDCMapping/Unblock" => unary_route!(
                    self.inner.clone(),
                    req,
                    OidcMapping,
                    unblock,
                    super::TenantRequest,
                    super::MappingResponse
                ),
                "/sessiond.v1.OIDCMapping/Remove" => unary_route!(
                    self.inner.clone(),
                    req,
                    OidcMapping,
                    remove,
                    super::TenantRequest,
                    super::MappingResponse
                ),
                _ => super::unimplemented_route(),
            }
        }
    }

    impl<T> Clone for OidcMappingServer<T> {
        fn clone(&self) -> Self {
            Self {
                inner: self.inner.clone(),
            }
        }
    }

    pub const SERVICE_NAME: &str = "sessiond.v1.OIDCMapping";

    impl<T> tonic::server::NamedService for OidcMappingServer<T> {
        const NAME: &'static str = SERVICE_NAME;
    }
}

pub mod session_server {
    use tonic::codegen::*;

    #[async_trait]
    pub trait Session: std::marker::Send + std::marker::Sync + 'static {
        async fn get_session(
            &self,
            request: tonic::Request<super::GetSessionRequest>,
        ) -> std::result::Result<tonic::Response<super::GetSessionResponse>, tonic::Status>;
        async fn get_oidc_provider(
            &self,
            request: tonic::Request<super::GetOidcProviderRequest>,
        ) -> std::result::Result<tonic::Response<super::GetOidcProviderResponse>, tonic::Status>;
    }

    #[derive(Debug)]
    pub struct SessionServer<T> {
        inner: Arc<T>,
    }

    impl<T> SessionServer<T> {
        pub fn new(inner: T) -> Self {
            Self::from_arc(Arc::new(inner))
        }

        pub fn from_arc(inner: Arc<T>) -> Self {
            Self { inner }
        }
    }

    impl<T, B> tonic::codegen::Service<http::Request<B>> for SessionServer<T>
    where
        T: Session,
        B: Body + std::marker::Send + 'static,
        B::Error: Into<StdError> + std::marker::Send + 'static,
    {
        type Response = http::Response<tonic::body::BoxBody>;
        type Error = std::convert::Infallible;
        type Future = BoxFuture<Self::Response, Self::Error>;

        fn poll_ready(
            &mut self,
            _cx: &mut Context<'_>,
        ) -> Poll<std::result::Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            match req.uri().path() {
                "/sessiond.v1.Session/GetSession" => unary_route!(
                    self.inner.clone(),
                    req,
                    Session,
                    get_session,
                    super::GetSessionRequest,
                    super::GetSessionResponse
                ),
                "/sessiond.v1.Session/GetOIDCProvider" => unary_route!(
                    self.inner.clone(),
                    req,
                    Session,
                    get_oidc_provider,
                    super::GetOidcProviderRequest,
                    super::GetOidcProviderResponse
                ),
                _ => super::unimplemented_route(),
            }
        }
    }

    impl<T> Clone for SessionServer<T> {
        fn clone(&self) -> Self {
            Self {
                inner: self.inner.clone(),
            }
        }
    }

    pub const SERVICE_NAME: &str = "sessiond.v1.Session";

    impl<T> tonic::server::NamedService for SessionServer<T> {
        const NAME: &'static str = SERVICE_NAME;
    }
}
