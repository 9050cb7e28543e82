#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConfigRequest {
    /// Workload identity, e.g. `shop/billing`.
    #[prost(string, tag = "1")]
    pub workload: ::prost::alloc::string::String,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EndpointsRequest {
    #[prost(string, tag = "1")]
    pub workload: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub service: ::prost::alloc::string::String,
}
/// One workload's complete routing configuration. Bundles are immutable; a
/// change produces a new bundle under a new version.
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConfigBundle {
    /// Hex digest of the canonicalized bundle content. Identical content always
    /// yields an identical version, regardless of which controller computed it.
    #[prost(string, tag = "1")]
    pub version: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "2")]
    pub listeners: ::prost::alloc::vec::Vec<Listener>,
    #[prost(message, repeated, tag = "3")]
    pub routes: ::prost::alloc::vec::Vec<Route>,
    #[prost(message, repeated, tag = "4")]
    pub clusters: ::prost::alloc::vec::Vec<Cluster>,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Listener {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(enumeration = "listener::Kind", tag = "2")]
    pub kind: i32,
    /// Port the proxy binds for this listener.
    #[prost(uint32, tag = "3")]
    pub port: u32,
    /// Route names, evaluated in order; first match wins.
    #[prost(string, repeated, tag = "4")]
    pub routes: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}
/// Nested message and enum types in `Listener`.
pub mod listener {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Kind {
        Unspecified = 0,
        Inbound = 1,
        Outbound = 2,
    }
    impl Kind {
        /// String value of the enum field names used in the ProtoBuf definition.
        ///
        /// The values are not transformed in any way and thus are considered stable
        /// (if the ProtoBuf definition does not change) and safe for programmatic use.
        pub fn as_str_name(&self) -> &'static str {
            match self {
                Kind::Unspecified => "KIND_UNSPECIFIED",
                Kind::Inbound => "KIND_INBOUND",
                Kind::Outbound => "KIND_OUTBOUND",
            }
        }
        /// Creates an enum from field names used in the ProtoBuf definition.
        pub fn from_str_name(value: &str) -> ::core::option::Option<Self> {
            match value {
                "KIND_UNSPECIFIED" => Some(Self::Unspecified),
                "KIND_INBOUND" => Some(Self::Inbound),
                "KIND_OUTBOUND" => Some(Self::Outbound),
                _ => None,
            }
        }
    }
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Route {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub r#match: ::core::option::Option<RouteMatch>,
    /// Weighted split across clusters. Weights are relative.
    #[prost(message, repeated, tag = "3")]
    pub backends: ::prost::alloc::vec::Vec<WeightedBackend>,
    /// Deterministic per-request override used for canary pinning.
    #[prost(message, optional, tag = "4")]
    pub header_override: ::core::option::Option<HeaderOverride>,
    #[prost(message, optional, tag = "5")]
    pub retry: ::core::option::Option<RetryPolicy>,
    /// End-to-end deadline for a dispatched request. Zero means none.
    #[prost(uint64, tag = "6")]
    pub timeout_ms: u64,
}
/// All populated fields must match; empty fields match anything.
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RouteMatch {
    #[prost(string, tag = "1")]
    pub authority: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub path_prefix: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub method: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "4")]
    pub headers: ::prost::alloc::vec::Vec<HeaderMatch>,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HeaderMatch {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    /// Exact value match.
    #[prost(string, tag = "2")]
    pub value: ::prost::alloc::string::String,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WeightedBackend {
    #[prost(string, tag = "1")]
    pub cluster: ::prost::alloc::string::String,
    #[prost(uint32, tag = "2")]
    pub weight: u32,
}
/// When the named header carries the given value, the request bypasses the
/// weighted split and goes to `cluster` unconditionally.
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HeaderOverride {
    #[prost(string, tag = "1")]
    pub header: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub value: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub cluster: ::prost::alloc::string::String,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    #[prost(uint32, tag = "1")]
    pub max_attempts: u32,
    #[prost(uint64, tag = "2")]
    pub per_try_timeout_ms: u64,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Cluster {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "4")]
    pub balancer: ::core::option::Option<Balancer>,
    #[prost(message, optional, tag = "5")]
    pub outlier: ::core::option::Option<OutlierPolicy>,
    #[prost(message, optional, tag = "6")]
    pub limit: ::core::option::Option<LimitPolicy>,
    #[prost(oneof = "cluster::Discovery", tags = "2, 3")]
    pub discovery: ::core::option::Option<cluster::Discovery>,
}
/// Nested message and enum types in `Cluster`.
pub mod cluster {
    #[allow(clippy::derive_partial_eq_without_eq)]
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Discovery {
        /// Fixed endpoint list carried in the bundle itself.
        #[prost(message, tag = "2")]
        StaticEndpoints(super::StaticEndpoints),
        /// Membership streamed separately via WatchEndpoints.
        #[prost(message, tag = "3")]
        Registry(super::RegistryDiscovery),
    }
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StaticEndpoints {
    #[prost(message, repeated, tag = "1")]
    pub endpoints: ::prost::alloc::vec::Vec<super::super::registry::v1::Endpoint>,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegistryDiscovery {
    /// Service name on the registry surface.
    #[prost(string, tag = "1")]
    pub service: ::prost::alloc::string::String,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Balancer {
    #[prost(oneof = "balancer::Kind", tags = "1, 2")]
    pub kind: ::core::option::Option<balancer::Kind>,
}
/// Nested message and enum types in `Balancer`.
pub mod balancer {
    #[allow(clippy::derive_partial_eq_without_eq)]
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        RoundRobin(super::RoundRobin),
        #[prost(message, tag = "2")]
        ZoneAware(super::ZoneAware),
    }
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RoundRobin {}
/// Prefers endpoints in the proxy's own zone while at least `min_zone_ratio`
/// of the cluster's ready endpoints are local; below that, dispatch spills
/// over to the whole set.
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ZoneAware {
    #[prost(double, tag = "1")]
    pub min_zone_ratio: f64,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OutlierPolicy {
    /// Consecutive failures that trigger ejection.
    #[prost(uint32, tag = "1")]
    pub consecutive_failures: u32,
    #[prost(uint64, tag = "2")]
    pub base_ejection_ms: u64,
    #[prost(uint64, tag = "3")]
    pub max_ejection_ms: u64,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LimitPolicy {
    #[prost(uint32, tag = "1")]
    pub initial: u32,
    #[prost(uint32, tag = "2")]
    pub min: u32,
    #[prost(uint32, tag = "3")]
    pub max: u32,
    /// Latency degradation the gradient controller tolerates before backing
    /// off, as a ratio over the observed baseline.
    #[prost(double, tag = "4")]
    pub tolerance: f64,
}
/// Generated client implementations.
pub mod discovery_client {
    #![allow(unused_variables, dead_code, missing_docs, clippy::let_unit_value)]
    use tonic::codegen::http::Uri;
    use tonic::codegen::*;
    /// The control-plane surface consumed by proxies. Configuration and endpoint
    /// membership are delivered on separate streams because they change at very
    /// different rates: routing intent is edited by humans, membership churns with
    /// deploys and autoscaling.
    #[derive(Debug, Clone)]
    pub struct DiscoveryClient<T> {
        inner: tonic::client::Grpc<T>,
    }
    impl DiscoveryClient<tonic::transport::Channel> {
        /// Attempt to create a new client by connecting to a given endpoint.
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }
    impl<T> DiscoveryClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }
        pub fn with_origin(inner: T, origin: Uri) -> Self {
            let inner = tonic::client::Grpc::with_origin(inner, origin);
            Self { inner }
        }
        pub fn with_interceptor<F>(
            inner: T,
            interceptor: F,
        ) -> DiscoveryClient<InterceptedService<T, F>>
        where
            F: tonic::service::Interceptor,
            T::ResponseBody: Default,
            T: tonic::codegen::Service<
                http::Request<tonic::body::BoxBody>,
                Response = http::Response<
                    <T as tonic::client::GrpcService<tonic::body::BoxBody>>::ResponseBody,
                >,
            >,
            <T as tonic::codegen::Service<http::Request<tonic::body::BoxBody>>>::Error:
                Into<StdError> + Send + Sync,
        {
            DiscoveryClient::new(InterceptedService::new(inner, interceptor))
        }
        /// Compress requests with the given encoding.
        ///
        /// This requires the server to support it otherwise it might respond with an
        /// error.
        #[must_use]
        pub fn send_compressed(mut self, encoding: CompressionEncoding) -> Self {
            self.inner = self.inner.send_compressed(encoding);
            self
        }
        /// Enable decompressing responses.
        #[must_use]
        pub fn accept_compressed(mut self, encoding: CompressionEncoding) -> Self {
            self.inner = self.inner.accept_compressed(encoding);
            self
        }
        /// Limits the maximum size of a decoded message.
        ///
        /// Default: `4MB`
        #[must_use]
        pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
            self.inner = self.inner.max_decoding_message_size(limit);
            self
        }
        /// Limits the maximum size of an encoded message.
        ///
        /// Default: `usize::MAX`
        #[must_use]
        pub fn max_encoding_message_size(mut self, limit: usize) -> Self {
            self.inner = self.inner.max_encoding_message_size(limit);
            self
        }
        /// Subscribes to the full configuration snapshot for one workload. The
        /// server sends the current snapshot immediately and a complete replacement
        /// whenever the computed version changes.
        pub async fn watch_config(
            &mut self,
            request: impl tonic::IntoRequest<super::ConfigRequest>,
        ) -> std::result::Result<
            tonic::Response<tonic::codec::Streaming<super::ConfigBundle>>,
            tonic::Status,
        > {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/weft.discovery.v1.Discovery/WatchConfig");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("weft.discovery.v1.Discovery", "WatchConfig"));
            self.inner.server_streaming(req, path, codec).await
        }
        /// Subscribes to endpoint membership for one registry service named by
        /// the workload's current configuration.
        pub async fn watch_endpoints(
            &mut self,
            request: impl tonic::IntoRequest<super::EndpointsRequest>,
        ) -> std::result::Result<
            tonic::Response<
                tonic::codec::Streaming<super::super::super::registry::v1::EndpointSet>,
            >,
            tonic::Status,
        > {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/weft.discovery.v1.Discovery/WatchEndpoints");
            let mut req = request.into_request();
            req.extensions_mut().insert(GrpcMethod::new(
                "weft.discovery.v1.Discovery",
                "WatchEndpoints",
            ));
            self.inner.server_streaming(req, path, codec).await
        }
    }
}
/// Generated server implementations.
pub mod discovery_server {
    #![allow(unused_variables, dead_code, missing_docs, clippy::let_unit_value)]
    use tonic::codegen::*;
    /// Generated trait containing gRPC methods that should be implemented for use with DiscoveryServer.
    #[async_trait]
    pub trait Discovery: Send + Sync + 'static {
        /// Server streaming response type for the WatchConfig method.
        type WatchConfigStream: tonic::codegen::tokio_stream::Stream<
                Item = std::result::Result<super::ConfigBundle, tonic::Status>,
            > + Send
            + 'static;
        /// Subscribes to the full configuration snapshot for one workload. The
        /// server sends the current snapshot immediately and a complete replacement
        /// whenever the computed version changes.
        async fn watch_config(
            &self,
            request: tonic::Request<super::ConfigRequest>,
        ) -> std::result::Result<tonic::Response<Self::WatchConfigStream>, tonic::Status>;
        /// Server streaming response type for the WatchEndpoints method.
        type WatchEndpointsStream: tonic::codegen::tokio_stream::Stream<
                Item = std::result::Result<
                    super::super::super::registry::v1::EndpointSet,
                    tonic::Status,
                >,
            > + Send
            + 'static;
        /// Subscribes to endpoint membership for one registry service named by
        /// the workload's current configuration.
        async fn watch_endpoints(
            &self,
            request: tonic::Request<super::EndpointsRequest>,
        ) -> std::result::Result<tonic::Response<Self::WatchEndpointsStream>, tonic::Status>;
    }
    /// The control-plane surface consumed by proxies. Configuration and endpoint
    /// membership are delivered on separate streams because they change at very
    /// different rates: routing intent is edited by humans, membership churns with
    /// deploys and autoscaling.
    #[derive(Debug)]
    pub struct DiscoveryServer<T: Discovery> {
        inner: _Inner<T>,
        accept_compression_encodings: EnabledCompressionEncodings,
        send_compression_encodings: EnabledCompressionEncodings,
        max_decoding_message_size: Option<usize>,
        max_encoding_message_size: Option<usize>,
    }
    struct _Inner<T>(Arc<T>);
    impl<T: Discovery> DiscoveryServer<T> {
        pub fn new(inner: T) -> Self {
            Self::from_arc(Arc::new(inner))
        }
        pub fn from_arc(inner: Arc<T>) -> Self {
            let inner = _Inner(inner);
            Self {
                inner,
                accept_compression_encodings: Default::default(),
                send_compression_encodings: Default::default(),
                max_decoding_message_size: None,
                max_encoding_message_size: None,
            }
        }
        pub fn with_interceptor<F>(inner: T, interceptor: F) -> InterceptedService<Self, F>
        where
            F: tonic::service::Interceptor,
        {
            InterceptedService::new(Self::new(inner), interceptor)
        }
        /// Enable decompressing requests with the given encoding.
        #[must_use]
        pub fn accept_compressed(mut self, encoding: CompressionEncoding) -> Self {
            self.accept_compression_encodings.enable(encoding);
            self
        }
        /// Compress responses with the given encoding, if the client supports it.
        #[must_use]
        pub fn send_compressed(mut self, encoding: CompressionEncoding) -> Self {
            self.send_compression_encodings.enable(encoding);
            self
        }
        /// Limits the maximum size of a decoded message.
        ///
        /// Default: `4MB`
        #[must_use]
        pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
            self.max_decoding_message_size = Some(limit);
            self
        }
        /// Limits the maximum size of an encoded message.
        ///
        /// Default: `usize::MAX`
        #[must_use]
        pub fn max_encoding_message_size(mut self, limit: usize) -> Self {
            self.max_encoding_message_size = Some(limit);
            self
        }
    }
    impl<T, B> tonic::codegen::Service<http::Request<B>> for DiscoveryServer<T>
    where
        T: Discovery,
        B: Body + Send + 'static,
        B::Error: Into<StdError> + Send + 'static,
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
            let inner = self.inner.clone();
            match req.uri().path() {
                "/weft.discovery.v1.Discovery/WatchConfig" => {
                    #[allow(non_camel_case_types)]
                    struct WatchConfigSvc<T: Discovery>(pub Arc<T>);
                    impl<T: Discovery> tonic::server::ServerStreamingService<super::ConfigRequest>
                        for WatchConfigSvc<T>
                    {
                        type Response = super::ConfigBundle;
                        type ResponseStream = T::WatchConfigStream;
                        type Future =
                            BoxFuture<tonic::Response<Self::ResponseStream>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ConfigRequest>,
                        ) -> Self::Future {
                            let inner = Arc::clone(&self.0);
                            let fut = async move {
                                <T as Discovery>::watch_config(&inner, request).await
                            };
                            Box::pin(fut)
                        }
                    }
                    let accept_compression_encodings = self.accept_compression_encodings;
                    let send_compression_encodings = self.send_compression_encodings;
                    let max_decoding_message_size = self.max_decoding_message_size;
                    let max_encoding_message_size = self.max_encoding_message_size;
                    let inner = self.inner.clone();
                    let fut = async move {
                        let inner = inner.0;
                        let method = WatchConfigSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = tonic::server::Grpc::new(codec)
                            .apply_compression_config(
                                accept_compression_encodings,
                                send_compression_encodings,
                            )
                            .apply_max_message_size_config(
                                max_decoding_message_size,
                                max_encoding_message_size,
                            );
                        let res = grpc.server_streaming(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/weft.discovery.v1.Discovery/WatchEndpoints" => {
                    #[allow(non_camel_case_types)]
                    struct WatchEndpointsSvc<T: Discovery>(pub Arc<T>);
                    impl<T: Discovery>
                        tonic::server::ServerStreamingService<super::EndpointsRequest>
                        for WatchEndpointsSvc<T>
                    {
                        type Response = super::super::super::registry::v1::EndpointSet;
                        type ResponseStream = T::WatchEndpointsStream;
                        type Future =
                            BoxFuture<tonic::Response<Self::ResponseStream>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::EndpointsRequest>,
                        ) -> Self::Future {
                            let inner = Arc::clone(&self.0);
                            let fut = async move {
                                <T as Discovery>::watch_endpoints(&inner, request).await
                            };
                            Box::pin(fut)
                        }
                    }
                    let accept_compression_encodings = self.accept_compression_encodings;
                    let send_compression_encodings = self.send_compression_encodings;
                    let max_decoding_message_size = self.max_decoding_message_size;
                    let max_encoding_message_size = self.max_encoding_message_size;
                    let inner = self.inner.clone();
                    let fut = async move {
                        let inner = inner.0;
                        let method = WatchEndpointsSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = tonic::server::Grpc::new(codec)
                            .apply_compression_config(
                                accept_compression_encodings,
                                send_compression_encodings,
                            )
                            .apply_max_message_size_config(
                                max_decoding_message_size,
                                max_encoding_message_size,
                            );
                        let res = grpc.server_streaming(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                _ => Box::pin(async move {
                    Ok(http::Response::builder()
                        .status(200)
                        .header("grpc-status", "12")
                        .header("content-type", "application/grpc")
                        .body(empty_body())
                        .unwrap())
                }),
            }
        }
    }
    impl<T: Discovery> Clone for DiscoveryServer<T> {
        fn clone(&self) -> Self {
            let inner = self.inner.clone();
            Self {
                inner,
                accept_compression_encodings: self.accept_compression_encodings,
                send_compression_encodings: self.send_compression_encodings,
                max_decoding_message_size: self.max_decoding_message_size,
                max_encoding_message_size: self.max_encoding_message_size,
            }
        }
    }
    impl<T: Discovery> Clone for _Inner<T> {
        fn clone(&self) -> Self {
            Self(Arc::clone(&self.0))
        }
    }
    impl<T: std::fmt::Debug> std::fmt::Debug for _Inner<T> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self.0)
        }
    }
    impl<T: Discovery> tonic::server::NamedService for DiscoveryServer<T> {
        const NAME: &'static str = "weft.discovery.v1.Discovery";
    }
}
