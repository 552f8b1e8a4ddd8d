#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoRequest {
    #[prost(
        oneof = "proto_request::Body",
        tags = "1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11"
    )]
    pub body: ::core::option::Option<proto_request::Body>,
}
/// Nested message and enum types in `ProtoRequest`.
pub mod proto_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "1")]
        Vote(super::ProtoVoteReq),
        #[prost(message, tag = "2")]
        Append(super::ProtoAppendReq),
        #[prost(message, tag = "3")]
        TimeoutNow(super::ProtoTimeoutNowReq),
        #[prost(message, tag = "4")]
        Join(super::ProtoJoinReq),
        #[prost(message, tag = "5")]
        Leave(super::ProtoLeaveReq),
        #[prost(message, tag = "6")]
        OpenSession(super::ProtoOpenSessionReq),
        #[prost(message, tag = "7")]
        KeepAlive(super::ProtoKeepAliveReq),
        #[prost(message, tag = "8")]
        Command(super::ProtoCommandReq),
        #[prost(message, tag = "9")]
        Query(super::ProtoQueryReq),
        #[prost(message, tag = "10")]
        CloseSession(super::ProtoCloseSessionReq),
        #[prost(message, tag = "11")]
        Publish(super::ProtoPublishReq),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoResponse {
    #[prost(
        oneof = "proto_response::Body",
        tags = "1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12"
    )]
    pub body: ::core::option::Option<proto_response::Body>,
}
/// Nested message and enum types in `ProtoResponse`.
pub mod proto_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "1")]
        Vote(super::ProtoVoteResult),
        #[prost(message, tag = "2")]
        Append(super::ProtoAppendResult),
        #[prost(message, tag = "3")]
        TimeoutNow(super::ProtoTimeoutNowResult),
        #[prost(message, tag = "4")]
        Join(super::ProtoReply),
        #[prost(message, tag = "5")]
        Leave(super::ProtoReply),
        #[prost(message, tag = "6")]
        OpenSession(super::ProtoReply),
        #[prost(message, tag = "7")]
        KeepAlive(super::ProtoReply),
        #[prost(message, tag = "8")]
        Command(super::ProtoReply),
        #[prost(message, tag = "9")]
        Query(super::ProtoReply),
        #[prost(message, tag = "10")]
        CloseSession(super::ProtoReply),
        #[prost(message, tag = "11")]
        Publish(super::ProtoPublishResult),
        #[prost(message, tag = "12")]
        Unsupported(super::ProtoUnsupported),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoUnsupported {}
// ------- Peer RPCs --------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoVoteReq {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(string, tag = "2")]
    pub candidate: ::prost::alloc::string::String,
    #[prost(uint64, tag = "3")]
    pub last_log_entry_index: u64,
    #[prost(uint64, tag = "4")]
    pub last_log_entry_term: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoVoteResult {
    #[prost(oneof = "proto_vote_result::Result", tags = "1, 2")]
    pub result: ::core::option::Option<proto_vote_result::Result>,
}
/// Nested message and enum types in `ProtoVoteResult`.
pub mod proto_vote_result {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "1")]
        Ok(super::ProtoVoteSuccess),
        #[prost(message, tag = "2")]
        Err(super::ProtoPeerError),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoVoteSuccess {
    #[prost(bool, tag = "1")]
    pub vote_granted: bool,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoAppendReq {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(string, tag = "2")]
    pub leader: ::prost::alloc::string::String,
    #[prost(uint64, tag = "3")]
    pub previous_log_entry_index: u64,
    #[prost(uint64, tag = "4")]
    pub previous_log_entry_term: u64,
    #[prost(bool, tag = "5")]
    pub previous_is_base: bool,
    #[prost(message, repeated, tag = "6")]
    pub new_entries: ::prost::alloc::vec::Vec<ProtoLogEntry>,
    #[prost(uint64, tag = "7")]
    pub commit_index: u64,
    #[prost(uint64, tag = "8")]
    pub global_index: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoLogEntry {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(bytes = "vec", tag = "2")]
    pub data: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoAppendResult {
    #[prost(oneof = "proto_append_result::Result", tags = "1, 2")]
    pub result: ::core::option::Option<proto_append_result::Result>,
}
/// Nested message and enum types in `ProtoAppendResult`.
pub mod proto_append_result {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "1")]
        Ok(super::ProtoAppendSuccess),
        #[prost(message, tag = "2")]
        Err(super::ProtoPeerError),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoAppendSuccess {
    #[prost(uint64, tag = "1")]
    pub last_log_entry_index: u64,
    #[prost(uint64, tag = "2")]
    pub low_water_index: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoTimeoutNowReq {
    #[prost(uint64, tag = "1")]
    pub term: u64,
    #[prost(string, tag = "2")]
    pub leader: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoTimeoutNowResult {
    #[prost(oneof = "proto_timeout_now_result::Result", tags = "1, 2")]
    pub result: ::core::option::Option<proto_timeout_now_result::Result>,
}
/// Nested message and enum types in `ProtoTimeoutNowResult`.
pub mod proto_timeout_now_result {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "1")]
        Ok(super::ProtoEmpty),
        #[prost(message, tag = "2")]
        Err(super::ProtoPeerError),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoPeerError {
    #[prost(oneof = "proto_peer_error::Err", tags = "1, 2, 3, 4")]
    pub err: ::core::option::Option<proto_peer_error::Err>,
}
/// Nested message and enum types in `ProtoPeerError`.
pub mod proto_peer_error {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Err {
        #[prost(message, tag = "1")]
        StaleTerm(super::ProtoStaleTerm),
        #[prost(message, tag = "2")]
        MissingLog(super::ProtoMissingLog),
        #[prost(message, tag = "3")]
        NotInCluster(super::ProtoEmpty),
        #[prost(message, tag = "4")]
        ServerFault(super::ProtoServerFault),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoStaleTerm {
    #[prost(uint64, tag = "1")]
    pub current_term: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoMissingLog {
    #[prost(uint64, tag = "1")]
    pub last_log_entry_index: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoServerFault {
    #[prost(string, tag = "1")]
    pub message: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoEmpty {}
// ------- Membership and client RPCs --------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoJoinReq {
    #[prost(string, tag = "1")]
    pub member: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoLeaveReq {
    #[prost(string, tag = "1")]
    pub member: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoOperation {
    #[prost(string, tag = "1")]
    pub op_type: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoOpenSessionReq {
    #[prost(string, tag = "1")]
    pub client_id: ::prost::alloc::string::String,
    /// Empty if the client doesn't receive events.
    #[prost(string, tag = "2")]
    pub client_address: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoKeepAliveReq {
    #[prost(uint64, tag = "1")]
    pub session_id: u64,
    #[prost(uint64, tag = "2")]
    pub command_sequence: u64,
    #[prost(uint64, tag = "3")]
    pub event_index: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoCommandReq {
    #[prost(uint64, tag = "1")]
    pub session_id: u64,
    #[prost(uint64, tag = "2")]
    pub sequence: u64,
    #[prost(message, optional, tag = "3")]
    pub operation: ::core::option::Option<ProtoOperation>,
    #[prost(enumeration = "ProtoCommandConsistency", tag = "4")]
    pub consistency: i32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoQueryReq {
    #[prost(uint64, tag = "1")]
    pub session_id: u64,
    #[prost(uint64, tag = "2")]
    pub sequence: u64,
    #[prost(uint64, tag = "3")]
    pub index: u64,
    #[prost(message, optional, tag = "4")]
    pub operation: ::core::option::Option<ProtoOperation>,
    #[prost(enumeration = "ProtoQueryConsistency", tag = "5")]
    pub consistency: i32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoCloseSessionReq {
    #[prost(uint64, tag = "1")]
    pub session_id: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoEvent {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoPublishReq {
    #[prost(uint64, tag = "1")]
    pub session_id: u64,
    #[prost(uint64, tag = "2")]
    pub event_index: u64,
    #[prost(uint64, tag = "3")]
    pub previous_index: u64,
    #[prost(message, repeated, tag = "4")]
    pub events: ::prost::alloc::vec::Vec<ProtoEvent>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoPublishResult {
    #[prost(oneof = "proto_publish_result::Result", tags = "1, 2")]
    pub result: ::core::option::Option<proto_publish_result::Result>,
}
/// Nested message and enum types in `ProtoPublishResult`.
pub mod proto_publish_result {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "1")]
        Ok(super::ProtoPublishSuccess),
        #[prost(message, tag = "2")]
        Err(super::ProtoClientError),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoPublishSuccess {
    #[prost(uint64, tag = "1")]
    pub event_index: u64,
}
/// Shared envelope for every reply that carries a leader hint.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoReply {
    /// Empty if no leader is known.
    #[prost(string, tag = "1")]
    pub leader: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "2")]
    pub members: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(oneof = "proto_reply::Result", tags = "3, 4")]
    pub result: ::core::option::Option<proto_reply::Result>,
}
/// Nested message and enum types in `ProtoReply`.
pub mod proto_reply {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "3")]
        Ok(super::ProtoReplySuccess),
        #[prost(message, tag = "4")]
        Err(super::ProtoClientError),
    }
}
/// Superset of the success payloads; each reply kind reads the fields it owns.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoReplySuccess {
    #[prost(uint64, tag = "1")]
    pub index: u64,
    #[prost(uint64, tag = "2")]
    pub event_index: u64,
    #[prost(bytes = "vec", tag = "3")]
    pub output: ::prost::alloc::vec::Vec<u8>,
    #[prost(uint64, tag = "4")]
    pub session_id: u64,
    #[prost(uint64, tag = "5")]
    pub timeout_ms: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoClientError {
    #[prost(oneof = "proto_client_error::Err", tags = "1, 2, 3, 4, 5")]
    pub err: ::core::option::Option<proto_client_error::Err>,
}
/// Nested message and enum types in `ProtoClientError`.
pub mod proto_client_error {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Err {
        #[prost(message, tag = "1")]
        NotLeader(super::ProtoEmpty),
        #[prost(message, tag = "2")]
        UnknownSession(super::ProtoEmpty),
        #[prost(message, tag = "3")]
        ConfigurationChangeInProgress(super::ProtoEmpty),
        #[prost(message, tag = "4")]
        Application(super::ProtoServerFault),
        #[prost(message, tag = "5")]
        Internal(super::ProtoServerFault),
    }
}
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ProtoCommandConsistency {
    CommandNone = 0,
    CommandSequential = 1,
    CommandLinearizable = 2,
}
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ProtoQueryConsistency {
    QueryCausal = 0,
    QuerySequential = 1,
    QueryBoundedLinearizable = 2,
    QueryLinearizable = 3,
}
#[doc = r" Generated client implementations."]
pub mod grpc_raft_client {
    #![allow(unused_variables, dead_code, missing_docs)]
    use tonic::codegen::*;
    #[doc = " A single envelope RPC. Members and clients both listen on it; the request's variant decides"]
    #[doc = " which handler logic runs."]
    pub struct GrpcRaftClient<T> {
        inner: tonic::client::Grpc<T>,
    }
    impl GrpcRaftClient<tonic::transport::Channel> {
        #[doc = r" Attempt to create a new client by connecting to a given endpoint."]
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: std::convert::TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }
    impl<T> GrpcRaftClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::ResponseBody: Body + HttpBody + Send + 'static,
        T::Error: Into<StdError>,
        <T::ResponseBody as HttpBody>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }
        pub fn with_interceptor(inner: T, interceptor: impl Into<tonic::Interceptor>) -> Self {
            let inner = tonic::client::Grpc::with_interceptor(inner, interceptor);
            Self { inner }
        }
        pub async fn dispatch(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoRequest>,
        ) -> Result<tonic::Response<super::ProtoResponse>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/raft.GrpcRaft/Dispatch");
            self.inner.unary(request.into_request(), path, codec).await
        }
    }
    impl<T: Clone> Clone for GrpcRaftClient<T> {
        fn clone(&self) -> Self {
            Self {
                inner: self.inner.clone(),
            }
        }
    }
    impl<T> std::fmt::Debug for GrpcRaftClient<T> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "GrpcRaftClient {{ ... }}")
        }
    }
}
#[doc = r" Generated server implementations."]
pub mod grpc_raft_server {
    #![allow(unused_variables, dead_code, missing_docs)]
    use tonic::codegen::*;
    #[doc = "Generated trait containing gRPC methods that should be implemented for use with GrpcRaftServer."]
    #[async_trait]
    pub trait GrpcRaft: Send + Sync + 'static {
        async fn dispatch(
            &self,
            request: tonic::Request<super::ProtoRequest>,
        ) -> Result<tonic::Response<super::ProtoResponse>, tonic::Status>;
    }
    #[doc = " A single envelope RPC. Members and clients both listen on it; the request's variant decides"]
    #[doc = " which handler logic runs."]
    #[derive(Debug)]
    pub struct GrpcRaftServer<T: GrpcRaft> {
        inner: _Inner<T>,
    }
    struct _Inner<T>(Arc<T>, Option<tonic::Interceptor>);
    impl<T: GrpcRaft> GrpcRaftServer<T> {
        pub fn new(inner: T) -> Self {
            let inner = Arc::new(inner);
            let inner = _Inner(inner, None);
            Self { inner }
        }
        pub fn with_interceptor(inner: T, interceptor: impl Into<tonic::Interceptor>) -> Self {
            let inner = Arc::new(inner);
            let inner = _Inner(inner, Some(interceptor.into()));
            Self { inner }
        }
    }
    impl<T, B> Service<http::Request<B>> for GrpcRaftServer<T>
    where
        T: GrpcRaft,
        B: HttpBody + Send + Sync + 'static,
        B::Error: Into<StdError> + Send + 'static,
    {
        type Response = http::Response<tonic::body::BoxBody>;
        type Error = Never;
        type Future = BoxFuture<Self::Response, Self::Error>;
        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            let inner = self.inner.clone();
            match req.uri().path() {
                "/raft.GrpcRaft/Dispatch" => {
                    #[allow(non_camel_case_types)]
                    struct DispatchSvc<T: GrpcRaft>(pub Arc<T>);
                    impl<T: GrpcRaft> tonic::server::UnaryService<super::ProtoRequest> for DispatchSvc<T> {
                        type Response = super::ProtoResponse;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoRequest>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).dispatch(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = DispatchSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                _ => Box::pin(async move {
                    Ok(http::Response::builder()
                        .status(200)
                        .header("grpc-status", "12")
                        .header("content-type", "application/grpc")
                        .body(tonic::body::BoxBody::empty())
                        .unwrap())
                }),
            }
        }
    }
    impl<T: GrpcRaft> Clone for GrpcRaftServer<T> {
        fn clone(&self) -> Self {
            let inner = self.inner.clone();
            Self { inner }
        }
    }
    impl<T: GrpcRaft> Clone for _Inner<T> {
        fn clone(&self) -> Self {
            Self(self.0.clone(), self.1.clone())
        }
    }
    impl<T: std::fmt::Debug> std::fmt::Debug for _Inner<T> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self.0)
        }
    }
    impl<T: GrpcRaft> tonic::transport::NamedService for GrpcRaftServer<T> {
        const NAME: &'static str = "raft.GrpcRaft";
    }
}
