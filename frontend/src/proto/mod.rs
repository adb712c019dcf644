//! Messages and client of the LLB bridge, the gRPC service a frontend uses
//! to resolve graphs (`moby.buildkit.v1.frontend`).
//!
//! Only the parts of the protocol used here are modelled. Field tags match
//! the upstream definitions, unknown fields are skipped when decoding.

use std::collections::BTreeMap;

use prost::Message;

pub use llb_bridge_client::LlbBridgeClient;

#[derive(Clone, PartialEq, Message)]
pub struct SolveRequest {
    #[prost(message, optional, tag = "1")]
    pub definition: Option<owrt_llb::proto::Definition>,
    #[prost(string, tag = "2")]
    pub frontend: String,
    #[prost(btree_map = "string, string", tag = "3")]
    pub frontend_opt: BTreeMap<String, String>,
    #[prost(bool, tag = "5")]
    pub allow_result_return: bool,
    #[prost(bool, tag = "6")]
    pub allow_result_array_ref: bool,
    #[prost(bool, tag = "10")]
    pub r#final: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct SolveResponse {
    /// Set by older servers instead of `result`.
    #[prost(string, tag = "1")]
    pub r#ref: String,
    #[prost(message, optional, tag = "3")]
    pub result: Option<Result>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Result {
    #[prost(oneof = "result::Result", tags = "1, 2, 3, 4")]
    pub result: Option<result::Result>,
    #[prost(btree_map = "string, bytes", tag = "10")]
    pub metadata: BTreeMap<String, Vec<u8>>,
}

pub mod result {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Result {
        #[prost(string, tag = "1")]
        RefDeprecated(String),
        #[prost(message, tag = "2")]
        RefsDeprecated(super::RefMapDeprecated),
        #[prost(message, tag = "3")]
        Ref(super::Ref),
        #[prost(message, tag = "4")]
        Refs(super::RefMap),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct RefMapDeprecated {
    #[prost(btree_map = "string, string", tag = "1")]
    pub refs: BTreeMap<String, String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Ref {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(message, optional, tag = "2")]
    pub def: Option<owrt_llb::proto::Definition>,
}

#[derive(Clone, PartialEq, Message)]
pub struct RefMap {
    #[prost(btree_map = "string, message", tag = "1")]
    pub refs: BTreeMap<String, Ref>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ReadFileRequest {
    #[prost(string, tag = "1")]
    pub r#ref: String,
    #[prost(string, tag = "2")]
    pub file_path: String,
    #[prost(message, optional, tag = "3")]
    pub range: Option<FileRange>,
}

#[derive(Clone, PartialEq, Message)]
pub struct FileRange {
    #[prost(int64, tag = "1")]
    pub offset: i64,
    #[prost(int64, tag = "2")]
    pub length: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct ReadFileResponse {
    #[prost(bytes = "bytes", tag = "1")]
    pub data: bytes::Bytes,
}

#[derive(Clone, PartialEq, Message)]
pub struct ReturnRequest {
    #[prost(message, optional, tag = "1")]
    pub result: Option<Result>,
    #[prost(message, optional, tag = "2")]
    pub error: Option<Status>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ReturnResponse {}

/// `google.rpc.Status`, without details.
#[derive(Clone, PartialEq, Message)]
pub struct Status {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

pub mod llb_bridge_client {
    use tonic::codegen::http::uri::PathAndQuery;
    use tonic::transport::Channel;

    const SERVICE: &str = "moby.buildkit.v1.frontend.LLBBridge";

    #[derive(Debug, Clone)]
    pub struct LlbBridgeClient {
        inner: tonic::client::Grpc<Channel>,
    }

    impl LlbBridgeClient {
        pub fn new(channel: Channel) -> Self {
            Self {
                inner: tonic::client::Grpc::new(channel),
            }
        }

        async fn unary<Req, Resp>(
            &mut self,
            method: &'static str,
            path: &'static str,
            request: Req,
        ) -> Result<tonic::Response<Resp>, tonic::Status>
        where
            Req: prost::Message + Send + Sync + 'static,
            Resp: prost::Message + Default + Send + Sync + 'static,
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e),
                )
            })?;
            let codec = tonic::codec::ProstCodec::<Req, Resp>::default();
            let mut request = tonic::Request::new(request);
            request
                .extensions_mut()
                .insert(tonic::GrpcMethod::new(SERVICE, method));
            self.inner
                .unary(request, PathAndQuery::from_static(path), codec)
                .await
        }

        pub async fn solve(
            &mut self,
            request: super::SolveRequest,
        ) -> Result<tonic::Response<super::SolveResponse>, tonic::Status> {
            self.unary(
                "Solve",
                "/moby.buildkit.v1.frontend.LLBBridge/Solve",
                request,
            )
            .await
        }

        pub async fn read_file(
            &mut self,
            request: super::ReadFileRequest,
        ) -> Result<tonic::Response<super::ReadFileResponse>, tonic::Status> {
            self.unary(
                "ReadFile",
                "/moby.buildkit.v1.frontend.LLBBridge/ReadFile",
                request,
            )
            .await
        }

        pub async fn r#return(
            &mut self,
            request: super::ReturnRequest,
        ) -> Result<tonic::Response<super::ReturnResponse>, tonic::Status> {
            self.unary(
                "Return",
                "/moby.buildkit.v1.frontend.LLBBridge/Return",
                request,
            )
            .await
        }
    }
}
