use bytes::Bytes;
use owrt_llb::Definition;
use tonic::async_trait;
use tracing::instrument;

use super::{BuildOpts, ExecutionService, ResultRef, SolveResult};
use crate::proto::{self, result, LlbBridgeClient};

/// Talks to the LLB bridge of a BuildKit daemon.
pub struct GRPCExecutionService {
    client: LlbBridgeClient,
    build_opts: BuildOpts,
}

impl GRPCExecutionService {
    pub fn from_client(client: LlbBridgeClient, build_opts: BuildOpts) -> Self {
        Self { client, build_opts }
    }
}

impl From<proto::SolveResponse> for SolveResult {
    fn from(resp: proto::SolveResponse) -> Self {
        match resp.result.and_then(|r| r.result) {
            None if resp.r#ref.is_empty() => SolveResult::Empty,
            None => SolveResult::Single(ResultRef(resp.r#ref)),
            Some(result::Result::RefDeprecated(id)) => SolveResult::Single(ResultRef(id)),
            Some(result::Result::Ref(r)) => SolveResult::Single(ResultRef(r.id)),
            Some(result::Result::RefsDeprecated(refs)) => SolveResult::Multi(
                refs.refs
                    .into_iter()
                    .map(|(k, id)| (k, ResultRef(id)))
                    .collect(),
            ),
            Some(result::Result::Refs(refs)) => SolveResult::Multi(
                refs.refs
                    .into_iter()
                    .map(|(k, r)| (k, ResultRef(r.id)))
                    .collect(),
            ),
        }
    }
}

/// Maps a gRPC status to an [std::io::Error], keeping not found errors
/// distinguishable.
fn status_to_io(status: tonic::Status) -> std::io::Error {
    match status.code() {
        tonic::Code::NotFound => std::io::Error::new(std::io::ErrorKind::NotFound, status),
        tonic::Code::DeadlineExceeded => {
            std::io::Error::new(std::io::ErrorKind::TimedOut, status)
        }
        _ => std::io::Error::other(status),
    }
}

#[async_trait]
impl ExecutionService for GRPCExecutionService {
    fn build_opts(&self) -> &BuildOpts {
        &self.build_opts
    }

    #[instrument(skip_all, fields(definition.head = %definition.head()), err)]
    async fn solve(&self, definition: Definition) -> std::io::Result<SolveResult> {
        let mut client = self.client.clone();
        client
            .solve(proto::SolveRequest {
                definition: Some(definition.to_pb()),
                allow_result_return: true,
                ..Default::default()
            })
            .await
            .map(|resp| resp.into_inner().into())
            .map_err(status_to_io)
    }

    #[instrument(skip(self), err)]
    async fn read_file(&self, reference: &ResultRef, path: &str) -> std::io::Result<Bytes> {
        let mut client = self.client.clone();
        client
            .read_file(proto::ReadFileRequest {
                r#ref: reference.0.clone(),
                file_path: path.to_string(),
                range: None,
            })
            .await
            .map(|resp| resp.into_inner().data)
            .map_err(status_to_io)
    }

    #[instrument(skip(self), err)]
    async fn return_result(&self, result: Result<ResultRef, String>) -> std::io::Result<()> {
        let request = match result {
            Ok(reference) => proto::ReturnRequest {
                result: Some(proto::Result {
                    result: Some(result::Result::Ref(proto::Ref {
                        id: reference.0,
                        def: None,
                    })),
                    metadata: Default::default(),
                }),
                error: None,
            },
            Err(message) => proto::ReturnRequest {
                result: None,
                error: Some(proto::Status {
                    code: tonic::Code::Unknown as i32,
                    message,
                }),
            },
        };

        let mut client = self.client.clone();
        client
            .r#return(request)
            .await
            .map(|_| ())
            .map_err(status_to_io)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rstest::rstest;

    use crate::executionservice::{ResultRef, SolveResult};
    use crate::proto::{self, result};

    fn single(id: &str) -> SolveResult {
        SolveResult::Single(ResultRef(id.into()))
    }

    fn response(toplevel_ref: &str, result: Option<result::Result>) -> proto::SolveResponse {
        proto::SolveResponse {
            r#ref: toplevel_ref.into(),
            result: result.map(|result| proto::Result {
                result: Some(result),
                metadata: Default::default(),
            }),
        }
    }

    fn r(id: &str) -> proto::Ref {
        proto::Ref {
            id: id.into(),
            def: None,
        }
    }

    #[rstest]
    #[case::nothing(response("", None), SolveResult::Empty)]
    #[case::toplevel_ref(response("a", None), single("a"))]
    #[case::ref_deprecated(response("", Some(result::Result::RefDeprecated("a".into()))), single("a"))]
    #[case::single_ref(response("", Some(result::Result::Ref(r("a")))), single("a"))]
    #[case::refs(
        response("", Some(result::Result::Refs(proto::RefMap {
            refs: BTreeMap::from([("linux/amd64".into(), r("a")), ("linux/arm64".into(), r("b"))]),
        }))),
        SolveResult::Multi(BTreeMap::from([
            ("linux/amd64".into(), ResultRef("a".into())),
            ("linux/arm64".into(), ResultRef("b".into())),
        ]))
    )]
    #[case::refs_deprecated(
        response("", Some(result::Result::RefsDeprecated(proto::RefMapDeprecated {
            refs: BTreeMap::from([("linux/amd64".into(), "a".into())]),
        }))),
        SolveResult::Multi(BTreeMap::from([("linux/amd64".into(), ResultRef("a".into()))]))
    )]
    fn solve_result_from_response(
        #[case] response: proto::SolveResponse,
        #[case] expected: SolveResult,
    ) {
        assert_eq!(expected, SolveResult::from(response));
    }

    #[test]
    fn status_to_io() {
        assert_eq!(
            std::io::ErrorKind::NotFound,
            super::status_to_io(tonic::Status::not_found("gone")).kind()
        );
        assert_eq!(
            std::io::ErrorKind::Other,
            super::status_to_io(tonic::Status::internal("boom")).kind()
        );
    }
}
