use bytes::Bytes;
use owrt_llb::Definition;
use tonic::async_trait;
use tracing::instrument;

use super::{BuildOpts, ExecutionService, ResultRef, SolveResult};

/// Refuses to resolve anything.
#[derive(Default)]
pub struct DummyExecutionService {
    build_opts: BuildOpts,
}

impl DummyExecutionService {
    pub fn new(build_opts: BuildOpts) -> Self {
        Self { build_opts }
    }
}

fn unsupported() -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "execution is not supported with DummyExecutionService",
    )
}

#[async_trait]
impl ExecutionService for DummyExecutionService {
    fn build_opts(&self) -> &BuildOpts {
        &self.build_opts
    }

    #[instrument(skip_all, err)]
    async fn solve(&self, _definition: Definition) -> std::io::Result<SolveResult> {
        Err(unsupported())
    }

    #[instrument(skip(self), err)]
    async fn read_file(&self, _reference: &ResultRef, _path: &str) -> std::io::Result<Bytes> {
        Err(unsupported())
    }

    #[instrument(skip(self), err)]
    async fn return_result(&self, _result: Result<ResultRef, String>) -> std::io::Result<()> {
        Err(unsupported())
    }
}
