use std::collections::BTreeMap;

use bytes::Bytes;
use owrt_llb::Definition;
use tonic::async_trait;

use crate::errors::SolveError;

mod dummy;
mod from_addr;
mod grpc;
mod memory;

pub use dummy::DummyExecutionService;
pub use from_addr::from_addr;
pub use grpc::GRPCExecutionService;
pub use memory::{Entry, MemoryExecutionService, Tree};

/// The options a build was invoked with.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildOpts {
    /// The client session, providing local sources.
    pub session_id: String,
    /// Frontend options, like `filename`.
    pub opts: BTreeMap<String, String>,
}

/// Refers to a resolved filesystem, held by the execution service.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResultRef(pub String);

impl std::fmt::Display for ResultRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What solving a definition produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SolveResult {
    Empty,
    Single(ResultRef),
    /// Several results, keyed by e.g. platform.
    Multi(BTreeMap<String, ResultRef>),
}

impl SolveResult {
    /// Returns the only reference. Anything else is an error, there's no
    /// picking one of several.
    pub fn single_ref(self) -> Result<ResultRef, SolveError> {
        match self {
            SolveResult::Single(reference) => Ok(reference),
            SolveResult::Empty => Err(SolveError::NoResult),
            SolveResult::Multi(refs) if refs.is_empty() => Err(SolveError::NoResult),
            SolveResult::Multi(refs) => Err(SolveError::AmbiguousResult(refs.len())),
        }
    }
}

/// The service resolving build graphs into filesystems.
///
/// All calls may fail or be slow, they usually cross the network.
/// Dropping a returned future aborts the call.
#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// The options the build was invoked with.
    fn build_opts(&self) -> &BuildOpts;

    /// Resolves the graph.
    async fn solve(&self, definition: Definition) -> std::io::Result<SolveResult>;

    /// Reads the full contents of a file of a resolved filesystem.
    async fn read_file(&self, reference: &ResultRef, path: &str) -> std::io::Result<Bytes>;

    /// Reports the final outcome of the build.
    async fn return_result(&self, result: Result<ResultRef, String>) -> std::io::Result<()>;
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rstest::rstest;

    use super::{ResultRef, SolveResult};
    use crate::errors::SolveError;

    #[test]
    fn single_ref() {
        assert_eq!(
            ResultRef("a".into()),
            SolveResult::Single(ResultRef("a".into()))
                .single_ref()
                .expect("must succeed")
        );
    }

    #[rstest]
    #[case::empty(SolveResult::Empty, None)]
    #[case::empty_map(SolveResult::Multi(BTreeMap::new()), None)]
    #[case::one_in_map(
        SolveResult::Multi(BTreeMap::from([("linux/amd64".into(), ResultRef("a".into()))])),
        Some(1)
    )]
    #[case::two_in_map(
        SolveResult::Multi(BTreeMap::from([
            ("linux/amd64".into(), ResultRef("a".into())),
            ("linux/arm64".into(), ResultRef("b".into())),
        ])),
        Some(2)
    )]
    fn single_ref_fail(#[case] result: SolveResult, #[case] ambiguous: Option<usize>) {
        match (result.single_ref(), ambiguous) {
            (Err(SolveError::NoResult), None) => {}
            (Err(SolveError::AmbiguousResult(n)), Some(expected)) => assert_eq!(expected, n),
            (other, _) => panic!("unexpected {other:?}"),
        }
    }
}
