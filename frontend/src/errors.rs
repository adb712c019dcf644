use thiserror::Error;

use crate::config::ParseError;
use crate::graph::GraphError;

/// Errors aborting a build, by the stage they occured in.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to load configuration: {0}")]
    Fetch(#[source] SolveError),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] ParseError),

    #[error("failed to assemble build graph: {0}")]
    Build(#[from] GraphError),

    #[error("failed to resolve build graph: {0}")]
    Resolve(#[source] SolveError),
}

/// Errors occuring when handing a graph to the [crate::ExecutionService].
#[derive(Debug, Error)]
pub enum SolveError {
    #[error("unable to marshal graph: {0}")]
    Marshal(#[from] owrt_llb::Error),

    #[error("solve failed: {0}")]
    Solve(#[source] std::io::Error),

    #[error("solve produced no result")]
    NoResult,

    #[error("solve produced {0} results, expected exactly one")]
    AmbiguousResult(usize),

    #[error("unable to read {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
