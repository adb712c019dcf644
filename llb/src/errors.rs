use thiserror::Error;

use crate::digests;

/// Errors constructing, marshalling or validating a build graph.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot marshal the empty state")]
    EmptyState,

    #[error("exec needs at least one argument")]
    EmptyArgs,

    #[error("invalid image reference: {0:?}")]
    InvalidImageReference(String),

    #[error("failed to encode source attribute: {0}")]
    EncodeAttribute(serde_json::Error),

    #[error("definition contains no ops")]
    EmptyDefinition,

    #[error("failed to decode op at position {0}: {1}")]
    DecodeOp(usize, prost::DecodeError),

    #[error("op at position {0} has no body")]
    MissingOpBody(usize),

    #[error("op at position {0} refers to unknown input {1}")]
    UnknownInput(usize, String),

    #[error("last op must be a terminal op with a single input")]
    InvalidTerminalOp,

    #[error(transparent)]
    InvalidDigest(#[from] digests::Error),
}
