//! A content-addressed build graph of filesystem operations, and its wire
//! format.
//!
//! Graphs are assembled through [State], which is immutable: every operation
//! returns a new state pointing at the vertex that produces it. A vertex is
//! identified by the sha256 [Digest] of its canonical protobuf encoding, which
//! includes the digests of its inputs, so structurally identical graphs always
//! hash identically.

mod definition;
mod digests;
mod errors;
mod fileop;
mod state;

pub mod proto;

pub use definition::Definition;
pub use digests::{Digest, SHA256_LEN};
pub use errors::Error;
pub use fileop::{CopyPath, FileAction, FileActionKind, FileActions, Mkdir, Mkfile};
pub use state::{
    normalize_image_reference, Exec, LocalOptions, Op, State, Vertex,
    ATTR_LOCAL_INCLUDE_PATTERNS, ATTR_LOCAL_SESSION, ATTR_LOCAL_SHARED_KEY_HINT,
    CUSTOM_NAME_KEY, DEFAULT_ARCHITECTURE, DEFAULT_OS, DEFAULT_PATH_ENV,
};
