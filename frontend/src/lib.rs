//! A BuildKit frontend building the environment for the OpenWRT image
//! builder.
//!
//! A build fetches the configuration file from the client, assembles a build
//! graph providing all the software the image builder needs, the trusted
//! signing keys and the configuration, and has the execution service resolve
//! that graph.

pub mod config;
pub mod errors;
pub mod executionservice;
pub mod graph;
pub mod proto;
pub mod signing_keys;
pub mod tonic;

mod driver;
mod fetch;

pub use driver::{build, solve_single};
pub use errors::{Error, SolveError};
pub use executionservice::ExecutionService;
pub use fetch::{config_filename, config_source, get_config_file};

/// Build option naming the configuration file in the build context.
pub const KEY_FILENAME: &str = "filename";

/// Configuration file read when [KEY_FILENAME] is not set.
pub const DEFAULT_FILENAME: &str = "owrtfile";

/// Name of the local source the configuration file is read from.
pub const LOCAL_NAME_CONFIG: &str = "dockerfile";

/// Cache key hint for the local source, so transfers of the configuration
/// file are shared across builds.
pub const SHARED_KEY_HINT: &str = "owrtfile";
