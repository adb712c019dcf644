//! Assembles the build graph for a [BuildConfig].

use owrt_llb::{CopyPath, FileActions, Mkdir, Mkfile, State};
use thiserror::Error;

use crate::config::BuildConfig;
use crate::signing_keys::SigningKeys;

/// The image the build environment is based on.
pub const BASE_IMAGE: &str = "docker.io/library/debian:buster";

/// Software needed to run the OpenWRT image builder.
pub const BUILDER_PACKAGES: [&str; 15] = [
    "build-essential",
    "libncurses5-dev",
    "zlib1g-dev",
    "gawk",
    "git",
    "gettext",
    "libssl-dev",
    "xsltproc",
    "wget",
    "unzip",
    "python",
    "python3",
    "curl",
    "xxd",
    "signify-openbsd",
];

/// Directory the signing keys are written to, one file per key id.
pub const SIGNING_KEYS_DIR: &str = "/signingkeys";

/// Where the image builder expects its configuration.
pub const CONFIG_PATH: &str = "/myconfig";

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Llb(#[from] owrt_llb::Error),
}

/// Returns the build environment with the serialized `config` at
/// [CONFIG_PATH]. The configuration is written last, so changing it
/// invalidates nothing but this final step.
pub fn config_to_llb(config: &BuildConfig, keys: &SigningKeys) -> Result<State, GraphError> {
    let base = build_base(keys)?;

    Ok(base
        .file(FileActions::default().mkfile(Mkfile::new(CONFIG_PATH, 0o644, config.to_json()?)))?
        .with_custom_name("copy builder configuration to target"))
}

/// Returns the builder base image. It contains all the software required to
/// create a custom OpenWRT image, and the signing keys to verify downloads.
pub fn build_base(keys: &SigningKeys) -> Result<State, GraphError> {
    let base = State::image(BASE_IMAGE)?.with_custom_name("create openwrtbuilder base image");

    let base = base
        .run([
            "sh".to_string(),
            "-c".into(),
            format!(
                "apt-get update && apt-get install -y {}",
                BUILDER_PACKAGES.join(" ")
            ),
        ])?
        .with_custom_name("install required software packages");

    // written in scratch and copied in, so the key files don't depend on the
    // installed software and vice versa.
    let keys = signing_keys_state(keys)?;

    Ok(base
        .file(FileActions::default().copy(&keys, CopyPath::new(SIGNING_KEYS_DIR, SIGNING_KEYS_DIR)))?
        .with_custom_name("copy trusted signing keys"))
}

/// Writes all keys to [SIGNING_KEYS_DIR] in an empty filesystem, in
/// ascending order of their ids.
pub fn signing_keys_state(keys: &SigningKeys) -> Result<State, GraphError> {
    let mut sorted = keys.keys.to_vec();
    sorted.sort_unstable_by_key(|(id, _)| *id);

    let actions = sorted.into_iter().fold(
        FileActions::default().mkdir(Mkdir::new(SIGNING_KEYS_DIR, 0o755).created_at(keys.timestamp)),
        |actions, (id, key)| {
            actions.mkfile(
                Mkfile::new(
                    format!("{}/{}", SIGNING_KEYS_DIR, id),
                    0o644,
                    key.as_bytes().to_vec(),
                )
                .created_at(keys.timestamp),
            )
        },
    );

    Ok(State::scratch()
        .file(actions)?
        .with_custom_name("write signing keys to scratch"))
}
