use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::trace;

use crate::fileop::{FileAction, FileActions};
use crate::proto::{self, op};
use crate::{Definition, Digest, Error};

/// Key in [proto::OpMetadata::description] holding the label of an op.
pub const CUSTOM_NAME_KEY: &str = "llb.customname";

/// PATH for exec ops, unless set explicitly.
pub const DEFAULT_PATH_ENV: &str =
    "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// All ops are built for this platform.
pub const DEFAULT_ARCHITECTURE: &str = "amd64";
pub const DEFAULT_OS: &str = "linux";

/// Attribute keys of local sources.
pub const ATTR_LOCAL_INCLUDE_PATTERNS: &str = "local.includepattern";
pub const ATTR_LOCAL_SESSION: &str = "local.session";
pub const ATTR_LOCAL_SHARED_KEY_HINT: &str = "local.sharedkeyhint";

/// Options of a local source, a directory provided by the client.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct LocalOptions {
    /// Only transfer files matching these patterns.
    pub include_patterns: Vec<String>,
    /// The client session providing the directory.
    pub session_id: Option<String>,
    /// Uploads with the same hint may share a cache.
    pub shared_key_hint: Option<String>,
}

/// Process execution.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Exec {
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub cwd: String,
}

/// The body of a vertex, without its inputs.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    /// A root filesystem pulled from a container image reference.
    ImagePull { reference: String },
    /// A directory provided by the client.
    Local { name: String, options: LocalOptions },
    /// A command run with its input mounted at `/`.
    Exec(Exec),
    /// Filesystem operations not involving a process.
    File(Vec<FileAction>),
}

impl Op {
    fn to_pb(&self, inputs: &[Arc<Vertex>]) -> Result<proto::Op, Error> {
        let body = match self {
            Op::ImagePull { reference } => op::Op::Source(proto::SourceOp {
                identifier: format!("docker-image://{}", reference),
                attrs: BTreeMap::new(),
            }),
            Op::Local { name, options } => {
                let mut attrs = BTreeMap::new();
                if !options.include_patterns.is_empty() {
                    attrs.insert(
                        ATTR_LOCAL_INCLUDE_PATTERNS.to_string(),
                        serde_json::to_string(&options.include_patterns)
                            .map_err(Error::EncodeAttribute)?,
                    );
                }
                if let Some(session_id) = &options.session_id {
                    attrs.insert(ATTR_LOCAL_SESSION.to_string(), session_id.clone());
                }
                if let Some(hint) = &options.shared_key_hint {
                    attrs.insert(ATTR_LOCAL_SHARED_KEY_HINT.to_string(), hint.clone());
                }
                op::Op::Source(proto::SourceOp {
                    identifier: format!("local://{}", name),
                    attrs,
                })
            }
            Op::Exec(exec) => op::Op::Exec(proto::ExecOp {
                meta: Some(proto::Meta {
                    args: exec.args.clone(),
                    env: exec.env.clone(),
                    cwd: exec.cwd.clone(),
                    user: String::new(),
                }),
                mounts: vec![proto::Mount {
                    input: if inputs.is_empty() { -1 } else { 0 },
                    selector: String::new(),
                    dest: "/".into(),
                    output: 0,
                    readonly: false,
                }],
            }),
            Op::File(actions) => op::Op::File(proto::FileOp {
                actions: actions.iter().map(Into::into).collect(),
            }),
        };

        Ok(proto::Op {
            inputs: inputs
                .iter()
                .map(|input| proto::Input {
                    digest: input.digest.to_string(),
                    index: 0,
                })
                .collect(),
            op: Some(body),
            platform: Some(proto::Platform {
                architecture: DEFAULT_ARCHITECTURE.into(),
                os: DEFAULT_OS.into(),
                variant: String::new(),
            }),
        })
    }
}

/// A node of the build graph.
///
/// Vertices are compared by digest, which covers the op and the digests of
/// all inputs, but not the custom name.
#[derive(Clone, Debug)]
pub struct Vertex {
    op: Op,
    inputs: Vec<Arc<Vertex>>,
    custom_name: Option<String>,
    pb: proto::Op,
    digest: Digest,
}

impl Vertex {
    fn new(op: Op, inputs: Vec<Arc<Vertex>>) -> Result<Arc<Self>, Error> {
        let pb = op.to_pb(&inputs)?;
        let digest = pb.digest();
        Ok(Arc::new(Self {
            op,
            inputs,
            custom_name: None,
            pb,
            digest,
        }))
    }

    pub fn op(&self) -> &Op {
        &self.op
    }

    pub fn inputs(&self) -> &[Arc<Vertex>] {
        &self.inputs
    }

    pub fn custom_name(&self) -> Option<&str> {
        self.custom_name.as_deref()
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn to_pb(&self) -> &proto::Op {
        &self.pb
    }
}

impl PartialEq for Vertex {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}

impl Eq for Vertex {}

impl std::hash::Hash for Vertex {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.digest.hash(state)
    }
}

/// A filesystem state: the output of a vertex, or the empty filesystem.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct State(Option<Arc<Vertex>>);

impl State {
    /// The empty filesystem.
    pub fn scratch() -> Self {
        Self(None)
    }

    /// A filesystem pulled from a container image.
    pub fn image(reference: &str) -> Result<Self, Error> {
        let reference = normalize_image_reference(reference)?;
        Ok(Self(Some(Vertex::new(
            Op::ImagePull { reference },
            vec![],
        )?)))
    }

    /// A directory provided by the client, see [LocalOptions].
    pub fn local(name: impl Into<String>, options: LocalOptions) -> Result<Self, Error> {
        Ok(Self(Some(Vertex::new(
            Op::Local {
                name: name.into(),
                options,
            },
            vec![],
        )?)))
    }

    /// Runs a command on top of this state, returning the resulting root
    /// filesystem.
    pub fn run<I, S>(&self, args: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let exec = Exec {
            args: args.into_iter().map(Into::into).collect(),
            env: vec![DEFAULT_PATH_ENV.to_string()],
            cwd: "/".into(),
        };
        if exec.args.is_empty() {
            return Err(Error::EmptyArgs);
        }

        Ok(Self(Some(Vertex::new(
            Op::Exec(exec),
            self.0.iter().cloned().collect(),
        )?)))
    }

    /// Applies a chain of file actions to this state.
    pub fn file(&self, actions: FileActions) -> Result<Self, Error> {
        if actions.is_empty() {
            return Ok(self.clone());
        }

        let mut inputs: Vec<Arc<Vertex>> = Vec::new();
        let base_input = match &self.0 {
            Some(vertex) => {
                inputs.push(vertex.clone());
                0
            }
            None => -1,
        };

        // Copy sources become additional inputs. Their indices need to be
        // known before any action can refer to the output of a previous one.
        let secondary_inputs: Vec<i64> = actions
            .actions
            .iter()
            .map(|(_, source)| match source {
                Some(State(Some(vertex))) => {
                    inputs.push(vertex.clone());
                    inputs.len() as i64 - 1
                }
                _ => -1,
            })
            .collect();

        let num_inputs = inputs.len() as i64;
        let num_actions = actions.actions.len();
        let file_actions = actions
            .actions
            .into_iter()
            .zip(secondary_inputs)
            .enumerate()
            .map(|(i, ((kind, _), secondary_input))| FileAction {
                input: if i == 0 {
                    base_input
                } else {
                    num_inputs + i as i64 - 1
                },
                secondary_input,
                output: if i == num_actions - 1 { 0 } else { -1 },
                kind,
            })
            .collect();

        Ok(Self(Some(Vertex::new(Op::File(file_actions), inputs)?)))
    }

    /// Sets the label shown for the vertex producing this state. This does
    /// not change its digest.
    pub fn with_custom_name(self, name: impl Into<String>) -> Self {
        match self.0 {
            None => self,
            Some(vertex) => {
                let mut vertex = Arc::unwrap_or_clone(vertex);
                vertex.custom_name = Some(name.into());
                Self(Some(Arc::new(vertex)))
            }
        }
    }

    /// The vertex producing this state, [None] for scratch.
    pub fn output(&self) -> Option<&Arc<Vertex>> {
        self.0.as_ref()
    }

    /// Serializes the graph producing this state.
    /// Each distinct op is emitted once, dependencies first.
    pub fn marshal(&self) -> Result<Definition, Error> {
        let head = self.0.as_ref().ok_or(Error::EmptyState)?;

        let mut seen: HashSet<&Digest> = HashSet::new();
        let mut ops: Vec<(Digest, proto::Op)> = Vec::new();
        let mut metadata: BTreeMap<Digest, proto::OpMetadata> = BTreeMap::new();

        // iterative post-order traversal.
        let mut stack: Vec<(&Arc<Vertex>, bool)> = vec![(head, false)];
        while let Some((vertex, visited)) = stack.pop() {
            if visited {
                if seen.insert(&vertex.digest) {
                    ops.push((vertex.digest.clone(), vertex.pb.clone()));
                    if let Some(name) = &vertex.custom_name {
                        metadata.insert(
                            vertex.digest.clone(),
                            proto::OpMetadata {
                                ignore_cache: false,
                                description: BTreeMap::from([(
                                    CUSTOM_NAME_KEY.to_string(),
                                    name.clone(),
                                )]),
                            },
                        );
                    }
                }
                continue;
            }
            if seen.contains(&vertex.digest) {
                continue;
            }
            stack.push((vertex, true));
            for input in vertex.inputs.iter().rev() {
                stack.push((input, false));
            }
        }

        trace!(head = %head.digest, ops = ops.len(), "marshalled definition");

        Ok(Definition::new(ops, metadata, head.digest.clone()))
    }
}

/// Turns short image references into fully qualified ones, the way docker
/// does: `debian` becomes `docker.io/library/debian:latest`.
pub fn normalize_image_reference(reference: &str) -> Result<String, Error> {
    if reference.is_empty() || reference.contains(char::is_whitespace) {
        return Err(Error::InvalidImageReference(reference.to_string()));
    }

    let (name, digest) = match reference.split_once('@') {
        Some((name, digest)) => (name, Some(digest)),
        None => (reference, None),
    };

    let name = match name.split_once('/') {
        None => format!("docker.io/library/{}", name),
        Some((domain, _))
            if domain.contains('.') || domain.contains(':') || domain == "localhost" =>
        {
            name.to_string()
        }
        Some(_) => format!("docker.io/{}", name),
    };

    if name.ends_with(['/', ':']) {
        return Err(Error::InvalidImageReference(reference.to_string()));
    }

    Ok(match digest {
        Some(digest) => format!("{}@{}", name, digest),
        None => {
            // a tag is a colon in the last path segment
            let last_segment = name.rsplit('/').next().unwrap_or_default();
            if last_segment.contains(':') {
                name
            } else {
                format!("{}:latest", name)
            }
        }
    })
}
