use std::collections::{BTreeMap, HashMap};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use owrt_llb::proto::{self, file_action, op};
use owrt_llb::{
    normalize_image_reference, Definition, Digest, ATTR_LOCAL_INCLUDE_PATTERNS,
    ATTR_LOCAL_SESSION,
};
use tonic::async_trait;
use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use super::{BuildOpts, ExecutionService, ResultRef, SolveResult};

/// An entry in a [Tree].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Entry {
    Directory { mode: u32 },
    File { mode: u32, data: Bytes },
}

static ROOT: Entry = Entry::Directory { mode: 0o755 };

/// An in-memory filesystem, keyed by absolute path.
/// The root directory always exists.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tree(BTreeMap<String, Entry>);

/// Turns `path` into an absolute path without empty or `.` components.
fn normalize(path: &str) -> io::Result<String> {
    let mut out = String::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("path {path:?} may not contain .."),
                ))
            }
            c => {
                out.push('/');
                out.push_str(c);
            }
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}

fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{path}: no such file or directory"))
}

fn not_a_directory(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, format!("{path}: not a directory"))
}

fn is_a_directory(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, format!("{path}: is a directory"))
}

impl Tree {
    pub fn get(&self, path: &str) -> Option<&Entry> {
        let path = normalize(path).ok()?;
        if path == "/" {
            return Some(&ROOT);
        }
        self.0.get(&path)
    }

    /// All entries except the root, in lexicographic order of their paths.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.0.iter().map(|(path, entry)| (path.as_str(), entry))
    }

    /// Makes sure the parent of the normalized `path` is a directory,
    /// creating missing ones if `create` is set.
    fn ensure_parent(&mut self, path: &str, create: bool) -> io::Result<()> {
        let parent = parent(path);
        if parent == "/" {
            return Ok(());
        }
        match self.0.get(parent) {
            Some(Entry::Directory { .. }) => Ok(()),
            Some(Entry::File { .. }) => Err(not_a_directory(parent)),
            None if create => {
                self.ensure_parent(parent, true)?;
                self.0
                    .insert(parent.to_string(), Entry::Directory { mode: 0o755 });
                Ok(())
            }
            None => Err(not_found(parent)),
        }
    }

    pub fn mkdir(&mut self, path: &str, mode: u32, make_parents: bool) -> io::Result<()> {
        let path = normalize(path)?;
        match self.get(&path) {
            Some(Entry::Directory { .. }) if make_parents => return Ok(()),
            Some(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{path}: file exists"),
                ))
            }
            None => {}
        }
        self.ensure_parent(&path, make_parents)?;
        self.0.insert(path, Entry::Directory { mode });
        Ok(())
    }

    /// Writes a file, replacing an existing one. The parent directory must
    /// exist.
    pub fn mkfile(&mut self, path: &str, mode: u32, data: Bytes) -> io::Result<()> {
        let path = normalize(path)?;
        if let Some(Entry::Directory { .. }) = self.get(&path) {
            return Err(is_a_directory(&path));
        }
        self.ensure_parent(&path, false)?;
        self.0.insert(path, Entry::File { mode, data });
        Ok(())
    }

    /// Like [Tree::mkfile], but creates missing parent directories.
    pub fn insert_file(&mut self, path: &str, mode: u32, data: Bytes) -> io::Result<()> {
        let path = normalize(path)?;
        self.ensure_parent(&path, true)?;
        self.mkfile(&path, mode, data)
    }

    /// Copies `src` of `from` to `dest`. Directories are copied recursively,
    /// and merged into directories already present at `dest`.
    pub fn copy_from(
        &mut self,
        from: &Tree,
        src: &str,
        dest: &str,
        create_dest_path: bool,
    ) -> io::Result<()> {
        let src = normalize(src)?;
        let dest = normalize(dest)?;
        let entry = from.get(&src).ok_or_else(|| not_found(&src))?.clone();

        match (&entry, self.get(&dest).cloned()) {
            (Entry::File { .. }, Some(Entry::Directory { .. })) => {
                return Err(is_a_directory(&dest))
            }
            (Entry::Directory { .. }, Some(Entry::File { .. })) => {
                return Err(not_a_directory(&dest))
            }
            (Entry::Directory { .. }, Some(Entry::Directory { .. })) => {}
            _ => {
                self.ensure_parent(&dest, create_dest_path)?;
                self.0.insert(dest.clone(), entry.clone());
            }
        }

        if let Entry::Directory { .. } = entry {
            let prefix = if src == "/" { String::new() } else { src.clone() };
            for (path, child) in from.0.range(format!("{prefix}/")..) {
                let Some(rel) = path.strip_prefix(&prefix).filter(|r| r.starts_with('/')) else {
                    break;
                };
                let target = if dest == "/" {
                    rel.to_string()
                } else {
                    format!("{dest}{rel}")
                };
                if let (Entry::Directory { .. }, Some(Entry::Directory { .. })) =
                    (child, self.0.get(&target))
                {
                    continue;
                }
                self.0.insert(target, child.clone());
            }
        }

        Ok(())
    }

    /// Returns a tree with only the files whose path relative to the root
    /// matches one of `patterns`, and their parent directories.
    fn filter(&self, patterns: &[glob::Pattern]) -> io::Result<Tree> {
        if patterns.is_empty() {
            return Ok(self.clone());
        }

        let mut out = Tree::default();
        for (path, entry) in self.entries() {
            if let Entry::File { mode, data } = entry {
                let rel = path.trim_start_matches('/');
                if patterns.iter().any(|p| p.matches(rel)) {
                    out.insert_file(path, *mode, data.clone())?;
                }
            }
        }
        Ok(out)
    }

    /// Reads the regular files below `dir` whose path relative to `dir`
    /// matches one of `patterns`, or all of them if there are none.
    /// Entries not matching are skipped without being read.
    pub fn from_dir(dir: &Path, patterns: &[glob::Pattern]) -> io::Result<Tree> {
        let mut tree = Tree::default();
        for entry in WalkDir::new(dir).follow_links(false).min_depth(1) {
            let entry = entry.map_err(io::Error::from)?;
            let rel_path = entry.path().strip_prefix(dir).map_err(io::Error::other)?;

            let file_type = entry.file_type();
            if !patterns.is_empty() {
                // parents of matching files are created along with them
                if !file_type.is_file() || !patterns.iter().any(|p| p.matches_path(rel_path)) {
                    continue;
                }
            }

            let rel = rel_path.to_str().ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{}: path is not valid UTF-8", entry.path().display()),
                )
            })?;

            let mode = entry.metadata().map_err(io::Error::from)?.permissions().mode() & 0o7777;
            if file_type.is_dir() {
                tree.mkdir(rel, mode, true)?;
            } else if file_type.is_file() {
                tree.insert_file(rel, mode, std::fs::read(entry.path())?.into())?;
            } else {
                debug!(path = %entry.path().display(), "skipping special file");
            }
        }
        Ok(tree)
    }
}

#[derive(Default)]
struct Inner {
    images: HashMap<String, Arc<Tree>>,
    locals: HashMap<String, Arc<Tree>>,
    cache: HashMap<Digest, Arc<Tree>>,
    refs: HashMap<String, Arc<Tree>>,
    executed: Vec<Vec<String>>,
    returned: Option<Result<ResultRef, String>>,
}

/// Resolves graphs in memory, without running any processes.
///
/// Images resolve to the trees registered with [MemoryExecutionService::add_image],
/// or an empty root filesystem. Local sources resolve to the trees
/// registered with [MemoryExecutionService::add_local], or the contents
/// of the context directory. Exec ops pass their input through unchanged and
/// are only recorded. Results not depending on local sources are cached by
/// op digest.
#[derive(Clone, Default)]
pub struct MemoryExecutionService {
    build_opts: BuildOpts,
    context_dir: Option<PathBuf>,
    inner: Arc<RwLock<Inner>>,
}

fn poisoned<T>(_: T) -> io::Error {
    io::Error::other("lock poisoned")
}

impl MemoryExecutionService {
    pub fn new(build_opts: BuildOpts) -> Self {
        Self {
            build_opts,
            ..Default::default()
        }
    }

    /// Serve local sources not registered with [Self::add_local] from this
    /// directory.
    pub fn with_context_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.context_dir = Some(dir.into());
        self
    }

    pub fn add_image(&self, reference: &str, tree: Tree) -> io::Result<()> {
        let reference = normalize_image_reference(reference)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.inner
            .write()
            .map_err(poisoned)?
            .images
            .insert(reference, Arc::new(tree));
        Ok(())
    }

    pub fn add_local(&self, name: &str, tree: Tree) -> io::Result<()> {
        self.inner
            .write()
            .map_err(poisoned)?
            .locals
            .insert(name.to_string(), Arc::new(tree));
        Ok(())
    }

    /// The arguments of all exec ops evaluated so far, in order.
    pub fn executed(&self) -> io::Result<Vec<Vec<String>>> {
        Ok(self.inner.read().map_err(poisoned)?.executed.clone())
    }

    /// What was passed to [ExecutionService::return_result], if anything.
    pub fn returned(&self) -> io::Result<Option<Result<ResultRef, String>>> {
        Ok(self.inner.read().map_err(poisoned)?.returned.clone())
    }

    /// Returns the output of the op, and whether it may be cached. Local
    /// sources are read again on every solve, as are all ops depending on
    /// them.
    fn evaluate(
        &self,
        inner: &mut Inner,
        definition: &Definition,
        digest: &Digest,
    ) -> io::Result<(Arc<Tree>, bool)> {
        if let Some(tree) = inner.cache.get(digest) {
            trace!(op.digest = %digest, "cache hit");
            return Ok((tree.clone(), true));
        }

        let op = definition.get(digest).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("op {digest} is not part of the definition"),
            )
        })?;

        let mut inputs = Vec::with_capacity(op.inputs.len());
        let mut cacheable = true;
        for input in &op.inputs {
            let input_digest: Digest = input
                .digest
                .parse()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            let (tree, input_cacheable) = self.evaluate(inner, definition, &input_digest)?;
            inputs.push(tree);
            cacheable &= input_cacheable;
        }

        debug!(op.digest = %digest, name = definition.custom_name(digest), "evaluating op");

        let tree = match &op.op {
            Some(op::Op::Source(source)) => {
                cacheable &= !source.identifier.starts_with("local://");
                self.source(inner, source)?
            }
            Some(op::Op::Exec(exec)) => {
                let meta = exec.meta.clone().unwrap_or_default();
                warn!(args = ?meta.args, "not running process, passing root filesystem through");
                inner.executed.push(meta.args);

                let root = exec
                    .mounts
                    .iter()
                    .find(|mount| mount.dest == "/")
                    .ok_or_else(|| {
                        io::Error::new(io::ErrorKind::InvalidInput, "exec op without root mount")
                    })?;
                input_tree(root.input, &inputs, &[])?
            }
            Some(op::Op::File(file)) => apply_file_actions(&file.actions, &inputs)?,
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("op {digest} has no body"),
                ))
            }
        };

        let tree = Arc::new(tree);
        if cacheable {
            inner.cache.insert(digest.clone(), tree.clone());
        }
        Ok((tree, cacheable))
    }

    fn source(&self, inner: &Inner, source: &proto::SourceOp) -> io::Result<Tree> {
        if let Some(reference) = source.identifier.strip_prefix("docker-image://") {
            return Ok(match inner.images.get(reference) {
                Some(tree) => (**tree).clone(),
                None => {
                    debug!(reference, "image not registered, using empty root filesystem");
                    Tree::default()
                }
            });
        }

        if let Some(name) = source.identifier.strip_prefix("local://") {
            if let Some(session_id) = source.attrs.get(ATTR_LOCAL_SESSION) {
                if *session_id != self.build_opts.session_id {
                    return Err(io::Error::new(
                        io::ErrorKind::PermissionDenied,
                        format!("local {name} requested for unknown session {session_id}"),
                    ));
                }
            }

            let patterns = match source.attrs.get(ATTR_LOCAL_INCLUDE_PATTERNS) {
                None => vec![],
                Some(patterns) => serde_json::from_str::<Vec<String>>(patterns)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?
                    .iter()
                    .map(|p| glob::Pattern::new(p))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?,
            };

            let tree = match (inner.locals.get(name), &self.context_dir) {
                (Some(tree), _) => (**tree).clone(),
                (None, Some(dir)) => Tree::from_dir(dir, &patterns)?,
                (None, None) => {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("local {name} is not available"),
                    ))
                }
            };
            return tree.filter(&patterns);
        }

        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("unsupported source {}", source.identifier),
        ))
    }
}

/// Resolves an input index of a file action: -1 is the empty filesystem,
/// indices past the op inputs refer to outputs of earlier actions.
fn input_tree(index: i64, inputs: &[Arc<Tree>], outputs: &[Tree]) -> io::Result<Tree> {
    if index < 0 {
        return Ok(Tree::default());
    }
    let index = index as usize;
    if let Some(tree) = inputs.get(index) {
        return Ok((**tree).clone());
    }
    outputs.get(index - inputs.len()).cloned().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("file action refers to unknown input {index}"),
        )
    })
}

fn apply_file_actions(actions: &[proto::FileAction], inputs: &[Arc<Tree>]) -> io::Result<Tree> {
    let mut outputs: Vec<Tree> = Vec::with_capacity(actions.len());
    let mut result = None;

    for action in actions {
        let mut tree = input_tree(action.input, inputs, &outputs)?;
        match &action.action {
            Some(file_action::Action::Mkdir(mkdir)) => {
                tree.mkdir(&mkdir.path, mkdir.mode as u32, mkdir.make_parents)?
            }
            Some(file_action::Action::Mkfile(mkfile)) => {
                tree.mkfile(&mkfile.path, mkfile.mode as u32, mkfile.data.clone())?
            }
            Some(file_action::Action::Copy(copy)) => {
                let from = input_tree(action.secondary_input, inputs, &outputs)?;
                tree.copy_from(&from, &copy.src, &copy.dest, copy.create_dest_path)?
            }
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "file action has no body",
                ))
            }
        }
        if action.output == 0 {
            result = Some(tree.clone());
        }
        outputs.push(tree);
    }

    result.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "file op has no output"))
}

#[async_trait]
impl ExecutionService for MemoryExecutionService {
    fn build_opts(&self) -> &BuildOpts {
        &self.build_opts
    }

    #[instrument(skip_all, fields(definition.head = %definition.head()), err)]
    async fn solve(&self, definition: Definition) -> io::Result<SolveResult> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let (tree, _) = self.evaluate(&mut inner, &definition, definition.head())?;

        let id = Uuid::new_v4().to_string();
        inner.refs.insert(id.clone(), tree);

        Ok(SolveResult::Single(ResultRef(id)))
    }

    #[instrument(skip(self), err)]
    async fn read_file(&self, reference: &ResultRef, path: &str) -> io::Result<Bytes> {
        let inner = self.inner.read().map_err(poisoned)?;
        let tree = inner.refs.get(&reference.0).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("unknown reference {reference}"),
            )
        })?;

        match tree.get(path) {
            Some(Entry::File { data, .. }) => Ok(data.clone()),
            Some(Entry::Directory { .. }) => Err(is_a_directory(path)),
            None => Err(not_found(path)),
        }
    }

    #[instrument(skip(self), err)]
    async fn return_result(&self, result: Result<ResultRef, String>) -> io::Result<()> {
        self.inner.write().map_err(poisoned)?.returned = Some(result);
        Ok(())
    }
}
