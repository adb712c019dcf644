use bytes::Bytes;
use time::OffsetDateTime;

use crate::proto::{self, file_action};
use crate::State;

/// Creates a directory.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Mkdir {
    pub path: String,
    pub mode: u32,
    pub make_parents: bool,
    /// Creation time, in nanoseconds since the epoch.
    pub timestamp: Option<i64>,
}

impl Mkdir {
    pub fn new(path: impl Into<String>, mode: u32) -> Self {
        Self {
            path: path.into(),
            mode,
            make_parents: false,
            timestamp: None,
        }
    }

    pub fn make_parents(mut self, make_parents: bool) -> Self {
        self.make_parents = make_parents;
        self
    }

    pub fn created_at(mut self, time: OffsetDateTime) -> Self {
        self.timestamp = Some(unix_nanos(time));
        self
    }
}

/// Creates a regular file with the given contents.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Mkfile {
    pub path: String,
    pub mode: u32,
    pub data: Bytes,
    /// Creation time, in nanoseconds since the epoch.
    pub timestamp: Option<i64>,
}

impl Mkfile {
    pub fn new(path: impl Into<String>, mode: u32, data: impl Into<Bytes>) -> Self {
        Self {
            path: path.into(),
            mode,
            data: data.into(),
            timestamp: None,
        }
    }

    pub fn created_at(mut self, time: OffsetDateTime) -> Self {
        self.timestamp = Some(unix_nanos(time));
        self
    }
}

/// Copies `src` of another state to `dest`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CopyPath {
    pub src: String,
    pub dest: String,
    pub create_dest_path: bool,
}

impl CopyPath {
    pub fn new(src: impl Into<String>, dest: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            dest: dest.into(),
            create_dest_path: false,
        }
    }

    pub fn create_dest_path(mut self, create_dest_path: bool) -> Self {
        self.create_dest_path = create_dest_path;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FileActionKind {
    Mkdir(Mkdir),
    Mkfile(Mkfile),
    Copy(CopyPath),
}

/// A resolved action inside a file op. See [proto::FileAction] for the
/// meaning of the indices.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FileAction {
    pub input: i64,
    pub secondary_input: i64,
    pub output: i64,
    pub kind: FileActionKind,
}

/// A chain of file actions, each applied to the result of the previous one.
/// Turned into a single op by [State::file].
#[derive(Clone, Debug, Default)]
pub struct FileActions {
    pub(crate) actions: Vec<(FileActionKind, Option<State>)>,
}

impl FileActions {
    pub fn mkdir(mut self, mkdir: Mkdir) -> Self {
        self.actions.push((FileActionKind::Mkdir(mkdir), None));
        self
    }

    pub fn mkfile(mut self, mkfile: Mkfile) -> Self {
        self.actions.push((FileActionKind::Mkfile(mkfile), None));
        self
    }

    pub fn copy(mut self, source: &State, copy: CopyPath) -> Self {
        self.actions
            .push((FileActionKind::Copy(copy), Some(source.clone())));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

fn unix_nanos(time: OffsetDateTime) -> i64 {
    i64::try_from(time.unix_timestamp_nanos()).unwrap_or(i64::MAX)
}

impl From<&FileAction> for proto::FileAction {
    fn from(value: &FileAction) -> Self {
        let action = match &value.kind {
            FileActionKind::Mkdir(mkdir) => file_action::Action::Mkdir(proto::FileActionMkDir {
                path: mkdir.path.clone(),
                mode: mkdir.mode as i32,
                make_parents: mkdir.make_parents,
                timestamp: mkdir.timestamp.unwrap_or(-1),
            }),
            FileActionKind::Mkfile(mkfile) => {
                file_action::Action::Mkfile(proto::FileActionMkFile {
                    path: mkfile.path.clone(),
                    mode: mkfile.mode as i32,
                    data: mkfile.data.clone(),
                    timestamp: mkfile.timestamp.unwrap_or(-1),
                })
            }
            FileActionKind::Copy(copy) => file_action::Action::Copy(proto::FileActionCopy {
                src: copy.src.clone(),
                dest: copy.dest.clone(),
                // keep the source mode
                mode: -1,
                follow_symlink: false,
                dir_copy_contents: false,
                create_dest_path: copy.create_dest_path,
                timestamp: -1,
            }),
        };

        Self {
            input: value.input,
            secondary_input: value.secondary_input,
            output: value.output,
            action: Some(action),
        }
    }
}
