//! Checksum tasks: one per filesystem entry.
//!
//! A task moves `CREATED -> SUBMITTED -> RUNNING -> FINISHED` and never
//! backwards. Every transition is a compare-and-set on the state field, so a
//! task runs at most once no matter how often it is handed to the pool.

use crate::deps::DependencySet;
use crate::digest::{Algorithm, Hash};
use crate::error::{Error, Result};
use chrono::{DateTime, SubsecRound, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};

/// Outcome of one task. Errors are shared so parents can read them.
pub type TaskResult = std::result::Result<Hash, Arc<Error>>;

/// Kind of filesystem entry a task covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::File => "FILE",
            EntryKind::Directory => "DIRECTORY",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata snapshot captured when an entry is discovered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryMetadata {
    /// Creation (birth) time, if the filesystem records one.
    pub created: Option<DateTime<Utc>>,
    /// Last modification time.
    pub modified: Option<DateTime<Utc>>,
    /// Size in bytes.
    pub size: u64,
}

impl EntryMetadata {
    /// Capture timestamps (second precision) and size from `fs::Metadata`.
    pub fn from_metadata(metadata: &fs::Metadata) -> Self {
        let to_utc = |t: std::io::Result<std::time::SystemTime>| {
            t.ok().map(|t| DateTime::<Utc>::from(t).trunc_subsecs(0))
        };
        Self {
            created: to_utc(metadata.created()),
            modified: to_utc(metadata.modified()),
            size: metadata.len(),
        }
    }

    /// Best-effort snapshot for entries the walk could not describe.
    pub fn probe(path: &Path) -> Self {
        fs::metadata(path)
            .or_else(|_| fs::symlink_metadata(path))
            .map(|m| Self::from_metadata(&m))
            .unwrap_or_default()
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Created = 0,
    Submitted = 1,
    Running = 2,
    Finished = 3,
}

impl TaskState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskState::Created,
            1 => TaskState::Submitted,
            2 => TaskState::Running,
            _ => TaskState::Finished,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Created => "CREATED",
            TaskState::Submitted => "SUBMITTED",
            TaskState::Running => "RUNNING",
            TaskState::Finished => "FINISHED",
        };
        f.write_str(s)
    }
}

enum Body {
    /// Hash the bytes at `path`.
    Content,
    /// Combine the checksums of the children.
    Children(DependencySet),
    /// Panic when run.
    #[cfg(test)]
    Panics,
}

/// The checksum computation for one filesystem entry.
pub struct Task {
    path: PathBuf,
    kind: EntryKind,
    metadata: EntryMetadata,
    state: AtomicU8,
    result: OnceLock<TaskResult>,
    parent: Option<Weak<Task>>,
    body: Body,
    /// Fault recorded before execution (unreadable directory, symlink cycle).
    fault: Mutex<Option<Error>>,
}

impl Task {
    /// Create a task that hashes a file's bytes.
    pub fn file(path: PathBuf, metadata: EntryMetadata, parent: Option<&Arc<Task>>) -> Arc<Self> {
        Self::new(path, EntryKind::File, metadata, parent, Body::Content)
    }

    /// Create a directory task with an open dependency set.
    pub fn directory(
        path: PathBuf,
        metadata: EntryMetadata,
        parent: Option<&Arc<Task>>,
    ) -> Arc<Self> {
        Self::new(
            path,
            EntryKind::Directory,
            metadata,
            parent,
            Body::Children(DependencySet::new()),
        )
    }

    /// Create a task whose result is already known to be `error`.
    ///
    /// It still goes through the pool so that its record is emitted and its
    /// parent is notified like any other task.
    pub fn faulted(
        path: PathBuf,
        kind: EntryKind,
        metadata: EntryMetadata,
        parent: Option<&Arc<Task>>,
        error: Error,
    ) -> Arc<Self> {
        let task = Self::new(path, kind, metadata, parent, Body::Content);
        *task.fault.lock() = Some(error);
        task
    }

    /// A file-like task whose body panics, for exercising worker isolation.
    #[cfg(test)]
    pub(crate) fn panicking(path: PathBuf, parent: Option<&Arc<Task>>) -> Arc<Self> {
        Self::new(path, EntryKind::File, EntryMetadata::default(), parent, Body::Panics)
    }

    fn new(
        path: PathBuf,
        kind: EntryKind,
        metadata: EntryMetadata,
        parent: Option<&Arc<Task>>,
        body: Body,
    ) -> Arc<Self> {
        Arc::new(Self {
            path,
            kind,
            metadata,
            state: AtomicU8::new(TaskState::Created as u8),
            result: OnceLock::new(),
            parent: parent.map(Arc::downgrade),
            body,
            fault: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn metadata(&self) -> &EntryMetadata {
        &self.metadata
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_finished(&self) -> bool {
        self.state() == TaskState::Finished
    }

    /// The fixed result, once the task is finished.
    pub fn result(&self) -> Option<&TaskResult> {
        if self.is_finished() {
            self.result.get()
        } else {
            None
        }
    }

    /// The enclosing directory's task, if it is still alive.
    pub fn parent(&self) -> Option<Arc<Task>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Whether this task was created without a parent.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Children of a directory task; `None` for file and faulted tasks.
    pub fn dependencies(&self) -> Option<&DependencySet> {
        match &self.body {
            Body::Children(deps) => Some(deps),
            _ => None,
        }
    }

    /// Record a fault that overrides whatever the body would compute.
    pub fn set_fault(&self, error: Error) {
        let mut fault = self.fault.lock();
        if fault.is_none() {
            *fault = Some(error);
        }
    }

    /// Register `child` with this directory's dependency set.
    pub fn register(&self, child: Arc<Task>) -> Result<()> {
        match &self.body {
            Body::Children(deps) => deps.register(&self.path, child),
            _ => Err(Error::sealed_dependencies(&self.path, child.path())),
        }
    }

    /// Seal the dependency set. Returns whether the task is ready to run.
    ///
    /// Tasks without children are always ready.
    pub fn seal(&self) -> bool {
        match &self.body {
            Body::Children(deps) => deps.seal(),
            _ => true,
        }
    }

    /// Readiness: sealed and every registered child finished.
    pub fn is_ready(&self) -> bool {
        match &self.body {
            Body::Children(deps) => deps.is_ready(),
            _ => true,
        }
    }

    /// `CREATED -> SUBMITTED`. Exactly one caller wins.
    pub fn try_submit(&self) -> bool {
        self.transition(TaskState::Created, TaskState::Submitted).is_ok()
    }

    /// `SUBMITTED -> RUNNING`, taken by the worker that picked the task up.
    pub(crate) fn start(&self) -> Result<()> {
        self.transition(TaskState::Submitted, TaskState::Running)
    }

    /// Run the task body.
    ///
    /// Entry faults come back as ordinary errors. A directory that is not
    /// ready yields a fatal [`Error::NotReady`].
    pub(crate) fn compute(&self, algorithm: Algorithm) -> Result<Hash> {
        let fault = self.fault.lock().take();
        match &self.body {
            Body::Content => match fault {
                Some(err) => Err(err),
                None => algorithm.hash_file(&self.path),
            },
            Body::Children(deps) => {
                let children = deps.take_ready(&self.path)?;
                if let Some(err) = fault {
                    return Err(err);
                }

                let mut parts = Vec::with_capacity(children.len());
                let mut failed = Vec::new();
                for (path, child) in &children {
                    match child.result() {
                        Some(Ok(hash)) => parts.push(hash.to_hex()),
                        Some(Err(err)) => failed.extend(err.failed_paths(path)),
                        None => {
                            return Err(Error::not_ready(
                                &self.path,
                                format!("{} finished", path.display()),
                                child.state().to_string(),
                            ));
                        }
                    }
                }

                if failed.is_empty() {
                    Ok(algorithm.hash_parts(&parts))
                } else {
                    failed.sort();
                    Err(Error::partial_failure(&self.path, failed))
                }
            }
            #[cfg(test)]
            Body::Panics => panic!("hashing {} blew up", self.path.display()),
        }
    }

    /// `RUNNING -> FINISHED`, fixing the result. The only place a result is
    /// written.
    pub(crate) fn finish(&self, result: TaskResult) -> Result<()> {
        let actual = self.state();
        if actual != TaskState::Running || self.result.set(result).is_err() {
            return Err(Error::invalid_transition(
                &self.path,
                TaskState::Finished.to_string(),
                actual.to_string(),
            ));
        }
        self.transition(TaskState::Running, TaskState::Finished)
    }

    /// After this task finished: tell the parent, and hand back the parent if
    /// this completion made it runnable and won its submission.
    pub(crate) fn notify_parent(&self) -> Option<Arc<Task>> {
        let parent = self.parent()?;
        let deps = parent.dependencies()?;
        if deps.child_finished(&self.path) && parent.try_submit() {
            Some(parent)
        } else {
            None
        }
    }

    fn transition(&self, from: TaskState, to: TaskState) -> Result<()> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| {
                Error::invalid_transition(
                    &self.path,
                    to.to_string(),
                    TaskState::from_u8(actual).to_string(),
                )
            })
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn run(task: &Task) -> TaskResult {
        task.start().unwrap();
        let result = task.compute(Algorithm::Blake3).map_err(Arc::new);
        task.finish(result.clone()).unwrap();
        result
    }

    #[test]
    fn test_state_machine_is_monotonic() {
        let task = Task::file("/nope".into(), EntryMetadata::default(), None);
        assert_eq!(task.state(), TaskState::Created);
        assert!(task.start().is_err());

        assert!(task.try_submit());
        assert!(!task.try_submit());
        assert_eq!(task.state(), TaskState::Submitted);

        task.start().unwrap();
        assert!(task.start().is_err());
        assert!(task.result().is_none());

        task.finish(Ok(Hash::hash_bytes(b""))).unwrap();
        assert!(task.is_finished());
        assert!(task.finish(Ok(Hash::hash_bytes(b"again"))).is_err());
        assert_eq!(task.result().unwrap().as_ref().unwrap(), &Hash::hash_bytes(b""));
    }

    #[test]
    fn test_file_task_hashes_content() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.txt");
        fs::write(&path, b"hi").unwrap();

        let task = Task::file(path, EntryMetadata::default(), None);
        assert!(task.try_submit());
        assert_eq!(run(&task).unwrap(), Hash::hash_bytes(b"hi"));
    }

    #[test]
    fn test_file_task_missing_file_is_entry_fault() {
        let temp_dir = TempDir::new().unwrap();
        let task = Task::file(temp_dir.path().join("gone"), EntryMetadata::default(), None);
        task.try_submit();
        let err = run(&task).unwrap_err();
        assert!(!err.is_fatal());
        assert!(matches!(*err, Error::EntryIo { .. }));
    }

    #[test]
    fn test_empty_directory_hashes_empty_sequence() {
        let dir = Task::directory("/r".into(), EntryMetadata::default(), None);
        assert!(dir.seal());
        assert!(dir.try_submit());
        let empty: [&str; 0] = [];
        assert_eq!(run(&dir).unwrap(), Hash::hash_parts(empty));
    }

    #[test]
    fn test_directory_combines_children_in_path_order() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        fs::write(root.join("b.txt"), b"yo").unwrap();
        fs::write(root.join("a.txt"), b"hi").unwrap();

        let dir = Task::directory(root.clone(), EntryMetadata::default(), None);
        // Register in reverse order; combination must still be sorted by path.
        for name in ["b.txt", "a.txt"] {
            let child = Task::file(root.join(name), EntryMetadata::default(), Some(&dir));
            dir.register(child.clone()).unwrap();
            child.try_submit();
            run(&child).unwrap();
            child.notify_parent();
        }
        assert!(dir.seal());
        dir.try_submit();

        let expected = Hash::hash_parts([
            Hash::hash_bytes(b"hi").to_hex(),
            Hash::hash_bytes(b"yo").to_hex(),
        ]);
        assert_eq!(run(&dir).unwrap(), expected);
        // Children are released once consumed.
        assert_eq!(dir.dependencies().unwrap().len(), 0);
    }

    #[test]
    fn test_directory_with_failed_child_is_partial_failure() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        fs::write(root.join("ok.txt"), b"fine").unwrap();

        let dir = Task::directory(root.clone(), EntryMetadata::default(), None);
        for name in ["ok.txt", "missing.txt"] {
            let child = Task::file(root.join(name), EntryMetadata::default(), Some(&dir));
            dir.register(child.clone()).unwrap();
            child.try_submit();
            let _ = run(&child);
            child.notify_parent();
        }
        dir.seal();
        dir.try_submit();

        match &*run(&dir).unwrap_err() {
            Error::PartialFailure { path, failed } => {
                assert_eq!(path, &root);
                assert_eq!(failed, &vec![root.join("missing.txt")]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_directory_before_ready_is_fatal() {
        let dir = Task::directory("/r".into(), EntryMetadata::default(), None);
        let child = Task::file("/r/a".into(), EntryMetadata::default(), Some(&dir));
        dir.register(child).unwrap();
        dir.seal();
        assert!(!dir.is_ready());

        let err = dir.compute(Algorithm::Blake3).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_faulted_task_reports_fault() {
        let task = Task::faulted(
            "/r/loop".into(),
            EntryKind::Directory,
            EntryMetadata::default(),
            None,
            Error::symlink_cycle("/r/loop", "/r"),
        );
        assert!(task.seal());
        task.try_submit();
        let err = run(&task).unwrap_err();
        assert!(matches!(*err, Error::SymlinkCycle { .. }));
        assert_eq!(task.kind(), EntryKind::Directory);
    }

    #[test]
    fn test_directory_fault_overrides_children() {
        let dir = Task::directory("/r".into(), EntryMetadata::default(), None);
        dir.set_fault(Error::entry_io("/r", std::io::Error::other("permission denied")));
        dir.seal();
        dir.try_submit();
        let err = run(&dir).unwrap_err();
        assert_eq!(err.failed_paths(dir.path()), vec![PathBuf::from("/r")]);
    }

    #[test]
    fn test_metadata_truncated_to_seconds() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("f");
        fs::write(&path, b"12345").unwrap();
        let meta = EntryMetadata::from_metadata(&fs::metadata(&path).unwrap());
        assert_eq!(meta.size, 5);
        let modified = meta.modified.unwrap();
        assert_eq!(modified.timestamp_subsec_nanos(), 0);
    }
}
