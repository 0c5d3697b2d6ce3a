//! Error types for treesum_core.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias using treesum_core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while computing a tree manifest.
///
/// Most variants are *entry faults*: they are stored on the task for one
/// filesystem entry and flow upward as data. [`Error::is_fatal`] picks out the
/// programming-error faults, which stop the run.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred during file operations.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// I/O error attached to a specific entry.
    #[error("I/O error at {path}: {source}")]
    EntryIo {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A symbolic link resolves to one of its own ancestors.
    #[error("Symlink cycle at {path} (points back to {ancestor})")]
    SymlinkCycle { path: PathBuf, ancestor: PathBuf },

    /// One or more descendants of a directory failed.
    #[error("Partial failure in {path}: {} failed entries", .failed.len())]
    PartialFailure { path: PathBuf, failed: Vec<PathBuf> },

    /// A task body panicked inside a worker.
    #[error("Task for {path} panicked: {message}")]
    Panicked { path: PathBuf, message: String },

    /// The root handed to the engine is not a directory.
    #[error("Not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// A dependency was registered after the set was sealed.
    #[error("Cannot add dependency {parent} -> {child}: dependency set is sealed")]
    SealedDependencies { parent: PathBuf, child: PathBuf },

    /// A directory checksum was computed before its dependencies were ready.
    #[error("Directory {path} is not ready: expected {expected}, got {actual}")]
    NotReady {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// A task attempted an illegal state transition.
    #[error("Task {path} cannot move to {target}: state is {actual}")]
    InvalidTransition {
        path: PathBuf,
        target: String,
        actual: String,
    },

    /// The scheduler no longer accepts work.
    #[error("Scheduler has stopped accepting tasks")]
    SchedulerStopped,

    /// The walk primitive reported something that is not tied to an entry.
    #[error("Walk error: {reason}")]
    Walk { reason: String },

    /// Invalid run configuration.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Unsupported algorithm.
    #[error("Unsupported algorithm: {algorithm}")]
    UnsupportedAlgorithm { algorithm: String },
}

impl Error {
    /// Create an EntryIo error.
    pub fn entry_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::EntryIo {
            path: path.into(),
            source,
        }
    }

    /// Create a SymlinkCycle error.
    pub fn symlink_cycle(path: impl Into<PathBuf>, ancestor: impl Into<PathBuf>) -> Self {
        Error::SymlinkCycle {
            path: path.into(),
            ancestor: ancestor.into(),
        }
    }

    /// Create a PartialFailure error.
    pub fn partial_failure(path: impl Into<PathBuf>, failed: Vec<PathBuf>) -> Self {
        Error::PartialFailure {
            path: path.into(),
            failed,
        }
    }

    /// Create a Panicked error.
    pub fn panicked(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::Panicked {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<PathBuf>) -> Self {
        Error::NotADirectory { path: path.into() }
    }

    /// Create a SealedDependencies error.
    pub fn sealed_dependencies(parent: impl Into<PathBuf>, child: impl Into<PathBuf>) -> Self {
        Error::SealedDependencies {
            parent: parent.into(),
            child: child.into(),
        }
    }

    /// Create a NotReady error.
    pub fn not_ready(
        path: impl Into<PathBuf>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Error::NotReady {
            path: path.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create an InvalidTransition error.
    pub fn invalid_transition(
        path: impl Into<PathBuf>,
        target: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Error::InvalidTransition {
            path: path.into(),
            target: target.into(),
            actual: actual.into(),
        }
    }

    /// Create a Walk error.
    pub fn walk(reason: impl Into<String>) -> Self {
        Error::Walk {
            reason: reason.into(),
        }
    }

    /// Create an InvalidConfig error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Error::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create an UnsupportedAlgorithm error.
    pub fn unsupported_algorithm(algorithm: impl Into<String>) -> Self {
        Error::UnsupportedAlgorithm {
            algorithm: algorithm.into(),
        }
    }

    /// Whether this error is a broken invariant rather than an entry fault.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::SealedDependencies { .. }
                | Error::NotReady { .. }
                | Error::InvalidTransition { .. }
        )
    }

    /// Leaf entries responsible for this error, with `path` as the entry the
    /// error was recorded on.
    ///
    /// A partial failure names the descendants that failed; any other error
    /// names the entry itself.
    pub fn failed_paths(&self, path: &Path) -> Vec<PathBuf> {
        match self {
            Error::PartialFailure { failed, .. } => failed.clone(),
            _ => vec![path.to_path_buf()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::sealed_dependencies("/a", "/a/b").is_fatal());
        assert!(Error::not_ready("/a", "sealed", "open").is_fatal());
        assert!(Error::invalid_transition("/a", "RUNNING", "FINISHED").is_fatal());
        assert!(!Error::symlink_cycle("/a/l", "/a").is_fatal());
        assert!(!Error::partial_failure("/a", vec![]).is_fatal());
    }

    #[test]
    fn test_failed_paths() {
        let err = Error::entry_io("/r/x", std::io::Error::other("boom"));
        assert_eq!(err.failed_paths(Path::new("/r/x")), vec![PathBuf::from("/r/x")]);

        let partial = Error::partial_failure("/r", vec!["/r/x".into(), "/r/y/z".into()]);
        assert_eq!(
            partial.failed_paths(Path::new("/r")),
            vec![PathBuf::from("/r/x"), PathBuf::from("/r/y/z")]
        );
    }

    #[test]
    fn test_display_includes_context() {
        let err = Error::not_ready("/r/d", "all 3 children finished", "2 finished");
        let msg = err.to_string();
        assert!(msg.contains("/r/d"));
        assert!(msg.contains("all 3 children finished"));
        assert!(msg.contains("2 finished"));
    }
}
