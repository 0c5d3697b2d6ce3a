//! Run configuration.

use crate::digest::Algorithm;
use crate::error::{Error, Result};
use crate::scheduler::DEFAULT_WORKERS;
use std::time::Duration;

/// Settings for one manifest run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Number of worker threads. Independent of tree size.
    pub workers: usize,
    /// Digest used for file contents and for combining children.
    pub algorithm: Algorithm,
    /// How long the driving thread waits for the root. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Follow symbolic links (cycles become entry faults).
    pub follow_links: bool,
    /// Honour `.gitignore`, `.ignore` and git exclude files.
    pub git_ignore: bool,
    /// Include dot-files and dot-directories.
    pub include_hidden: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            algorithm: Algorithm::default(),
            timeout: None,
            follow_links: true,
            git_ignore: false,
            include_hidden: true,
        }
    }
}

impl RunConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_follow_links(mut self, follow_links: bool) -> Self {
        self.follow_links = follow_links;
        self
    }

    pub fn with_git_ignore(mut self, git_ignore: bool) -> Self {
        self.git_ignore = git_ignore;
        self
    }

    pub fn with_include_hidden(mut self, include_hidden: bool) -> Self {
        self.include_hidden = include_hidden;
        self
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::invalid_config("worker count must be at least 1"));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(Error::invalid_config("timeout must be greater than zero"));
        }
        Ok(())
    }
}
