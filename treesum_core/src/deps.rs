//! Per-directory dependency tracking.

use crate::error::{Error, Result};
use crate::task::Task;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The children a directory task waits on.
///
/// Children are keyed by path so that combination order is the ascending
/// path order, independent of discovery order. All state sits behind one
/// guard: the walker registers and seals while workers report completions.
#[derive(Debug, Default)]
pub struct DependencySet {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    children: BTreeMap<PathBuf, Arc<Task>>,
    /// Registered children that have not reported completion yet.
    pending: HashSet<PathBuf>,
    sealed: bool,
}

impl Inner {
    fn is_ready(&self) -> bool {
        self.sealed && self.pending.is_empty()
    }
}

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a child. Fails with a fatal error once the set is sealed.
    pub fn register(&self, owner: &Path, child: Arc<Task>) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.sealed {
            return Err(Error::sealed_dependencies(owner, child.path()));
        }

        let path = child.path().to_path_buf();
        // A child that finished before registration has already reported
        // to us and found nothing to remove; it must not become pending.
        if !child.is_finished() {
            inner.pending.insert(path.clone());
        }
        if inner.children.insert(path.clone(), child).is_some() {
            tracing::warn!(parent = %owner.display(), child = %path.display(), "duplicate dependency");
        }
        Ok(())
    }

    /// No further children may be added. Returns whether the set is ready.
    pub fn seal(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.sealed = true;
        inner.is_ready()
    }

    /// Sealed and every registered child finished.
    pub fn is_ready(&self) -> bool {
        self.inner.lock().is_ready()
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.lock().sealed
    }

    /// Number of children still held.
    pub fn len(&self) -> usize {
        self.inner.lock().children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record that the child at `path` reached `FINISHED`. Returns readiness
    /// as observed under the same guard.
    pub(crate) fn child_finished(&self, path: &Path) -> bool {
        let mut inner = self.inner.lock();
        inner.pending.remove(path);
        inner.is_ready()
    }

    /// Hand over the children for combination, verifying readiness first.
    ///
    /// The set keeps its sealed flag but releases the child tasks, which have
    /// no further use once their parent has read them.
    pub(crate) fn take_ready(&self, owner: &Path) -> Result<BTreeMap<PathBuf, Arc<Task>>> {
        let mut inner = self.inner.lock();
        if !inner.sealed {
            return Err(Error::not_ready(owner, "sealed dependency set", "still open"));
        }
        let unfinished = inner
            .children
            .values()
            .filter(|child| !child.is_finished())
            .count();
        if unfinished > 0 || !inner.pending.is_empty() {
            return Err(Error::not_ready(
                owner,
                format!("all {} children finished", inner.children.len()),
                format!("{} unfinished", unfinished.max(inner.pending.len())),
            ));
        }
        Ok(std::mem::take(&mut inner.children))
    }
}
