//! Builds the task graph from walk events and feeds it to the scheduler.

use crate::error::{Error, Result};
use crate::scheduler::Scheduler;
use crate::task::{EntryKind, EntryMetadata, Task};
use crate::walk::TreeVisitor;
use std::path::Path;
use std::sync::Arc;

/// Turns traversal events into tasks.
///
/// Files are submitted as soon as they are seen. A directory is sealed when
/// the walk leaves it and submitted right away if every child already
/// finished; otherwise its last finishing child submits it.
pub struct GraphBuilder<'a> {
    scheduler: &'a Scheduler,
    /// Directories entered but not yet left, innermost last.
    frames: Vec<Arc<Task>>,
    root: Option<Arc<Task>>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(scheduler: &'a Scheduler) -> Self {
        Self {
            scheduler,
            frames: Vec::new(),
            root: None,
        }
    }

    /// The root task, once the walk has left the root directory.
    pub fn into_root(self) -> Option<Arc<Task>> {
        self.root
    }

    fn ensure_running(&self) -> Result<()> {
        if self.scheduler.is_accepting() {
            Ok(())
        } else {
            Err(Error::SchedulerStopped)
        }
    }

    /// Track, attach to the current directory, and enqueue a leaf task.
    fn add_leaf(&mut self, task: Arc<Task>) -> Result<()> {
        self.scheduler.track(&task);
        match self.frames.last() {
            Some(frame) => frame.register(task.clone())?,
            None => self.root = Some(task.clone()),
        }
        if task.try_submit() {
            self.scheduler.submit(task)?;
        }
        Ok(())
    }
}

impl TreeVisitor for GraphBuilder<'_> {
    fn enter_directory(&mut self, path: &Path, metadata: EntryMetadata) -> Result<()> {
        self.ensure_running()?;
        tracing::debug!(path = %path.display(), depth = self.frames.len(), "enter directory");
        let task = Task::directory(path.to_path_buf(), metadata, self.frames.last());
        self.scheduler.track(&task);
        self.frames.push(task);
        Ok(())
    }

    fn visit_file(&mut self, path: &Path, metadata: EntryMetadata) -> Result<()> {
        self.ensure_running()?;
        let task = Task::file(path.to_path_buf(), metadata, self.frames.last());
        self.add_leaf(task)
    }

    fn leave_directory(&mut self, path: &Path) -> Result<()> {
        self.ensure_running()?;
        let task = self
            .frames
            .pop()
            .ok_or_else(|| Error::walk(format!("left {} without entering", path.display())))?;
        debug_assert_eq!(task.path(), path);
        tracing::debug!(path = %path.display(), "leave directory");

        if task.seal() && task.try_submit() {
            self.scheduler.submit(task.clone())?;
        }
        // The task may already be finished here; registration copes with that.
        match self.frames.last() {
            Some(parent) => parent.register(task),
            None => {
                self.root = Some(task);
                Ok(())
            }
        }
    }

    fn visit_fault(&mut self, path: &Path, kind: EntryKind, error: Error) -> Result<()> {
        self.ensure_running()?;
        tracing::warn!(path = %path.display(), %kind, error = %error, "entry cannot be checksummed");
        let task = Task::faulted(
            path.to_path_buf(),
            kind,
            EntryMetadata::probe(path),
            self.frames.last(),
            error,
        );
        self.add_leaf(task)
    }

    fn directory_fault(&mut self, path: &Path, error: Error) -> Result<()> {
        self.ensure_running()?;
        tracing::warn!(path = %path.display(), error = %error, "directory listing failed");
        match self.frames.last() {
            Some(frame) => {
                frame.set_fault(error);
                Ok(())
            }
            None => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{Completion, Signal};
    use crate::digest::{Algorithm, Hash};
    use crate::manifest::CollectingSink;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn pool(workers: usize) -> (Scheduler, Arc<CollectingSink>, Arc<Completion>) {
        let sink = Arc::new(CollectingSink::new());
        let completion = Arc::new(Completion::new());
        let scheduler =
            Scheduler::start(workers, Algorithm::Blake3, sink.clone(), completion.clone())
                .unwrap();
        (scheduler, sink, completion)
    }

    #[test]
    fn test_manual_events_build_tree() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        fs::write(root.join("a.txt"), b"hi").unwrap();
        fs::create_dir(root.join("b")).unwrap();
        fs::write(root.join("b/c.txt"), b"yo!").unwrap();

        let (scheduler, sink, completion) = pool(2);
        let mut builder = GraphBuilder::new(&scheduler);
        let meta = EntryMetadata::default();
        builder.enter_directory(&root, meta).unwrap();
        builder.visit_file(&root.join("a.txt"), meta).unwrap();
        builder.enter_directory(&root.join("b"), meta).unwrap();
        builder.visit_file(&root.join("b/c.txt"), meta).unwrap();
        builder.leave_directory(&root.join("b")).unwrap();
        builder.leave_directory(&root).unwrap();
        let root_task = builder.into_root().unwrap();

        let b = Hash::hash_parts([Hash::hash_bytes(b"yo!").to_hex()]);
        let expected = Hash::hash_parts([Hash::hash_bytes(b"hi").to_hex(), b.to_hex()]);
        match completion.wait(Some(Duration::from_secs(10))) {
            Some(Signal::Finished(Ok(hash))) => assert_eq!(hash, expected),
            other => panic!("unexpected signal: {:?}", other),
        }
        assert!(root_task.is_finished());
        assert_eq!(sink.records().len(), 4);
        scheduler.join();
    }

    #[test]
    fn test_directory_fault_marks_open_frame() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();

        let (scheduler, sink, completion) = pool(1);
        let mut builder = GraphBuilder::new(&scheduler);
        builder
            .enter_directory(&root, EntryMetadata::default())
            .unwrap();
        builder
            .directory_fault(&root, Error::entry_io(&root, std::io::Error::other("denied")))
            .unwrap();
        builder.leave_directory(&root).unwrap();

        match completion.wait(Some(Duration::from_secs(10))) {
            Some(Signal::Finished(Err(err))) => {
                assert_eq!(err.failed_paths(&root), vec![root.clone()]);
            }
            other => panic!("unexpected signal: {:?}", other),
        }
        assert!(sink.records()[0].is_failure());
        scheduler.join();
    }

    #[test]
    fn test_events_after_stop_are_rejected() {
        let (scheduler, _sink, _completion) = pool(1);
        scheduler.stop();
        let mut builder = GraphBuilder::new(&scheduler);
        let err = builder
            .enter_directory(Path::new("/r"), EntryMetadata::default())
            .unwrap_err();
        assert!(matches!(err, Error::SchedulerStopped));
        scheduler.join();
    }
}
