//! Bounded worker pool that runs submitted tasks.
//!
//! Workers never wait on other tasks. When a task finishes, the worker that
//! ran it reports to the parent's dependency set and, if that completion made
//! the parent ready and won the parent's `CREATED -> SUBMITTED` transition,
//! enqueues the parent. The root task instead fires the completion signal.

use crate::completion::{Completion, Signal};
use crate::digest::Algorithm;
use crate::error::{Error, Result};
use crate::manifest::{ManifestRecord, ManifestSink};
use crate::task::{Task, TaskResult};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

/// Default worker count.
pub const DEFAULT_WORKERS: usize = 6;

/// Counters gathered while the pool runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Manifest records emitted.
    pub emitted: usize,
    /// Records that carry a failure marker.
    pub failures: usize,
}

struct Shared {
    sender: Mutex<Option<Sender<Arc<Task>>>>,
    accepting: AtomicBool,
    algorithm: Algorithm,
    sink: Arc<dyn ManifestSink>,
    completion: Arc<Completion>,
    /// Paths of tracked tasks that have not finished.
    unfinished: Mutex<BTreeSet<PathBuf>>,
    emitted: AtomicUsize,
    failures: AtomicUsize,
}

/// Fixed-size pool of checksum workers.
pub struct Scheduler {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn `workers` threads.
    pub fn start(
        workers: usize,
        algorithm: Algorithm,
        sink: Arc<dyn ManifestSink>,
        completion: Arc<Completion>,
    ) -> Result<Self> {
        if workers == 0 {
            return Err(Error::invalid_config("worker count must be at least 1"));
        }

        let (tx, rx) = crossbeam_channel::unbounded::<Arc<Task>>();
        let shared = Arc::new(Shared {
            sender: Mutex::new(Some(tx)),
            accepting: AtomicBool::new(true),
            algorithm,
            sink,
            completion,
            unfinished: Mutex::new(BTreeSet::new()),
            emitted: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        });

        let mut handles = Vec::with_capacity(workers);
        for worker_idx in 0..workers {
            let rx = rx.clone();
            let worker_shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("checksum-worker-{worker_idx}"))
                .spawn(move || worker_loop(&worker_shared, rx));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    shared.stop();
                    return Err(Error::from(err));
                }
            }
        }
        tracing::debug!(workers, algorithm = algorithm.as_str(), "scheduler started");

        Ok(Self {
            shared,
            workers: handles,
        })
    }

    /// Start tracking `task` as unfinished, for timeout reporting.
    pub fn track(&self, task: &Task) {
        self.shared.unfinished.lock().insert(task.path().to_path_buf());
    }

    /// Enqueue a task that has already moved to `SUBMITTED`.
    pub fn submit(&self, task: Arc<Task>) -> Result<()> {
        self.shared.submit(task)
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::Acquire)
    }

    /// Stop accepting work. Queued tasks that have not started are dropped.
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Tracked tasks that never reached `FINISHED`, sorted by path.
    pub fn unfinished(&self) -> Vec<PathBuf> {
        self.shared.unfinished.lock().iter().cloned().collect()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            emitted: self.shared.emitted.load(Ordering::Acquire),
            failures: self.shared.failures.load(Ordering::Acquire),
        }
    }

    /// Stop and wait for every worker to exit.
    pub fn join(mut self) -> SchedulerStats {
        self.shared.stop();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("checksum worker exited by panic");
            }
        }
        self.stats()
    }

    /// Stop without waiting. Workers busy hashing a file finish that file
    /// and then exit on their own.
    pub fn shutdown(mut self) -> SchedulerStats {
        self.shared.stop();
        self.workers.clear();
        self.stats()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

impl Shared {
    fn submit(&self, task: Arc<Task>) -> Result<()> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(Error::SchedulerStopped);
        }
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(Error::SchedulerStopped)?;
        tracing::debug!(path = %task.path().display(), kind = %task.kind(), "submit");
        sender.send(task).map_err(|_| Error::SchedulerStopped)
    }

    fn stop(&self) {
        self.accepting.store(false, Ordering::Release);
        // Dropping the sender disconnects the queue once it drains.
        self.sender.lock().take();
    }

    /// Stop the run on a broken invariant.
    fn abort(&self, err: Error) {
        tracing::error!(error = %err, "invariant violated, stopping");
        self.stop();
        self.completion.set(Signal::Aborted(err));
    }

    fn execute(&self, task: Arc<Task>) {
        if !self.accepting.load(Ordering::Acquire) {
            tracing::debug!(path = %task.path().display(), "dropping task after stop");
            return;
        }
        if let Err(err) = task.start() {
            self.abort(err);
            return;
        }

        let algorithm = self.algorithm;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.compute(algorithm)));
        let result: TaskResult = match outcome {
            Ok(Ok(hash)) => Ok(hash),
            Ok(Err(err)) if err.is_fatal() => {
                self.abort(err);
                return;
            }
            Ok(Err(err)) => {
                tracing::warn!(path = %task.path().display(), error = %err, "checksum failed");
                Err(Arc::new(err))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(path = %task.path().display(), %message, "task panicked");
                Err(Arc::new(Error::panicked(task.path(), message)))
            }
        };

        self.complete(&task, result);
    }

    fn complete(&self, task: &Arc<Task>, result: TaskResult) {
        if let Err(err) = task.finish(result) {
            self.abort(err);
            return;
        }
        self.unfinished.lock().remove(task.path());

        if let Some(record) = ManifestRecord::from_task(task) {
            if record.is_failure() {
                self.failures.fetch_add(1, Ordering::AcqRel);
            }
            self.emitted.fetch_add(1, Ordering::AcqRel);
            self.sink.emit(record);
        }

        if task.is_root() {
            tracing::info!(path = %task.path().display(), "root task finished");
            if let Some(result) = task.result() {
                self.completion.set(Signal::Finished(result.clone()));
            }
            self.stop();
        } else if let Some(parent) = task.notify_parent() {
            if let Err(err) = self.submit(parent) {
                tracing::debug!(error = %err, "parent not submitted");
            }
        }
    }
}

fn worker_loop(shared: &Shared, rx: Receiver<Arc<Task>>) {
    for task in rx.iter() {
        shared.execute(task);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Hash;
    use crate::manifest::CollectingSink;
    use crate::task::EntryMetadata;
    use std::fs;
    use std::sync::Barrier;
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
    fn test_zero_workers_rejected() {
        let result = Scheduler::start(
            0,
            Algorithm::Blake3,
            Arc::new(CollectingSink::new()),
            Arc::new(Completion::new()),
        );
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_root_file_fires_completion() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("solo.txt");
        fs::write(&path, b"hi").unwrap();

        let (scheduler, sink, completion) = pool(2);
        let task = Task::file(path, EntryMetadata::default(), None);
        scheduler.track(&task);
        assert!(task.try_submit());
        scheduler.submit(task).unwrap();

        match completion.wait(Some(Duration::from_secs(10))) {
            Some(Signal::Finished(Ok(hash))) => assert_eq!(hash, Hash::hash_bytes(b"hi")),
            other => panic!("unexpected signal: {:?}", other),
        }
        assert!(!scheduler.is_accepting());
        assert!(scheduler.unfinished().is_empty());
        assert_eq!(scheduler.stats().emitted, 1);
        assert_eq!(sink.records().len(), 1);
        scheduler.join();
    }

    #[test]
    fn test_parent_resubmitted_after_children() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        for i in 0..20 {
            fs::write(root.join(format!("f{i:02}")), format!("{i}")).unwrap();
        }

        let (scheduler, sink, completion) = pool(1);
        let dir = Task::directory(root.clone(), EntryMetadata::default(), None);
        scheduler.track(&dir);
        for i in 0..20 {
            let child = Task::file(
                root.join(format!("f{i:02}")),
                EntryMetadata::default(),
                Some(&dir),
            );
            scheduler.track(&child);
            dir.register(child.clone()).unwrap();
            child.try_submit();
            scheduler.submit(child).unwrap();
        }
        if dir.seal() && dir.try_submit() {
            scheduler.submit(dir.clone()).unwrap();
        }

        let expected =
            Hash::hash_parts((0..20).map(|i| Hash::hash_bytes(format!("{i}").as_bytes()).to_hex()));
        match completion.wait(Some(Duration::from_secs(10))) {
            Some(Signal::Finished(Ok(hash))) => assert_eq!(hash, expected),
            other => panic!("unexpected signal: {:?}", other),
        }
        assert_eq!(sink.records().len(), 21);
        // The directory is always emitted after its children.
        assert_eq!(sink.records().last().unwrap().path, root);
        scheduler.join();
    }

    #[test]
    fn test_panicking_task_does_not_take_down_worker() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        let sibling = root.join("ok.txt");
        fs::write(&sibling, b"still hashed").unwrap();
        let broken = root.join("broken.bin");

        // One worker: the sibling only runs if the worker survives the panic.
        let (scheduler, sink, completion) = pool(1);
        let dir = Task::directory(root.clone(), EntryMetadata::default(), None);
        scheduler.track(&dir);
        let children = [
            Task::panicking(broken.clone(), Some(&dir)),
            Task::file(sibling.clone(), EntryMetadata::default(), Some(&dir)),
        ];
        for child in children {
            scheduler.track(&child);
            dir.register(child.clone()).unwrap();
            child.try_submit();
            scheduler.submit(child).unwrap();
        }
        if dir.seal() && dir.try_submit() {
            scheduler.submit(dir.clone()).unwrap();
        }

        match completion.wait(Some(Duration::from_secs(10))) {
            Some(Signal::Finished(Err(err))) => {
                assert_eq!(err.failed_paths(&root), vec![broken.clone()]);
            }
            other => panic!("unexpected signal: {:?}", other),
        }
        let records = sink.records();
        assert_eq!(records.len(), 3);
        let panicked = records.iter().find(|r| r.path == broken).unwrap();
        assert!(panicked.error.as_deref().unwrap().contains("panicked"));
        let ok = records.iter().find(|r| r.path == sibling).unwrap();
        assert_eq!(ok.checksum, Some(Hash::hash_bytes(b"still hashed")));
        assert_eq!(scheduler.stats().failures, 2);
        scheduler.join();
    }

    #[test]
    fn test_fatal_fault_aborts_run() {
        let (scheduler, _sink, completion) = pool(2);
        let dir = Task::directory("/r".into(), EntryMetadata::default(), None);
        let child = Task::file("/r/a".into(), EntryMetadata::default(), Some(&dir));
        dir.register(child).unwrap();
        dir.seal();
        // Forcing an unready directory through the pool breaks the invariant.
        assert!(dir.try_submit());
        scheduler.submit(dir).unwrap();

        match completion.wait(Some(Duration::from_secs(10))) {
            Some(Signal::Aborted(err)) => assert!(err.is_fatal()),
            other => panic!("unexpected signal: {:?}", other),
        }
        let late = Task::file("/x".into(), EntryMetadata::default(), None);
        assert!(scheduler.submit(late).is_err());
        scheduler.join();
    }

    #[test]
    fn test_unfinished_listed_after_stop() {
        let (scheduler, _sink, completion) = pool(1);
        let dir = Task::directory("/never".into(), EntryMetadata::default(), None);
        scheduler.track(&dir);
        assert!(completion.wait(Some(Duration::from_millis(20))).is_none());
        scheduler.stop();
        assert_eq!(scheduler.unfinished(), vec![PathBuf::from("/never")]);
        scheduler.join();
    }

    #[test]
    fn test_parent_submitted_exactly_once_under_race() {
        const CHILDREN: usize = 32;
        let dir = Task::directory("/race".into(), EntryMetadata::default(), None);
        let children: Vec<_> = (0..CHILDREN)
            .map(|i| {
                let child = Task::file(
                    PathBuf::from(format!("/race/{i:02}")),
                    EntryMetadata::default(),
                    Some(&dir),
                );
                dir.register(child.clone()).unwrap();
                child.try_submit();
                child.start().unwrap();
                child
            })
            .collect();
        assert!(!dir.seal());

        let barrier = Arc::new(Barrier::new(CHILDREN));
        let winners = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = children
            .into_iter()
            .map(|child| {
                let barrier = Arc::clone(&barrier);
                let winners = Arc::clone(&winners);
                thread::spawn(move || {
                    barrier.wait();
                    child.finish(Ok(Hash::hash_bytes(b"same instant"))).unwrap();
                    if child.notify_parent().is_some() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert_eq!(dir.state(), crate::task::TaskState::Submitted);
        assert!(!dir.try_submit());
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
