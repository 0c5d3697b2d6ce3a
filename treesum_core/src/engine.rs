//! Top-level run: walk, schedule, wait.

use crate::completion::{Completion, Signal};
use crate::config::RunConfig;
use crate::digest::Hash;
use crate::error::{Error, Result};
use crate::graph::GraphBuilder;
use crate::manifest::ManifestSink;
use crate::scheduler::{Scheduler, SchedulerStats};
use crate::task::TaskResult;
use crate::walk::walk_tree;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How a run ended.
#[derive(Debug)]
pub enum Outcome {
    /// The root task finished. Its result may still be a partial failure.
    Completed { root: TaskResult },
    /// The wait gave up; these tasks never finished (sorted by path).
    TimedOut { unfinished: Vec<PathBuf> },
}

/// Summary of one run.
#[derive(Debug)]
pub struct RunReport {
    pub root: PathBuf,
    pub outcome: Outcome,
    pub records_emitted: usize,
    pub failures: usize,
    pub elapsed: Duration,
}

impl RunReport {
    /// The root checksum, if the run completed without failures.
    pub fn root_checksum(&self) -> Option<Hash> {
        match &self.outcome {
            Outcome::Completed { root: Ok(hash) } => Some(*hash),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.root_checksum().is_some()
    }

    pub fn timed_out(&self) -> bool {
        matches!(self.outcome, Outcome::TimedOut { .. })
    }

    fn new(root: &Path, outcome: Outcome, stats: SchedulerStats, started: Instant) -> Self {
        Self {
            root: root.to_path_buf(),
            outcome,
            records_emitted: stats.emitted,
            failures: stats.failures,
            elapsed: started.elapsed(),
        }
    }
}

/// Computes a checksum manifest for a directory tree.
pub struct Engine {
    config: RunConfig,
    sink: Arc<dyn ManifestSink>,
}

impl Engine {
    pub fn new(config: RunConfig, sink: Arc<dyn ManifestSink>) -> Self {
        Self { config, sink }
    }

    /// Walk `root`, checksum every entry on the worker pool and wait for the
    /// root directory's result.
    ///
    /// The configured timeout bounds the whole run, walk included.
    ///
    /// Entry faults are reported through the manifest and the outcome.
    /// `Err` is returned only for fatal conditions: a bad root or config,
    /// a broken scheduling invariant, or failure to start the pool.
    pub fn run(&self, root: &Path) -> Result<RunReport> {
        self.config.validate()?;
        if !root.is_dir() {
            return Err(Error::not_a_directory(root));
        }

        let started = Instant::now();
        tracing::info!(
            root = %root.display(),
            workers = self.config.workers,
            algorithm = self.config.algorithm.as_str(),
            "starting checksum run"
        );

        let completion = Arc::new(Completion::new());
        let scheduler = Scheduler::start(
            self.config.workers,
            self.config.algorithm,
            Arc::clone(&self.sink),
            Arc::clone(&completion),
        )?;

        let mut builder = GraphBuilder::new(&scheduler);
        if let Err(err) = walk_tree(root, &self.config, &mut builder) {
            scheduler.stop();
            // A fatal fault on a worker is the real cause of a stopped walk.
            let err = match completion.try_take() {
                Some(Signal::Aborted(fatal)) => fatal,
                _ => err,
            };
            scheduler.shutdown();
            return Err(err);
        }
        // Held until the end: children only keep weak links to parents.
        let Some(root_task) = builder.into_root() else {
            scheduler.shutdown();
            return Err(Error::walk(format!("{} produced no entries", root.display())));
        };

        match completion.wait(time_left(started, self.config.timeout)) {
            Some(Signal::Finished(result)) => {
                let stats = scheduler.join();
                match &result {
                    Ok(hash) => tracing::info!(
                        root = %root.display(),
                        checksum = %hash,
                        records = stats.emitted,
                        "checksum run finished"
                    ),
                    Err(err) => tracing::warn!(
                        root = %root.display(),
                        error = %err,
                        failures = stats.failures,
                        "checksum run finished with failures"
                    ),
                }
                drop(root_task);
                Ok(RunReport::new(
                    root,
                    Outcome::Completed { root: result },
                    stats,
                    started,
                ))
            }
            Some(Signal::Aborted(err)) => {
                scheduler.shutdown();
                Err(err)
            }
            None => {
                scheduler.stop();
                let unfinished = scheduler.unfinished();
                tracing::error!(
                    root = %root.display(),
                    unfinished = unfinished.len(),
                    "timed out waiting for the root checksum"
                );
                for path in &unfinished {
                    tracing::error!(path = %path.display(), "unfinished");
                }
                let stats = scheduler.shutdown();
                drop(root_task);
                Ok(RunReport::new(
                    root,
                    Outcome::TimedOut { unfinished },
                    stats,
                    started,
                ))
            }
        }
    }
}

/// What remains of `timeout` measured from `started`.
fn time_left(started: Instant, timeout: Option<Duration>) -> Option<Duration> {
    timeout.map(|limit| limit.saturating_sub(started.elapsed()))
}
