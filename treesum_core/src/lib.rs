//! # Treesum Core
//!
//! Concurrent checksum manifests for directory trees.
//!
//! Every file is hashed on a bounded worker pool. Every directory gets a
//! checksum derived from its children's checksums in path order, so the root
//! checksum changes whenever any byte below it changes. A directory task is
//! only submitted once its children have finished, which keeps workers from
//! ever blocking on each other.
//!
//! ## Features
//!
//! - One manifest record per entry: path, kind, timestamps, size, checksum
//! - Deterministic checksums independent of worker count and timing
//! - Failures stay local: a failed entry marks its ancestors as partial
//!   failures and the run still completes
//! - Optional `.gitignore` filtering and symlink following
//!
//! ## Example
//!
//! ```no_run
//! use treesum_core::{CollectingSink, Engine, RunConfig};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let sink = Arc::new(CollectingSink::new());
//! let engine = Engine::new(RunConfig::default().with_workers(4), sink.clone());
//!
//! let report = engine.run(Path::new("./my-data"))?;
//! for record in sink.take_sorted() {
//!     println!("{}", record.to_line());
//! }
//! println!("root: {:?}", report.root_checksum());
//! # Ok(())
//! # }
//! ```

mod completion;
mod config;
mod deps;
mod digest;
mod engine;
mod error;
mod graph;
mod manifest;
mod scheduler;
mod task;
mod walk;

pub use completion::{Completion, Signal};
pub use config::RunConfig;
pub use deps::DependencySet;
pub use digest::{Algorithm, HASH_SIZE, Hash};
pub use engine::{Engine, Outcome, RunReport};
pub use error::{Error, Result};
pub use graph::GraphBuilder;
pub use manifest::{CollectingSink, FAILURE_MARKER, ManifestRecord, ManifestSink, format_utc};
pub use scheduler::{DEFAULT_WORKERS, Scheduler, SchedulerStats};
pub use task::{EntryKind, EntryMetadata, Task, TaskResult, TaskState};
pub use walk::{TreeVisitor, walk_tree};
