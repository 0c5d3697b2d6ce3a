//! Manifest records: the externally visible output, one per entry.

use crate::digest::Hash;
use crate::task::{EntryKind, Task};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use std::path::{Path, PathBuf};

/// Marker printed in place of a checksum for failed entries.
pub const FAILURE_MARKER: &str = "FAILED";

const UTC_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// One manifest line.
///
/// The path is kept as-is; it is rendered lossily only when written out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestRecord {
    #[serde(serialize_with = "serialize_path")]
    pub path: PathBuf,
    pub kind: EntryKind,
    #[serde(rename = "createdUtc", serialize_with = "serialize_utc")]
    pub created: Option<DateTime<Utc>>,
    #[serde(rename = "modifiedUtc", serialize_with = "serialize_utc")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(rename = "sizeBytes")]
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Hash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ManifestRecord {
    /// Build the record for a finished task. `None` while it is unfinished.
    pub fn from_task(task: &Task) -> Option<Self> {
        let result = task.result()?;
        let metadata = task.metadata();
        let (checksum, error) = match result {
            Ok(hash) => (Some(*hash), None),
            Err(err) => (None, Some(err.to_string())),
        };
        Some(Self {
            path: task.path().to_path_buf(),
            kind: task.kind(),
            created: metadata.created,
            modified: metadata.modified,
            size: metadata.size,
            checksum,
            error,
        })
    }

    pub fn is_failure(&self) -> bool {
        self.checksum.is_none()
    }

    /// CSV-style line: `"path",KIND,created,modified,size,checksum`.
    ///
    /// Quotes inside the path are doubled; missing timestamps print as `-`.
    pub fn to_line(&self) -> String {
        format!(
            "\"{}\",{},{},{},{},{}",
            self.path.display().to_string().replace('"', "\"\""),
            self.kind,
            format_utc(self.created.as_ref()),
            format_utc(self.modified.as_ref()),
            self.size,
            self.checksum
                .map(|h| h.to_hex())
                .unwrap_or_else(|| FAILURE_MARKER.to_string()),
        )
    }
}

/// ISO-8601, second precision, `Z` suffix. `-` when unknown.
pub fn format_utc(time: Option<&DateTime<Utc>>) -> String {
    match time {
        Some(t) => t.format(UTC_FORMAT).to_string(),
        None => "-".to_string(),
    }
}

fn serialize_path<S: Serializer>(
    path: &Path,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&path.to_string_lossy())
}

fn serialize_utc<S: Serializer>(
    time: &Option<DateTime<Utc>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match time {
        Some(t) => serializer.serialize_str(&t.format(UTC_FORMAT).to_string()),
        None => serializer.serialize_none(),
    }
}

/// Receives records as tasks finish, from any worker thread.
pub trait ManifestSink: Send + Sync {
    fn emit(&self, record: ManifestRecord);
}

/// Keeps every record in memory, in emission order.
#[derive(Debug, Default)]
pub struct CollectingSink {
    records: Mutex<Vec<ManifestRecord>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records emitted so far, in completion order.
    pub fn records(&self) -> Vec<ManifestRecord> {
        self.records.lock().clone()
    }

    /// Drain the records sorted by path, component by component.
    pub fn take_sorted(&self) -> Vec<ManifestRecord> {
        let mut records = std::mem::take(&mut *self.records.lock());
        records.sort_by(|a, b| a.path.cmp(&b.path));
        records
    }
}

impl ManifestSink for CollectingSink {
    fn emit(&self, record: ManifestRecord) {
        self.records.lock().push(record);
    }
}
