//! Output formatting for the CLI.
//!
//! Manifest records go to stdout, one per line, as text or JSON. The run
//! summary and errors go to stderr so stdout stays a clean manifest.

use serde::Serialize;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use treesum_core::{Hash, ManifestRecord, ManifestSink, Outcome, RunReport};

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn new(json: bool) -> Self {
        if json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

/// Streams manifest records to stdout as workers emit them.
pub struct ManifestWriter {
    format: OutputFormat,
    broken: AtomicBool,
}

impl ManifestWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            broken: AtomicBool::new(false),
        }
    }

    /// Write one record. Errors are returned so batch callers can stop early.
    pub fn write_record(&self, record: &ManifestRecord) -> anyhow::Result<()> {
        let line = match self.format {
            OutputFormat::Json => serde_json::to_string(record)?,
            OutputFormat::Text => record.to_line(),
        };
        // One lock per line keeps lines from different workers whole.
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", line)?;
        Ok(())
    }
}

impl ManifestSink for ManifestWriter {
    fn emit(&self, record: ManifestRecord) {
        if self.broken.load(Ordering::Relaxed) {
            return;
        }
        if let Err(err) = self.write_record(&record) {
            // Typically a closed pipe; report once and drop the rest.
            self.broken.store(true, Ordering::Relaxed);
            tracing::warn!(error = %err, "cannot write manifest to stdout");
        }
    }
}

/// Run summary written after the manifest.
#[derive(Debug, Serialize)]
pub struct SummaryOutput {
    pub success: bool,
    pub result_code: u8,
    pub root: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Hash>,
    pub entries: usize,
    pub failures: usize,
    pub elapsed_ms: u128,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unfinished: Vec<String>,
}

impl SummaryOutput {
    pub fn from_report(report: &RunReport, result_code: u8) -> Self {
        let (failed, unfinished) = match &report.outcome {
            Outcome::Completed { root: Err(err) } => (
                err.failed_paths(&report.root)
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect(),
                Vec::new(),
            ),
            Outcome::Completed { root: Ok(_) } => (Vec::new(), Vec::new()),
            Outcome::TimedOut { unfinished } => (
                Vec::new(),
                unfinished.iter().map(|p| p.display().to_string()).collect(),
            ),
        };
        Self {
            success: result_code == 0,
            result_code,
            root: report.root.display().to_string(),
            checksum: report.root_checksum(),
            entries: report.records_emitted,
            failures: report.failures,
            elapsed_ms: report.elapsed.as_millis(),
            failed,
            unfinished,
        }
    }

    pub fn to_text(&self) -> String {
        let mut text = match &self.checksum {
            Some(hash) => format!("{}  {}\n", hash, self.root),
            None if !self.unfinished.is_empty() => format!("TIMED OUT  {}\n", self.root),
            None => format!("FAILED  {}\n", self.root),
        };
        text.push_str(&format!(
            "{} entries, {} failed, {:.3}s\n",
            self.entries,
            self.failures,
            self.elapsed_ms as f64 / 1000.0
        ));
        for path in &self.failed {
            text.push_str(&format!("  failed: {}\n", path));
        }
        for path in &self.unfinished {
            text.push_str(&format!("  unfinished: {}\n", path));
        }
        text
    }
}

/// Error output structure.
#[derive(Debug, Serialize)]
pub struct ErrorOutput {
    pub success: bool,
    pub result_code: u8,
    pub error: String,
}

/// Write the summary to stderr.
pub fn write_summary(format: OutputFormat, summary: &SummaryOutput) -> anyhow::Result<()> {
    let mut stderr = io::stderr().lock();
    match format {
        OutputFormat::Json => writeln!(stderr, "{}", serde_json::to_string_pretty(summary)?)?,
        OutputFormat::Text => write!(stderr, "{}", summary.to_text())?,
    }
    Ok(())
}

/// Write an error message to stderr.
///
/// In JSON mode, writes a JSON error object with success=false.
pub fn write_error(format: OutputFormat, error: &anyhow::Error, result_code: u8) {
    match format {
        OutputFormat::Json => {
            let error_output = ErrorOutput {
                success: false,
                result_code,
                error: format!("{:#}", error),
            };
            if let Ok(json) = serde_json::to_string_pretty(&error_output) {
                let _ = writeln!(io::stderr(), "{}", json);
            }
        }
        OutputFormat::Text => {
            let _ = writeln!(io::stderr(), "Error: {:#}", error);
        }
    }
}
