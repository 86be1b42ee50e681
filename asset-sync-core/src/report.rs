//! Per-entry results and the run summary returned by [`crate::synchronise::synchronise`].

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use uuid::Uuid;

use crate::manifest::ManifestEntry;

/// Linear per-entry lifecycle: `Pending → Fetched → Converted → Written`, or `Failed` from any stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Fetched,
    Converted,
    Written,
    Failed,
}

impl EntryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, EntryStatus::Written | EntryStatus::Failed)
    }
}

/// Stage at which an entry failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Fetch,
    /// The payload was not a decodable image in a supported format.
    Decode,
    Convert,
    Write,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    /// Position of the entry in the validated manifest.
    pub index: usize,
    pub entry: ManifestEntry,
    pub status: EntryStatus,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
    pub bytes_downloaded: u64,
    pub attempts: u32,
    /// Published files, one per requested size.
    pub outputs: Vec<PathBuf>,
}

impl FetchResult {
    pub fn pending(index: usize, entry: ManifestEntry) -> Self {
        Self {
            index,
            entry,
            status: EntryStatus::Pending,
            error: None,
            failure: None,
            bytes_downloaded: 0,
            attempts: 0,
            outputs: Vec::new(),
        }
    }

    /// Move to a later, non-failed stage.
    pub fn advance(&mut self, status: EntryStatus) {
        debug_assert!(
            !self.status.is_terminal() && status > self.status && status != EntryStatus::Failed,
            "illegal transition {:?} -> {:?}",
            self.status,
            status
        );
        self.status = status;
    }

    pub fn fail(mut self, kind: FailureKind, error: impl fmt::Display) -> Self {
        debug_assert!(!self.status.is_terminal(), "entry already finished");
        self.status = EntryStatus::Failed;
        self.failure = Some(kind);
        self.error = Some(error.to_string());
        self.outputs.clear();
        self
    }

    pub fn is_written(&self) -> bool {
        self.status == EntryStatus::Written
    }

    pub fn is_failed(&self) -> bool {
        self.status == EntryStatus::Failed
    }
}

/// Why a run stopped before every entry had its chance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// An external signal (e.g. Ctrl-C) cancelled the run.
    Cancelled,
    /// The run-level timeout elapsed.
    TimedOut,
    /// Repeated write failures and a failing probe: the destination itself is unusable.
    DestinationUnwritable,
}

impl AbortReason {
    /// Fatal aborts are setup-class errors (exit code 2) rather than per-entry failures.
    pub fn is_fatal(self) -> bool {
        matches!(self, AbortReason::DestinationUnwritable)
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AbortReason::Cancelled => "run cancelled",
            AbortReason::TimedOut => "run timeout elapsed",
            AbortReason::DestinationUnwritable => "destination directory became unwritable",
        };
        f.write_str(text)
    }
}

/// Aggregate outcome of one run, in manifest order.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub results: Vec<FetchResult>,
    /// Set when the run stopped early: cancellation, timeout, or an unwritable destination.
    pub aborted: Option<AbortReason>,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_written()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.is_failed()).count()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    pub fn is_fatal(&self) -> bool {
        self.aborted.is_some_and(AbortReason::is_fatal)
    }

    /// `(logical_name, reason)` for every failed entry.
    pub fn failures(&self) -> Vec<(&str, &str)> {
        self.results
            .iter()
            .filter(|r| r.is_failed())
            .map(|r| {
                (
                    r.entry.logical_name.as_str(),
                    r.error.as_deref().unwrap_or("unknown error"),
                )
            })
            .collect()
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.results.iter().map(|r| r.bytes_downloaded).sum()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} succeeded, {} failed", self.succeeded(), self.failed())
    }
}
