//! User-facing rendering of a [`RunSummary`]: stdout lines, the JSON report and the exit code.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use asset_sync_core::report::RunSummary;
use tracing::info;

/// Exit code when every entry was written.
pub const EXIT_OK: u8 = 0;
/// Exit code when one or more entries failed.
pub const EXIT_FAILURES: u8 = 1;
/// Exit code for setup errors and fatal aborts.
pub const EXIT_FATAL: u8 = 2;

pub fn exit_code(summary: &RunSummary) -> u8 {
    if summary.is_fatal() {
        EXIT_FATAL
    } else if summary.has_failures() {
        EXIT_FAILURES
    } else {
        EXIT_OK
    }
}

/// One line per entry in manifest order, then the `N succeeded, M failed` line.
pub fn write_summary<W: Write>(summary: &RunSummary, out: &mut W) -> io::Result<()> {
    for result in &summary.results {
        let name = &result.entry.logical_name;
        if result.is_written() {
            let paths: Vec<String> = result
                .outputs
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            writeln!(
                out,
                "ok   {name} -> {} ({} bytes)",
                paths.join(", "),
                result.bytes_downloaded
            )?;
        } else {
            let reason = result.error.as_deref().unwrap_or("unknown error");
            writeln!(out, "FAIL {name}: {reason}")?;
        }
    }
    if let Some(reason) = summary.aborted {
        writeln!(out, "run aborted: {reason}")?;
    }
    writeln!(out, "{summary}")
}

pub fn write_report(summary: &RunSummary, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create report directory {:?}", parent))?;
    }
    let json = serde_json::to_string_pretty(summary).context("Failed to serialise run report")?;
    fs::write(path, json).with_context(|| format!("Failed to write report {:?}", path))?;
    info!(report_path = ?path, "Wrote JSON report");
    Ok(())
}
