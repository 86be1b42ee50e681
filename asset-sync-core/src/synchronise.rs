//! High-level pipeline: orchestrates fetch → stage → normalize → publish for every manifest entry.
//!
//! # Responsibilities
//! - Validate the manifest and the destination before any network activity (fatal errors only here)
//! - Run at most `concurrency` entry pipelines at once; each one fetches with retries,
//!   normalizes on the blocking pool, and publishes by renaming out of a staging directory
//! - Collect every [`FetchResult`] at a single point and return them in manifest order
//! - Honour external cancellation and the run-level timeout
//!
//! # Error Handling
//! Entry-level failures are captured on that entry's result and never abort the run.
//! Only setup problems return [`SyncError`]. The one mid-run escalation (the destination
//! becoming unwritable) cancels the remaining entries and is reported through
//! [`RunSummary::aborted`], so a summary is always produced once work has started.
//!
//! # Navigation
//! - Main entrypoint: [`synchronise`]
//! - Supporting types: [`crate::config::SyncConfig`], [`crate::report::RunSummary`]

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cancel::CancelSignal;
use crate::config::SyncConfig;
use crate::contract::{FetchError, Fetcher, ImageProcessor, NormalizeSpec};
use crate::manifest::{Manifest, ManifestEntry, ManifestError};
use crate::report::{AbortReason, EntryStatus, FailureKind, FetchResult, RunSummary};
use crate::retry::fetch_with_retry;

/// Prefix of the per-run staging directory created inside the destination.
pub const STAGING_PREFIX: &str = ".sync-assets-staging-";

/// Write failures tolerated before the destination itself is re-probed.
pub const WRITE_FAILURE_ESCALATION: usize = 3;

/// Setup-time failures. Nothing has been fetched when one of these is returned.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid manifest: {0}")]
    Manifest(#[from] ManifestError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("cannot create destination directory {}: {source}", path.display())]
    CreateDestination { path: PathBuf, source: io::Error },
    #[error("destination directory {} is not writable: {source}", path.display())]
    Unwritable { path: PathBuf, source: io::Error },
    #[error("cannot create staging directory in {}: {source}", path.display())]
    Staging { path: PathBuf, source: io::Error },
}

/// Validate `entries`, then fetch, normalize and publish each of them into `config.destination`.
///
/// `cancel` stops new fetches and aborts in-flight ones; entries that did not
/// finish are reported as [`FailureKind::Cancelled`].
pub async fn synchronise<F, P>(
    config: &SyncConfig,
    entries: Vec<ManifestEntry>,
    fetcher: &F,
    processor: Arc<P>,
    cancel: &CancelSignal,
) -> Result<RunSummary, SyncError>
where
    F: Fetcher + ?Sized,
    P: ImageProcessor + ?Sized + 'static,
{
    let run_id = Uuid::new_v4();
    sync_run(config, entries, fetcher, processor, cancel, run_id)
        .instrument(info_span!("sync", %run_id))
        .await
}

async fn sync_run<F, P>(
    config: &SyncConfig,
    entries: Vec<ManifestEntry>,
    fetcher: &F,
    processor: Arc<P>,
    cancel: &CancelSignal,
    run_id: Uuid,
) -> Result<RunSummary, SyncError>
where
    F: Fetcher + ?Sized,
    P: ImageProcessor + ?Sized + 'static,
{
    check_config(config)?;
    let manifest = Manifest::validate(entries, &config.options, config.allow_http)?;
    config.trace_loaded();
    info!(entries = manifest.len(), "[SYNC] Manifest validated");

    prepare_destination(&config.destination)?;
    let staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(&config.destination)
        .map_err(|source| SyncError::Staging {
            path: config.destination.clone(),
            source,
        })?;
    debug!(staging = %staging.path().display(), "[SYNC] Created staging directory");

    let summary = run(config, &manifest, fetcher, processor, cancel, &staging, run_id).await;

    let staging_path = staging.path().to_path_buf();
    if let Err(e) = staging.close() {
        warn!(error = %e, staging = %staging_path.display(), "[SYNC] Failed to remove staging directory");
    }

    info!(
        succeeded = summary.succeeded(),
        failed = summary.failed(),
        bytes = summary.bytes_downloaded(),
        elapsed_ms = summary.elapsed_ms,
        aborted = ?summary.aborted,
        "[SYNC] Run finished"
    );
    Ok(summary)
}

fn check_config(config: &SyncConfig) -> Result<(), SyncError> {
    if config.concurrency == 0 {
        return Err(SyncError::Config("concurrency must be at least 1".into()));
    }
    if config.options.sizes.is_empty() {
        return Err(SyncError::Config("at least one target size is required".into()));
    }
    let mut seen = HashSet::new();
    for size in &config.options.sizes {
        if !seen.insert(size) {
            return Err(SyncError::Config(format!("size {size} is listed twice")));
        }
    }
    Ok(())
}

fn probe_writable(dir: &Path) -> io::Result<()> {
    tempfile::Builder::new()
        .prefix(".sync-assets-probe-")
        .tempfile_in(dir)
        .map(drop)
}

fn prepare_destination(destination: &Path) -> Result<(), SyncError> {
    std::fs::create_dir_all(destination).map_err(|source| {
        error!(error = %source, path = %destination.display(), "[SYNC][ERROR] Failed to create destination");
        SyncError::CreateDestination {
            path: destination.to_path_buf(),
            source,
        }
    })?;
    probe_writable(destination).map_err(|source| {
        error!(error = %source, path = %destination.display(), "[SYNC][ERROR] Destination is not writable");
        SyncError::Unwritable {
            path: destination.to_path_buf(),
            source,
        }
    })?;
    remove_stale_staging(destination);
    Ok(())
}

/// Staging directories left behind by an interrupted earlier run.
fn remove_stale_staging(destination: &Path) {
    let Ok(dir) = std::fs::read_dir(destination) else {
        return;
    };
    for entry in dir.flatten() {
        let name = entry.file_name();
        let is_staging = name.to_string_lossy().starts_with(STAGING_PREFIX);
        if is_staging && entry.file_type().is_ok_and(|t| t.is_dir()) {
            match std::fs::remove_dir_all(entry.path()) {
                Ok(()) => info!(path = %entry.path().display(), "[SYNC] Removed stale staging directory"),
                Err(e) => warn!(error = %e, path = %entry.path().display(), "[SYNC] Could not remove stale staging directory"),
            }
        }
    }
}

struct EntryContext<'a, F: ?Sized, P: ?Sized> {
    config: &'a SyncConfig,
    fetcher: &'a F,
    processor: Arc<P>,
    staging: &'a Path,
    cancel: &'a CancelSignal,
}

async fn run<F, P>(
    config: &SyncConfig,
    manifest: &Manifest,
    fetcher: &F,
    processor: Arc<P>,
    cancel: &CancelSignal,
    staging: &TempDir,
    run_id: Uuid,
) -> RunSummary
where
    F: Fetcher + ?Sized,
    P: ImageProcessor + ?Sized + 'static,
{
    let started = Instant::now();

    // Entries observe this signal; it trips on the caller's cancel or the run timeout.
    let run_cancel = CancelSignal::new();
    if cancel.is_cancelled() {
        run_cancel.cancel();
    }
    let link = {
        let external = cancel.clone();
        let run_cancel = run_cancel.clone();
        let timeout = config.run_timeout;
        tokio::spawn(async move {
            match timeout {
                Some(limit) => {
                    tokio::select! {
                        _ = external.cancelled() => {}
                        _ = tokio::time::sleep(limit) => {
                            warn!(timeout_ms = limit.as_millis() as u64, "[SYNC] Run timeout elapsed, cancelling");
                        }
                    }
                }
                None => external.cancelled().await,
            }
            run_cancel.cancel();
        })
    };

    let ctx = EntryContext {
        config,
        fetcher,
        processor,
        staging: staging.path(),
        cancel: &run_cancel,
    };

    let mut slots: Vec<Option<FetchResult>> = vec![None; manifest.len()];
    let mut write_failures = 0usize;
    let mut aborted = None;

    let mut pipelines = stream::iter(manifest.entries().iter().cloned().enumerate())
        .map(|(index, entry)| process_entry(&ctx, index, entry))
        .buffer_unordered(config.concurrency);

    while let Some(result) = pipelines.next().await {
        match result.status {
            EntryStatus::Written => info!(
                entry = %result.entry.logical_name,
                outputs = ?result.outputs,
                bytes = result.bytes_downloaded,
                attempts = result.attempts,
                "[SYNC] Entry written"
            ),
            _ => warn!(
                entry = %result.entry.logical_name,
                failure = ?result.failure,
                error = result.error.as_deref().unwrap_or_default(),
                attempts = result.attempts,
                "[SYNC] Entry failed"
            ),
        }

        if result.failure == Some(FailureKind::Write) {
            write_failures += 1;
            if write_failures >= WRITE_FAILURE_ESCALATION && aborted.is_none() {
                if let Err(e) = probe_writable(&config.destination) {
                    error!(error = %e, write_failures, "[SYNC][ERROR] Destination became unwritable, aborting run");
                    aborted = Some(AbortReason::DestinationUnwritable);
                    run_cancel.cancel();
                }
            }
        }

        let index = result.index;
        slots[index] = Some(result);
    }
    drop(pipelines);

    link.abort();
    if aborted.is_none() && run_cancel.is_cancelled() {
        aborted = Some(if cancel.is_cancelled() {
            AbortReason::Cancelled
        } else {
            AbortReason::TimedOut
        });
    }

    RunSummary {
        run_id,
        results: slots.into_iter().flatten().collect(),
        aborted,
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}

async fn process_entry<F, P>(
    ctx: &EntryContext<'_, F, P>,
    index: usize,
    entry: ManifestEntry,
) -> FetchResult
where
    F: Fetcher + ?Sized,
    P: ImageProcessor + ?Sized + 'static,
{
    let span = info_span!("entry", index, name = %entry.logical_name);
    async move {
        let mut result = FetchResult::pending(index, entry);
        if ctx.cancel.is_cancelled() {
            return result.fail(FailureKind::Cancelled, "cancelled before fetch");
        }

        // Stage 1: fetch
        let fetched = match fetch_with_retry(
            ctx.fetcher,
            &result.entry.source_url,
            &ctx.config.retry,
            ctx.cancel,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(failure) => {
                result.attempts = failure.attempts;
                let kind = match failure.error {
                    FetchError::Cancelled => FailureKind::Cancelled,
                    _ => FailureKind::Fetch,
                };
                return result.fail(kind, failure.error);
            }
        };
        result.attempts = fetched.attempts;
        result.bytes_downloaded = fetched.asset.bytes.len() as u64;
        result.advance(EntryStatus::Fetched);

        // Stage 2: normalize every requested size on the blocking pool
        let options = &ctx.config.options;
        let source: Arc<[u8]> = Arc::from(fetched.asset.bytes);
        let mut rendered = Vec::new();
        for (size, relative) in options.outputs_for(&result.entry.output_filename) {
            let spec = NormalizeSpec {
                size,
                format: options.format,
                preserve_transparency: options.preserve_transparency,
                resize: options.resize,
            };
            let processor = Arc::clone(&ctx.processor);
            let bytes = Arc::clone(&source);
            let content_type = fetched.asset.content_type.clone();
            let job =
                tokio::task::spawn_blocking(move || processor.normalize(&bytes, content_type, &spec));
            match job.await {
                Ok(Ok(output)) => rendered.push((relative, output)),
                Ok(Err(e)) => {
                    let kind = if e.is_source_problem() {
                        FailureKind::Decode
                    } else {
                        FailureKind::Convert
                    };
                    return result.fail(kind, e);
                }
                Err(e) => {
                    return result.fail(
                        FailureKind::Convert,
                        format!("image conversion task failed: {e}"),
                    )
                }
            }
        }
        result.advance(EntryStatus::Converted);

        if ctx.cancel.is_cancelled() {
            return result.fail(FailureKind::Cancelled, "cancelled before publish");
        }

        // Stage 3: stage and atomically publish
        match publish(ctx.staging, &ctx.config.destination, index, rendered).await {
            Ok(outputs) => {
                result.outputs = outputs;
                result.advance(EntryStatus::Written);
                result
            }
            Err(e) => result.fail(FailureKind::Write, e),
        }
    }
    .instrument(span)
    .await
}

/// Write every rendering into the staging directory, then rename each into place.
///
/// Staged files for this entry are removed on any failure, and so are outputs
/// already renamed into place, so a failed entry leaves nothing behind.
async fn publish(
    staging: &Path,
    destination: &Path,
    index: usize,
    rendered: Vec<(String, Vec<u8>)>,
) -> Result<Vec<PathBuf>, String> {
    let mut staged = Vec::with_capacity(rendered.len());
    for (n, (relative, bytes)) in rendered.into_iter().enumerate() {
        let part = staging.join(format!("{index}-{n}.part"));
        if let Err(e) = tokio::fs::write(&part, &bytes).await {
            staged.push((part, relative.clone()));
            discard(&staged).await;
            return Err(format!("failed to stage '{relative}': {e}"));
        }
        staged.push((part, relative));
    }

    let mut published = Vec::with_capacity(staged.len());
    for (i, (part, relative)) in staged.iter().enumerate() {
        let target = destination.join(relative);
        if let Err(e) = move_into_place(part, &target).await {
            discard(&staged[i..]).await;
            retract(&published).await;
            return Err(format!("failed to publish '{}': {e}", target.display()));
        }
        published.push(target);
    }
    Ok(published)
}

async fn move_into_place(part: &Path, target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::rename(part, target).await
}

async fn retract(published: &[PathBuf]) {
    for target in published {
        if let Err(e) = tokio::fs::remove_file(target).await {
            warn!(error = %e, path = %target.display(), "[SYNC] Could not remove partially published output");
        }
    }
}

async fn discard(staged: &[(PathBuf, String)]) {
    for (part, _) in staged {
        if let Err(e) = tokio::fs::remove_file(part).await {
            if e.kind() != io::ErrorKind::NotFound {
                debug!(error = %e, part = %part.display(), "Could not remove staged file");
            }
        }
    }
}
