//! CLI surface for sync-assets: flag parsing, settings layering and the async `run` entrypoint.
//!
//! All pipeline logic (validation, fetching, normalization, publishing) lives in
//! [`asset_sync_core`]; this module only wires files, flags and the terminal to it.
//!
//! ## How To Use
//! - Command line: `sync-assets --manifest assets/manifest.yaml --out docs/assets --size 32x32`
//! - Programmatic/integration use: call [`run`] with a constructed [`Cli`] and map
//!   the summary with [`crate::report::exit_code`].

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use asset_sync_core::cancel::CancelSignal;
use asset_sync_core::config::{OutputFormat, ResizePolicy, TargetSize};
use asset_sync_core::fetch::HttpFetcher;
use asset_sync_core::normalize::ImageNormalizer;
use asset_sync_core::report::RunSummary;
use asset_sync_core::synchronise::synchronise;
use clap::Parser;

use crate::duration::parse_duration;
use crate::load_config::{load_config, FileConfig, RunSettings};
use crate::load_manifest::load_manifest;
use crate::report::{write_report, write_summary};

/// Fetch remote logos listed in a manifest and publish them, normalized, into a local directory.
#[derive(Parser, Debug, Clone, Default)]
#[clap(name = "sync-assets", version, about)]
pub struct Cli {
    /// Manifest file (.yaml, .yml, .json, or `name,url,filename` lines) [default: assets/manifest.yaml]
    #[clap(long, env = "SYNC_ASSETS_MANIFEST")]
    pub manifest: Option<PathBuf>,

    /// Destination directory; created if absent
    #[clap(long, env = "SYNC_ASSETS_OUT")]
    pub out: Option<PathBuf>,

    /// Maximum number of entries processed at once [default: 8]
    #[clap(long, env = "SYNC_ASSETS_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Target bounding box as WxH; repeat for several sizes [default: 64x64]
    #[clap(long = "size", env = "SYNC_ASSETS_SIZE", value_delimiter = ',')]
    pub sizes: Vec<TargetSize>,

    /// Output format: png, jpeg or webp [default: png]
    #[clap(long, env = "SYNC_ASSETS_FORMAT")]
    pub format: Option<OutputFormat>,

    /// Per-request timeout, e.g. 30, 30s, 500ms, 2m [default: 30s]
    #[clap(long, env = "SYNC_ASSETS_TIMEOUT", value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Retries after the first attempt for transient fetch errors [default: 3]
    #[clap(long, env = "SYNC_ASSETS_RETRIES")]
    pub retries: Option<u32>,

    /// Resize policy when aspect ratios differ: fit, fill or stretch [default: fit]
    #[clap(long, env = "SYNC_ASSETS_RESIZE")]
    pub resize: Option<ResizePolicy>,

    /// Flatten transparency onto white
    #[clap(long, env = "SYNC_ASSETS_NO_TRANSPARENCY")]
    pub no_transparency: bool,

    /// Deadline for the whole run; unfinished entries are cancelled
    #[clap(long, env = "SYNC_ASSETS_RUN_TIMEOUT", value_parser = parse_duration)]
    pub run_timeout: Option<Duration>,

    /// Write a machine-readable JSON report to this path
    #[clap(long, env = "SYNC_ASSETS_REPORT")]
    pub report: Option<PathBuf>,

    /// Optional YAML config file; flags override its values
    #[clap(long, env = "SYNC_ASSETS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Accept plain http:// source URLs
    #[clap(long, env = "SYNC_ASSETS_ALLOW_HTTP")]
    pub allow_http: bool,
}

/// Extracted async CLI logic entrypoint for integration tests and main().
///
/// Returns the run summary for exit-code mapping; `Err` means a setup error.
pub async fn run(cli: Cli) -> Result<RunSummary> {
    tracing::info!("trace_initialised");

    let file = match &cli.config {
        Some(path) => load_config(path)?,
        None => FileConfig::default(),
    };
    let settings = RunSettings::resolve(&cli, file)?;
    tracing::info!(
        manifest = ?settings.manifest,
        destination = ?settings.sync.destination,
        "Resolved run settings"
    );

    let entries = load_manifest(&settings.manifest)?;
    let fetcher =
        HttpFetcher::new(settings.request_timeout).context("Failed to build HTTP client")?;

    let cancel = CancelSignal::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, cancelling run");
                cancel.cancel();
            }
        })
    };

    let outcome = synchronise(
        &settings.sync,
        entries,
        &fetcher,
        Arc::new(ImageNormalizer::default()),
        &cancel,
    )
    .await;
    ctrl_c.abort();

    let summary = match outcome {
        Ok(summary) => summary,
        Err(e) => {
            tracing::error!(error = %e, "Synchronisation could not start");
            return Err(e.into());
        }
    };

    let mut stdout = std::io::stdout().lock();
    write_summary(&summary, &mut stdout).context("Failed to write summary")?;
    stdout.flush().context("Failed to write summary")?;
    drop(stdout);

    if let Some(path) = &settings.report {
        write_report(&summary, path)?;
    }

    tracing::info!(
        run_id = %summary.run_id,
        succeeded = summary.succeeded(),
        failed = summary.failed(),
        "Synchronisation complete"
    );
    Ok(summary)
}
