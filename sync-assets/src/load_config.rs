//! `load_config` module: reads the optional YAML config file and layers CLI flags over it.
//!
//! # Responsibilities
//! - Parse the user-supplied YAML file into [`FileConfig`] (every key optional)
//! - Merge it with the parsed [`Cli`] into [`RunSettings`]: flags and their
//!   `SYNC_ASSETS_*` environment fallbacks win, then the file, then built-in defaults
//! - Produce clear diagnostics; every failure here is a setup error (exit code 2)
//!
//! # Example
//! ```yaml
//! manifest: assets/manifest.yaml
//! out: docs/assets/logos
//! concurrency: 4
//! sizes: [32x32, 64x64]
//! format: png
//! timeout: 10s
//! retries: 2
//! resize: fit
//! preserve_transparency: true
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use asset_sync_core::config::{
    NormalizeOptions, OutputFormat, ResizePolicy, SyncConfig, TargetSize, DEFAULT_CONCURRENCY,
    DEFAULT_SIZE,
};
use asset_sync_core::fetch::DEFAULT_REQUEST_TIMEOUT;
use asset_sync_core::retry::RetryPolicy;
use serde::Deserialize;
use tracing::{error, info};

use crate::cli::Cli;
use crate::duration;

/// Manifest read when neither `--manifest` nor the config file names one.
pub const DEFAULT_MANIFEST: &str = "assets/manifest.yaml";

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub manifest: Option<PathBuf>,
    #[serde(alias = "destination")]
    pub out: Option<PathBuf>,
    pub concurrency: Option<usize>,
    #[serde(default, alias = "size")]
    pub sizes: Vec<TargetSize>,
    pub format: Option<OutputFormat>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    pub resize: Option<ResizePolicy>,
    pub preserve_transparency: Option<bool>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub run_timeout: Option<Duration>,
    pub report: Option<PathBuf>,
    pub allow_http: Option<bool>,
}

/// Loads the YAML config file. An empty file yields the all-defaults config.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<FileConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let content = fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
        anyhow!("Failed to read config file {:?}: {}", path_ref, e)
    })?;
    if content.trim().is_empty() {
        return Ok(FileConfig::default());
    }

    let config: FileConfig = serde_yaml::from_str(&content).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
        anyhow!("Failed to parse config YAML {:?}: {e}", path_ref)
    })?;
    info!(config_path = ?path_ref, "Parsed config YAML successfully");
    Ok(config)
}

/// Everything the CLI needs for one run, after layering.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub manifest: PathBuf,
    pub sync: SyncConfig,
    pub request_timeout: Duration,
    pub report: Option<PathBuf>,
}

impl RunSettings {
    pub fn resolve(cli: &Cli, file: FileConfig) -> Result<Self> {
        let destination = cli
            .out
            .clone()
            .or(file.out)
            .context("no output directory: pass --out <dir> or set `out` in the config file")?;

        let requested = if !cli.sizes.is_empty() {
            cli.sizes.clone()
        } else if !file.sizes.is_empty() {
            file.sizes
        } else {
            vec![DEFAULT_SIZE]
        };
        let mut sizes: Vec<TargetSize> = Vec::with_capacity(requested.len());
        for size in requested {
            if !sizes.contains(&size) {
                sizes.push(size);
            }
        }

        let options = NormalizeOptions {
            sizes,
            format: cli.format.or(file.format).unwrap_or_default(),
            preserve_transparency: if cli.no_transparency {
                false
            } else {
                file.preserve_transparency.unwrap_or(true)
            },
            resize: cli.resize.or(file.resize).unwrap_or_default(),
        };

        let retry = RetryPolicy {
            max_retries: cli
                .retries
                .or(file.retries)
                .unwrap_or(RetryPolicy::default().max_retries),
            ..RetryPolicy::default()
        };

        let concurrency = cli
            .concurrency
            .or(file.concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            return Err(anyhow!("concurrency must be at least 1"));
        }

        let sync = SyncConfig {
            destination,
            concurrency,
            options,
            retry,
            run_timeout: cli.run_timeout.or(file.run_timeout),
            allow_http: cli.allow_http || file.allow_http.unwrap_or(false),
        };

        Ok(Self {
            manifest: cli
                .manifest
                .clone()
                .or(file.manifest)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MANIFEST)),
            sync,
            request_timeout: cli
                .timeout
                .or(file.timeout)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            report: cli.report.clone().or(file.report),
        })
    }
}
