//! Reads a manifest file in any of the supported shapes.
//!
//! The format follows the extension: `.yaml`/`.yml` and `.json` hold either a
//! bare list of entries or `{ entries: [...] }`; anything else is the
//! newline-delimited `name,url,filename` format. Structural validation happens
//! later, in the core runner.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use asset_sync_core::manifest::{parse_lines, ManifestEntry};
use serde::Deserialize;
use tracing::{error, info};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ManifestFile {
    List(Vec<ManifestEntry>),
    Wrapped { entries: Vec<ManifestEntry> },
}

impl ManifestFile {
    fn into_entries(self) -> Vec<ManifestEntry> {
        match self {
            ManifestFile::List(entries) | ManifestFile::Wrapped { entries } => entries,
        }
    }
}

pub fn load_manifest<P: AsRef<Path>>(path: P) -> Result<Vec<ManifestEntry>> {
    let path_ref = path.as_ref();
    let content = fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, manifest_path = ?path_ref, "Failed to read manifest");
        anyhow!("Failed to read manifest {:?}: {}", path_ref, e)
    })?;

    let extension = path_ref
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    // An empty document is an empty manifest; the runner rejects it with a clear message.
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let entries = match extension.as_deref() {
        Some("yaml" | "yml") => serde_yaml::from_str::<ManifestFile>(&content)
            .with_context(|| format!("Failed to parse manifest YAML {:?}", path_ref))?
            .into_entries(),
        Some("json") => serde_json::from_str::<ManifestFile>(&content)
            .with_context(|| format!("Failed to parse manifest JSON {:?}", path_ref))?
            .into_entries(),
        _ => parse_lines(&content)
            .with_context(|| format!("Failed to parse manifest {:?}", path_ref))?,
    };

    info!(manifest_path = ?path_ref, entries = entries.len(), "Loaded manifest");
    Ok(entries)
}
