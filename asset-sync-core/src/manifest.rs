//! Manifest model, the newline-delimited manifest format, and structural validation.
//!
//! A [`Manifest`] can only be obtained through [`Manifest::validate`], so the
//! runner can rely on every entry having an absolute HTTPS URL and a unique,
//! contained, kebab-case output path.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::NormalizeOptions;

/// One manifest record: what to fetch and where to publish it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(alias = "name")]
    pub logical_name: String,
    #[serde(alias = "url")]
    pub source_url: String,
    #[serde(alias = "output", alias = "out", alias = "file")]
    pub output_filename: String,
}

impl ManifestEntry {
    pub fn new(
        logical_name: impl Into<String>,
        source_url: impl Into<String>,
        output_filename: impl Into<String>,
    ) -> Self {
        Self {
            logical_name: logical_name.into(),
            source_url: source_url.into(),
            output_filename: output_filename.into(),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ManifestError {
    #[error("manifest contains no entries")]
    Empty,
    #[error("line {line}: {message}")]
    Line { line: usize, message: String },
    #[error("entry #{index} ('{name}'): {reason}")]
    InvalidEntry {
        index: usize,
        name: String,
        reason: String,
    },
    #[error("output '{output}' is claimed by '{first}' and '{second}' with different source URLs")]
    DuplicateOutput {
        output: String,
        first: String,
        second: String,
    },
}

/// A structurally valid, de-duplicated manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

static KEBAB_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("static regex"));
static KEBAB_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<stem>[a-z0-9]+(?:-[a-z0-9]+)*)\.(?P<ext>[a-z0-9]+)$").expect("static regex")
});

impl Manifest {
    /// Validate raw entries against the run's output options.
    ///
    /// Exact repeats (same output and URL) are dropped with a warning; the
    /// same output claimed by two different URLs is an error.
    pub fn validate(
        entries: Vec<ManifestEntry>,
        options: &NormalizeOptions,
        allow_http: bool,
    ) -> Result<Self, ManifestError> {
        if entries.is_empty() {
            return Err(ManifestError::Empty);
        }

        let mut claimed: HashMap<String, (String, String)> = HashMap::new();
        let mut kept = Vec::with_capacity(entries.len());

        for (index, raw) in entries.into_iter().enumerate() {
            let entry = ManifestEntry {
                logical_name: raw.logical_name.trim().to_string(),
                source_url: raw.source_url.trim().to_string(),
                output_filename: raw.output_filename.trim().to_string(),
            };
            let invalid = |reason: String| ManifestError::InvalidEntry {
                index: index + 1,
                name: entry.logical_name.clone(),
                reason,
            };

            if entry.logical_name.is_empty() {
                return Err(invalid("logical name is empty".into()));
            }
            check_url(&entry.source_url, allow_http).map_err(invalid)?;
            check_output(&entry.output_filename, options).map_err(invalid)?;

            if let Some((first_name, first_url)) = claimed.get(&entry.output_filename) {
                if *first_url != entry.source_url {
                    return Err(ManifestError::DuplicateOutput {
                        output: entry.output_filename.clone(),
                        first: first_name.clone(),
                        second: entry.logical_name.clone(),
                    });
                }
                warn!(
                    entry = %entry.logical_name,
                    output = %entry.output_filename,
                    first = %first_name,
                    "Dropping exact duplicate manifest entry"
                );
                continue;
            }
            claimed.insert(
                entry.output_filename.clone(),
                (entry.logical_name.clone(), entry.source_url.clone()),
            );
            kept.push(entry);
        }

        debug!(entries = kept.len(), "Manifest validated");
        Ok(Self { entries: kept })
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn check_url(raw: &str, allow_http: bool) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| format!("malformed source URL '{raw}': {e}"))?;
    match url.scheme() {
        "https" => {}
        "http" if allow_http => {}
        other => {
            return Err(format!(
                "source URL '{raw}' must use https (got '{other}')"
            ))
        }
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(format!("source URL '{raw}' has no host"));
    }
    Ok(())
}

fn check_output(output: &str, options: &NormalizeOptions) -> Result<(), String> {
    if output.is_empty() {
        return Err("output filename is empty".into());
    }
    if output.contains('\\') {
        return Err(format!("output '{output}' must use '/' as the path separator"));
    }
    if output.starts_with('/') || output.contains(':') {
        return Err(format!("output '{output}' must be a relative path"));
    }
    let segments: Vec<&str> = output.split('/').collect();
    let (file, dirs) = segments
        .split_last()
        .ok_or_else(|| format!("output '{output}' has no file name"))?;
    for segment in dirs {
        match *segment {
            ".." => return Err(format!("output '{output}' escapes the destination directory")),
            "" | "." => return Err(format!("output '{output}' contains an empty or '.' segment")),
            s if !KEBAB_SEGMENT.is_match(s) => {
                return Err(format!("directory '{s}' in '{output}' is not kebab-case"))
            }
            _ => {}
        }
    }
    if *file == ".." {
        return Err(format!("output '{output}' escapes the destination directory"));
    }
    let caps = KEBAB_FILE.captures(file).ok_or_else(|| {
        format!("file name '{file}' must be kebab-case with an extension, e.g. 'my-tool.png'")
    })?;
    let ext = &caps["ext"];
    if !options.format.extensions().contains(&ext) {
        return Err(format!(
            "extension '.{ext}' does not match output format {} (expected one of: {})",
            options.format,
            options.format.extensions().join(", ")
        ));
    }
    Ok(())
}

/// Parse the newline-delimited `name,url,filename` manifest format.
///
/// Blank lines and lines starting with `#` are skipped; fields are trimmed.
pub fn parse_lines(text: &str) -> Result<Vec<ManifestEntry>, ManifestError> {
    let mut entries = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 3 {
            return Err(ManifestError::Line {
                line: idx + 1,
                message: format!(
                    "expected 'name,url,filename' (3 fields), found {}",
                    fields.len()
                ),
            });
        }
        entries.push(ManifestEntry::new(fields[0], fields[1], fields[2]));
    }
    Ok(entries)
}
