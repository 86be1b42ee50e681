use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::retry::RetryPolicy;

/// Default number of entries processed at the same time.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Default bounding box when no size is configured.
pub const DEFAULT_SIZE: TargetSize = TargetSize {
    width: 64,
    height: 64,
};

/// A pixel bounding box, written as `WxH` on the command line and in config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

impl TargetSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for TargetSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for TargetSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("size '{s}' must look like WxH, e.g. 32x32"))?;
        let width: u32 = w
            .trim()
            .parse()
            .map_err(|e| format!("invalid width in size '{s}': {e}"))?;
        let height: u32 = h
            .trim()
            .parse()
            .map_err(|e| format!("invalid height in size '{s}': {e}"))?;
        if width == 0 || height == 0 {
            return Err(format!("size '{s}' must have non-zero width and height"));
        }
        Ok(Self { width, height })
    }
}

impl TryFrom<String> for TargetSize {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TargetSize> for String {
    fn from(size: TargetSize) -> Self {
        size.to_string()
    }
}

/// Encodings the normalizer can publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    #[serde(alias = "jpg")]
    Jpeg,
    Webp,
}

impl OutputFormat {
    /// File extensions accepted for `output_filename` when publishing in this format.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            OutputFormat::Png => &["png"],
            OutputFormat::Jpeg => &["jpg", "jpeg"],
            OutputFormat::Webp => &["webp"],
        }
    }

    pub fn supports_alpha(self) -> bool {
        !matches!(self, OutputFormat::Jpeg)
    }

    pub fn image_format(self) -> image::ImageFormat {
        match self {
            OutputFormat::Png => image::ImageFormat::Png,
            OutputFormat::Jpeg => image::ImageFormat::Jpeg,
            OutputFormat::Webp => image::ImageFormat::WebP,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Webp => "webp",
        };
        f.write_str(name)
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(OutputFormat::Png),
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            "webp" => Ok(OutputFormat::Webp),
            other => Err(format!(
                "unsupported output format '{other}' (expected png, jpeg or webp)"
            )),
        }
    }
}

/// How a source whose aspect ratio differs from the target box is mapped onto it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizePolicy {
    /// Scale to fit inside the box and pad the remainder (transparent when possible).
    #[default]
    Fit,
    /// Scale to cover the box and crop the overflow around the centre.
    Fill,
    /// Scale each axis independently to the exact box.
    Stretch,
}

impl FromStr for ResizePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fit" | "pad" => Ok(ResizePolicy::Fit),
            "fill" | "cover" | "crop" => Ok(ResizePolicy::Fill),
            "stretch" => Ok(ResizePolicy::Stretch),
            other => Err(format!(
                "unsupported resize policy '{other}' (expected fit, fill or stretch)"
            )),
        }
    }
}

/// Normalization settings applied to every entry of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizeOptions {
    pub sizes: Vec<TargetSize>,
    pub format: OutputFormat,
    pub preserve_transparency: bool,
    pub resize: ResizePolicy,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            sizes: vec![DEFAULT_SIZE],
            format: OutputFormat::Png,
            preserve_transparency: true,
            resize: ResizePolicy::Fit,
        }
    }
}

impl NormalizeOptions {
    /// Relative output paths for one entry, one per configured size.
    ///
    /// A single size publishes to `output_filename` itself; several sizes get a
    /// `-WxH` suffix on the file stem so they never collide.
    pub fn outputs_for(&self, output_filename: &str) -> Vec<(TargetSize, String)> {
        if self.sizes.len() <= 1 {
            let size = self.sizes.first().copied().unwrap_or(DEFAULT_SIZE);
            return vec![(size, output_filename.to_string())];
        }
        let (stem, ext) = match output_filename.rsplit_once('.') {
            Some((stem, ext)) => (stem, Some(ext)),
            None => (output_filename, None),
        };
        self.sizes
            .iter()
            .map(|size| {
                let name = match ext {
                    Some(ext) => format!("{stem}-{size}.{ext}"),
                    None => format!("{stem}-{size}"),
                };
                (*size, name)
            })
            .collect()
    }
}

/// Everything one `synchronise` run needs besides the manifest and the injected capabilities.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Directory the normalized assets are published into. Created if absent.
    pub destination: PathBuf,
    /// Upper bound on entries in flight at once.
    pub concurrency: usize,
    pub options: NormalizeOptions,
    pub retry: RetryPolicy,
    /// Whole-run deadline; when it expires remaining work is cancelled.
    pub run_timeout: Option<Duration>,
    /// Accept plain `http://` sources (local mirrors, tests).
    pub allow_http: bool,
}

impl SyncConfig {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
            concurrency: DEFAULT_CONCURRENCY,
            options: NormalizeOptions::default(),
            retry: RetryPolicy::default(),
            run_timeout: None,
            allow_http: false,
        }
    }

    pub fn trace_loaded(&self) {
        info!(
            destination = %self.destination.display(),
            concurrency = self.concurrency,
            format = %self.options.format,
            sizes = ?self.options.sizes,
            retries = self.retry.max_retries,
            "Loaded sync config"
        );
        debug!(?self, "Sync config loaded (full debug)");
    }
}
