//! # contract: the two capabilities the runner is built around
//!
//! The sync runner never talks to the network or to an image codec directly.
//! It is handed a [`Fetcher`] (bytes from a URL) and an [`ImageProcessor`]
//! (bytes in, normalized bytes out), so either side can be swapped for a fake.
//!
//! ## Interface & Extensibility
//! - [`crate::fetch::HttpFetcher`] is the production [`Fetcher`] (reqwest).
//! - [`crate::normalize::ImageNormalizer`] is the production [`ImageProcessor`] (`image` + `resvg`).
//! - Errors are typed so the runner can decide what to retry: see [`FetchError::is_retryable`].
//!
//! ## Mocking & Testing
//! - Both traits are annotated for `mockall`; the generated `MockFetcher` and
//!   `MockImageProcessor` are exported when the `test-export-mocks` feature is on.

use std::time::Duration;

use async_trait::async_trait;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use thiserror::Error;

use crate::config::{OutputFormat, ResizePolicy, TargetSize};

/// Raw bytes returned by a successful fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchedAsset {
    pub bytes: Vec<u8>,
    /// `Content-Type` reported by the server, if any.
    pub content_type: Option<String>,
}

/// Why a single fetch attempt failed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("server responded with HTTP {status}")]
    Status {
        status: u16,
        /// Parsed `Retry-After` header, when present.
        retry_after: Option<Duration>,
    },
    #[error("failed to read response body: {0}")]
    Body(String),
    #[error("fetch cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

impl FetchError {
    pub fn status(status: u16) -> Self {
        FetchError::Status {
            status,
            retry_after: None,
        }
    }

    /// Timeouts, connection problems, truncated bodies, 5xx and 429 are worth retrying.
    /// Every other client error is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout(_) | FetchError::Connect(_) | FetchError::Body(_) => true,
            FetchError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            FetchError::Cancelled | FetchError::Other(_) => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Trait for fetching one remote asset.
///
/// Implementors perform exactly one attempt per call; retries are layered on
/// top by [`crate::retry::fetch_with_retry`].
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Download the body at `url`. Non-2xx responses must map to [`FetchError::Status`].
    async fn fetch(&self, url: &str) -> Result<FetchedAsset, FetchError>;
}

/// One normalization job: a single output box and encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeSpec {
    pub size: TargetSize,
    pub format: OutputFormat,
    pub preserve_transparency: bool,
    pub resize: ResizePolicy,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum NormalizeError {
    #[error("unsupported source format{}", .0.as_deref().map(|t| format!(" ({t})")).unwrap_or_default())]
    Unsupported(Option<String>),
    #[error("could not decode source image: {0}")]
    Decode(String),
    #[error("could not encode output image: {0}")]
    Encode(String),
}

impl NormalizeError {
    /// Decode-side failures mean the source itself is bad; encode failures are conversion errors.
    pub fn is_source_problem(&self) -> bool {
        matches!(
            self,
            NormalizeError::Unsupported(_) | NormalizeError::Decode(_)
        )
    }
}

/// Trait for turning fetched bytes into a published image.
///
/// Implementations are CPU-bound and synchronous; the runner calls them from
/// tokio's blocking pool.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait ImageProcessor: Send + Sync {
    /// Decode `source` (with an optional server-reported content type), fit it
    /// to `spec` and return the encoded output bytes.
    fn normalize(
        &self,
        source: &[u8],
        content_type: Option<String>,
        spec: &NormalizeSpec,
    ) -> Result<Vec<u8>, NormalizeError>;
}
