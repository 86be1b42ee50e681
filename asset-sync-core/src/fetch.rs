//! reqwest-backed [`Fetcher`].
//!
//! Proxies from `HTTP_PROXY` / `HTTPS_PROXY` / `NO_PROXY` are picked up by
//! reqwest's default client configuration.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::Client;
use tracing::{debug, error};

use crate::contract::{FetchError, FetchedAsset, Fetcher};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Logos are small; anything past this is refused rather than buffered.
pub const DEFAULT_MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

pub struct HttpFetcher {
    client: Client,
    max_body_bytes: usize,
}

impl HttpFetcher {
    /// Build a client with a per-request timeout covering connect, headers and body.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .user_agent(concat!("sync-assets/", env!("CARGO_PKG_VERSION")))
            .build()?;
        debug!(timeout_ms = timeout.as_millis() as u64, "Initialized HTTP fetcher");
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }
}

fn classify(err: &reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(err.to_string())
    } else if err.is_builder() {
        FetchError::Other(format!("invalid request: {err}"))
    } else if err.is_connect() || err.is_request() {
        FetchError::Connect(err.to_string())
    } else if err.is_body() || err.is_decode() {
        FetchError::Body(err.to_string())
    } else {
        FetchError::Other(err.to_string())
    }
}

fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset, FetchError> {
        debug!(url, "Sending GET request");
        let mut response = self.client.get(url).send().await.map_err(|e| {
            error!(url, error = %e, "HTTP request failed");
            classify(&e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            error!(url, status = status.as_u16(), "Server returned non-success status");
            return Err(FetchError::Status {
                status: status.as_u16(),
                retry_after,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        if let Some(len) = response.content_length() {
            if len as usize > self.max_body_bytes {
                return Err(FetchError::Other(format!(
                    "response of {len} bytes exceeds limit of {} bytes",
                    self.max_body_bytes
                )));
            }
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            error!(url, error = %e, "Failed while reading response body");
            classify(&e)
        })? {
            if bytes.len() + chunk.len() > self.max_body_bytes {
                return Err(FetchError::Other(format!(
                    "response body exceeds limit of {} bytes",
                    self.max_body_bytes
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        debug!(url, bytes = bytes.len(), content_type = ?content_type, "Downloaded body");
        Ok(FetchedAsset {
            bytes,
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves `response` verbatim to every connection and returns the base URL.
    async fn serve(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let mut read = Vec::new();
                    loop {
                        let n = socket.read(&mut buf).await.unwrap_or(0);
                        if n == 0 {
                            break;
                        }
                        read.extend_from_slice(&buf[..n]);
                        if read.windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{addr}")
    }

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(Duration::from_secs(5)).expect("client builds")
    }

    #[tokio::test]
    async fn ok_response_returns_body_and_content_type() {
        let base = serve(
            "HTTP/1.1 200 OK\r\nContent-Type: image/svg+xml\r\nContent-Length: 5\r\nConnection: close\r\n\r\n<svg>",
        )
        .await;
        let asset = fetcher()
            .fetch(&format!("{base}/logo.svg"))
            .await
            .expect("200 should succeed");
        assert_eq!(asset.bytes, b"<svg>");
        assert_eq!(asset.content_type.as_deref(), Some("image/svg+xml"));
    }

    #[tokio::test]
    async fn not_found_maps_to_status() {
        let base =
            serve("HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
        let err = fetcher()
            .fetch(&format!("{base}/missing.svg"))
            .await
            .expect_err("404 should fail");
        assert_eq!(err, FetchError::status(404));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn unavailable_carries_retry_after() {
        let base = serve(
            "HTTP/1.1 503 Service Unavailable\r\nRetry-After: 2\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let err = fetcher()
            .fetch(&format!("{base}/busy.png"))
            .await
            .expect_err("503 should fail");
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn oversized_body_is_refused() {
        let base = serve(
            "HTTP/1.1 200 OK\r\nContent-Length: 10\r\nConnection: close\r\n\r\n0123456789",
        )
        .await;
        let err = fetcher()
            .max_body_bytes(4)
            .fetch(&format!("{base}/big.png"))
            .await
            .expect_err("body over the limit");
        assert!(matches!(err, FetchError::Other(_)));
    }

    #[tokio::test]
    async fn refused_connection_is_retryable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = fetcher()
            .fetch(&format!("http://{addr}/logo.png"))
            .await
            .expect_err("nothing is listening");
        assert!(err.is_retryable(), "unexpected classification: {err:?}");
    }
}
