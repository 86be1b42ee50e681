// End-to-end run through the real reqwest fetcher against a local HTTP server.
mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use asset_sync_core::cancel::CancelSignal;
use asset_sync_core::config::{SyncConfig, TargetSize};
use asset_sync_core::fetch::HttpFetcher;
use asset_sync_core::manifest::ManifestEntry;
use asset_sync_core::normalize::ImageNormalizer;
use asset_sync_core::report::FailureKind;
use asset_sync_core::retry::RetryPolicy;
use asset_sync_core::synchronise::synchronise;

/// `/flaky.png` answers 503 twice then the logo, `/docker.svg` always answers
/// the logo, everything else is 404. Returns the base URL and the hit counter.
async fn serve_logos() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let flaky_hits = Arc::new(AtomicUsize::new(0));
    let hits = Arc::clone(&flaky_hits);
    let png = support::png_asset(20, 20).bytes;

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let hits = Arc::clone(&hits);
            let png = png.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let mut request = Vec::new();
                loop {
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                    if request.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let head = String::from_utf8_lossy(&request);
                let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();

                let (status, content_type, body): (&str, &str, Vec<u8>) = match path.as_str() {
                    "/docker.svg" => (
                        "200 OK",
                        "image/svg+xml",
                        support::DOCKER_SVG.as_bytes().to_vec(),
                    ),
                    "/flaky.png" if hits.fetch_add(1, Ordering::SeqCst) < 2 => {
                        ("503 Service Unavailable", "text/plain", Vec::new())
                    }
                    "/flaky.png" => ("200 OK", "image/png", png),
                    _ => ("404 Not Found", "text/plain", Vec::new()),
                };
                let header = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = socket.write_all(header.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (format!("http://{addr}"), flaky_hits)
}

#[tokio::test]
async fn test_http_run_with_retry_and_missing_asset() {
    let (base, flaky_hits) = serve_logos().await;
    let dest = tempdir().unwrap();

    let mut config = SyncConfig::new(dest.path());
    config.options.sizes = vec![TargetSize::new(32, 32)];
    config.retry = RetryPolicy::no_delay(3);
    config.allow_http = true;

    let entries = vec![
        ManifestEntry::new("docker", format!("{base}/docker.svg"), "docker.png"),
        ManifestEntry::new("flaky", format!("{base}/flaky.png"), "flaky.png"),
        ManifestEntry::new("bad", format!("{base}/missing.svg"), "bad.png"),
    ];

    let fetcher = HttpFetcher::new(Duration::from_secs(5)).expect("client builds");
    let summary = synchronise(
        &config,
        entries,
        &fetcher,
        Arc::new(ImageNormalizer::default()),
        &CancelSignal::new(),
    )
    .await
    .expect("run should start");

    assert_eq!(summary.to_string(), "2 succeeded, 1 failed");
    assert_eq!(summary.results[1].attempts, 3);
    assert_eq!(flaky_hits.load(Ordering::SeqCst), 3);
    assert_eq!(summary.results[2].failure, Some(FailureKind::Fetch));
    assert_eq!(summary.results[2].attempts, 1);

    for file in ["docker.png", "flaky.png"] {
        let img = image::open(dest.path().join(file)).unwrap();
        assert_eq!((img.width(), img.height()), (32, 32), "{file}");
    }
    assert!(!dest.path().join("bad.png").exists());
}
