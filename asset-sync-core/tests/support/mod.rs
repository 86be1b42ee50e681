// Shared fixtures for the asset-sync-core integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use image::{ImageFormat, Rgba, RgbaImage};

use asset_sync_core::contract::{FetchError, FetchedAsset, Fetcher};

pub const DOCKER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="48" height="24" viewBox="0 0 48 24">
  <rect x="2" y="4" width="44" height="16" rx="3" fill="#2496ED"/>
</svg>"##;

pub fn svg_asset() -> FetchedAsset {
    FetchedAsset {
        bytes: DOCKER_SVG.as_bytes().to_vec(),
        content_type: Some("image/svg+xml".into()),
    }
}

/// A small PNG with a transparent border around an opaque square.
pub fn png_asset(width: u32, height: u32) -> FetchedAsset {
    let mut img = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));
    for y in height / 4..height * 3 / 4 {
        for x in width / 4..width * 3 / 4 {
            img.put_pixel(x, y, Rgba([200, 30, 30, 255]));
        }
    }
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode fixture png");
    FetchedAsset {
        bytes,
        content_type: Some("image/png".into()),
    }
}

/// In-memory [`Fetcher`] with scripted replies per URL.
///
/// Each URL replays its script in order and keeps repeating the last reply.
/// Unknown URLs answer 404. Every call is counted and the peak number of
/// concurrent calls is tracked.
#[derive(Default)]
pub struct FakeFetcher {
    scripts: Mutex<HashMap<String, Vec<Result<FetchedAsset, FetchError>>>>,
    calls: Mutex<HashMap<String, usize>>,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn reply(self, url: &str, reply: Result<FetchedAsset, FetchError>) -> Self {
        self.script(url, vec![reply])
    }

    pub fn script(self, url: &str, replies: Vec<Result<FetchedAsset, FetchError>>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), replies);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset, FetchError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(url.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let scripts = self.scripts.lock().unwrap();
        match scripts.get(url) {
            Some(replies) if !replies.is_empty() => {
                let idx = (call - 1).min(replies.len() - 1);
                replies[idx].clone()
            }
            _ => Err(FetchError::status(404)),
        }
    }
}
