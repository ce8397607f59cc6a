//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use visreg_common::config::LockConfig;
use visreg_common::{BaselineKey, CaptureError, PageType, RetryPolicy, Viewport, VisregConfig};
use visreg_engine::capture::{CaptureRequest, CapturedImage, Capturer};
use visreg_engine::similarity::encode_png;

pub const WIDTH: u32 = 32;
pub const HEIGHT: u32 = 24;

/// Scripted behaviour for one (page, viewport)
#[derive(Debug, Clone)]
pub enum Behavior {
    Fail(CaptureError),
    Hang,
}

/// Deterministic in-memory capture collaborator. Each key renders a
/// distinct synthetic page; bumping the variant changes every rendering.
#[derive(Default)]
pub struct FakeCapturer {
    variant: AtomicU8,
    scripted: Mutex<HashMap<BaselineKey, Behavior>>,
    calls: AtomicUsize,
}

impl FakeCapturer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_variant(&self, variant: u8) {
        self.variant.store(variant, Ordering::SeqCst);
    }

    pub fn script(&self, key: BaselineKey, behavior: Behavior) {
        self.scripted.lock().insert(key, behavior);
    }

    pub fn clear(&self) {
        self.scripted.lock().clear();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Capturer for FakeCapturer {
    async fn capture(&self, request: &CaptureRequest) -> Result<CapturedImage, CaptureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.scripted.lock().get(&request.key).cloned();
        match behavior {
            Some(Behavior::Fail(e)) => return Err(e),
            Some(Behavior::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            None => {}
        }

        let img = render(request.key, self.variant.load(Ordering::SeqCst));
        Ok(CapturedImage {
            bytes: encode_png(&img).map_err(|e| CaptureError::Process(e.to_string()))?,
            width: img.width(),
            height: img.height(),
            captured_at: Utc::now(),
        })
    }
}

/// Synthetic page: a key-specific block pattern; odd variants are inverted
pub fn render(key: BaselineKey, variant: u8) -> RgbaImage {
    let page = PageType::ALL.iter().position(|p| *p == key.page).unwrap_or(0) as u32;
    let viewport = Viewport::ALL.iter().position(|v| *v == key.viewport).unwrap_or(0) as u32;
    RgbaImage::from_fn(WIDTH, HEIGHT, |x, y| {
        let block = ((x / 4) + (y / 4) + page + viewport) % 2;
        let base = if block == 0 { 230u8 } else { 40u8 };
        let tint = (page * 30 + viewport * 10) as u8;
        let (r, g, b) = (base, base.saturating_sub(tint), base / 2 + tint / 2);
        if variant % 2 == 1 {
            Rgba([255 - r, 255 - g, 255 - b, 255])
        } else {
            Rgba([r, g, b, 255])
        }
    })
}

pub fn config(root: &Path) -> VisregConfig {
    let mut config = VisregConfig::default();
    config.root = root.to_path_buf();
    config.backup_before_generate = false;
    config.capture.workers = 4;
    config.capture.unit_timeout_ms = 5_000;
    config.store_lock = LockConfig {
        stale_after_secs: 300,
        retry: RetryPolicy {
            max_attempts: 200,
            base_backoff_ms: 5,
            max_backoff_ms: 20,
        },
    };
    config
}

pub fn key(page: PageType, viewport: Viewport) -> BaselineKey {
    BaselineKey::new(page, viewport)
}

/// Every file in `dir` with its bytes, sorted by name
pub fn snapshot(dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<(String, Vec<u8>)> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.is_file())
        .map(|p| {
            (
                p.file_name().unwrap().to_string_lossy().to_string(),
                std::fs::read(&p).unwrap(),
            )
        })
        .collect();
    files.sort();
    files
}
