//! Capture collaborator boundary
//!
//! The engine never renders pages itself. A [`Capturer`] turns a
//! [`CaptureRequest`] (URL, viewport, readiness condition) into PNG bytes.
//! Transient failures are retried by [`RetryingCapturer`] with a bounded
//! exponential backoff before surfacing as a [`CaptureError`].

mod playwright;

pub use playwright::{Browser, PlaywrightCapturer, PlaywrightConfig};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use visreg_common::{BaselineKey, CaptureError, PageType, Readiness, RetryPolicy, Viewport};

/// What to capture
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub key: BaselineKey,
    pub url: String,
    pub viewport: Viewport,
    pub readiness: Readiness,
    /// Sign in at this URL before navigating, for pages behind the login
    pub login_url: Option<String>,
}

impl CaptureRequest {
    /// Request for `key` using its page's URL template and readiness condition
    pub fn for_key(key: BaselineKey, base_url: &str, order_id: u64) -> Self {
        let config = key.page.config();
        Self {
            key,
            url: key.page.url(base_url, order_id),
            viewport: key.viewport,
            readiness: config.readiness,
            login_url: config
                .requires_auth
                .then(|| PageType::Login.url(base_url, order_id)),
        }
    }
}

/// Raw screenshot returned by a capturer
#[derive(Debug, Clone)]
pub struct CapturedImage {
    /// PNG-encoded pixels
    pub bytes: Vec<u8>,
    /// Actual rendered dimensions
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

#[async_trait]
pub trait Capturer: Send + Sync {
    async fn capture(&self, request: &CaptureRequest) -> Result<CapturedImage, CaptureError>;
}

#[async_trait]
impl<C: Capturer + ?Sized> Capturer for Arc<C> {
    async fn capture(&self, request: &CaptureRequest) -> Result<CapturedImage, CaptureError> {
        (**self).capture(request).await
    }
}

/// Retries transient capture failures; never loops more than `max_attempts` times
pub struct RetryingCapturer<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: Capturer> RetryingCapturer<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<C: Capturer> Capturer for RetryingCapturer<C> {
    async fn capture(&self, request: &CaptureRequest) -> Result<CapturedImage, CaptureError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.inner.capture(request).await {
                Ok(image) => return Ok(image),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(
                        key = %request.key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transient capture failure: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!(key = %request.key, attempt, "Capture failed: {}", e);
                    return Err(e);
                }
            }
        }
    }
}
