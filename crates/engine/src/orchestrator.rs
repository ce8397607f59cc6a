//! Session orchestration
//!
//! Each (page, viewport) unit moves through
//! `CAPTURED -> {MISSING_BASELINE | SCORED} -> {PASS | FAIL}`, or ends in
//! `ERROR` when capture or decoding fails. Units run on a bounded worker
//! pool and a failing unit only ever affects its own result. The per-unit
//! deadline bounds capture, retries included; scoring and the diff of a
//! failing unit run after it.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use image::RgbaImage;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use visreg_common::{
    BaselineKey, CaptureError, ComparisonResult, ComparisonStatus, Error, PageType, Result,
    TestSession, Viewport, VisregConfig,
};

use crate::baseline::BaselineStore;
use crate::capture::{CaptureRequest, Capturer};
use crate::isolation::{IsolationManager, SessionHandle};
use crate::report::ReportStore;
use crate::similarity::{decode, SimilarityEngine};
use crate::threshold::ThresholdPolicy;

/// Which (page, viewport) pairs a session covers; `None` means all
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub pages: Option<Vec<PageType>>,
    pub viewport: Option<Viewport>,
}

impl Scope {
    pub fn keys(&self) -> Vec<BaselineKey> {
        BaselineKey::scope(self.pages.as_deref(), self.viewport)
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub base_url: String,
    pub fixture_order_id: u64,
    pub workers: usize,
    pub unit_timeout: Duration,
}

impl OrchestratorConfig {
    pub fn from_config(config: &VisregConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            fixture_order_id: config.fixture_order_id,
            workers: config.capture.workers.max(1),
            unit_timeout: Duration::from_millis(config.capture.unit_timeout_ms),
        }
    }
}

pub struct ComparisonOrchestrator {
    capturer: Arc<dyn Capturer>,
    store: Arc<BaselineStore>,
    engine: SimilarityEngine,
    thresholds: ThresholdPolicy,
    isolation: Arc<IsolationManager>,
    reports: Option<Arc<ReportStore>>,
    config: OrchestratorConfig,
}

impl ComparisonOrchestrator {
    pub fn new(
        capturer: Arc<dyn Capturer>,
        store: Arc<BaselineStore>,
        engine: SimilarityEngine,
        thresholds: ThresholdPolicy,
        isolation: Arc<IsolationManager>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            capturer,
            store,
            engine,
            thresholds,
            isolation,
            reports: None,
            config,
        }
    }

    /// Persist every finished session, complete or not, to `reports`
    pub fn with_reports(mut self, reports: Arc<ReportStore>) -> Self {
        self.reports = Some(reports);
        self
    }

    pub fn thresholds(&self) -> &ThresholdPolicy {
        &self.thresholds
    }

    /// Run one session over `scope`. Cancelling `cancel` stops scheduling
    /// and abandons in-flight units; the results already finished are kept
    /// and the session is marked incomplete.
    pub async fn run(&self, scope: &Scope, cancel: CancellationToken) -> Result<TestSession> {
        let handle = self.isolation.acquire_session().await?;
        let keys = scope.keys();
        let total = keys.len();
        info!(
            session = %handle.id,
            units = total,
            workers = self.config.workers,
            "Starting comparison session"
        );

        let mut units = stream::iter(keys)
            .map(|key| self.run_unit(&handle, key))
            .buffer_unordered(self.config.workers);

        let mut results = Vec::with_capacity(total);
        let mut complete = true;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(
                        session = %handle.id,
                        finished = results.len(),
                        total,
                        "Session cancelled"
                    );
                    complete = false;
                    break;
                }
                next = units.next() => match next {
                    Some(result) => results.push(result),
                    None => break,
                },
            }
        }
        drop(units);

        let session = TestSession::from_results(
            handle.id.clone(),
            handle.started_at,
            Utc::now(),
            complete,
            results,
        );
        session.verify()?;

        info!(
            session = %session.id,
            total = session.counts.total,
            passed = session.counts.passed,
            failed = session.counts.failed,
            errors = session.counts.errors,
            missing = session.counts.missing_baseline,
            avg_similarity = session.avg_similarity,
            complete = session.complete,
            "Session finished"
        );

        if let Some(reports) = &self.reports {
            reports.persist(&session)?;
        }
        Ok(session)
    }

    async fn run_unit(&self, session: &SessionHandle, key: BaselineKey) -> ComparisonResult {
        let start = Instant::now();
        let outcome = self.evaluate(session, key).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(mut result) => {
                result.duration_ms = duration_ms;
                debug!(
                    key = %key,
                    status = result.status.as_str(),
                    similarity = result.similarity(),
                    "Unit finished"
                );
                result
            }
            Err(e) => {
                warn!(key = %key, "Unit failed: {}", e);
                ComparisonResult {
                    key,
                    status: ComparisonStatus::Error,
                    scores: None,
                    threshold: Some(self.thresholds.get(key.page)),
                    baseline_checksum: None,
                    screenshot_path: None,
                    diff_path: None,
                    error: Some(e.to_string()),
                    duration_ms,
                    timestamp: Utc::now(),
                }
            }
        }
    }

    async fn evaluate(&self, session: &SessionHandle, key: BaselineKey) -> Result<ComparisonResult> {
        let request = CaptureRequest::for_key(key, &self.config.base_url, self.config.fixture_order_id);
        let captured = tokio::time::timeout(self.config.unit_timeout, self.capturer.capture(&request))
            .await
            .map_err(|_| CaptureError::Timeout {
                ms: self.config.unit_timeout.as_millis() as u64,
            })??;

        let screenshot_path = session.screenshot_path(&key);
        fs::write(&screenshot_path, &captured.bytes).await?;

        let threshold = self.thresholds.get(key.page);
        let mut result = ComparisonResult {
            key,
            status: ComparisonStatus::MissingBaseline,
            scores: None,
            threshold: Some(threshold),
            baseline_checksum: None,
            screenshot_path: Some(screenshot_path),
            diff_path: None,
            error: None,
            duration_ms: 0,
            timestamp: captured.captured_at,
        };

        let baseline = match self.store.require_baseline(key).await {
            Ok(baseline) => baseline,
            Err(e @ Error::MissingBaseline(_)) => {
                info!(key = %key, "{}, awaiting approval", e);
                return Ok(result);
            }
            Err(e) => return Err(e),
        };
        result.baseline_checksum = Some(baseline.checksum);

        let engine = self.engine.clone();
        let candidate_bytes = captured.bytes;
        let baseline_bytes = baseline.bytes;
        let (scores, reference, candidate) = tokio::task::spawn_blocking(move || {
            let reference = decode(&baseline_bytes)?;
            let candidate = decode(&candidate_bytes)?;
            let scores = engine.compare(&reference, &candidate)?;
            Ok::<_, Error>((scores, reference, candidate))
        })
        .await
        .map_err(|e| Error::Internal(format!("scoring task failed: {}", e)))??;

        result.scores = Some(scores);
        result.status = self.thresholds.judge(key.page, scores.composite);

        if result.status == ComparisonStatus::Fail {
            info!(
                "{}",
                Error::ThresholdViolation {
                    key: key.to_string(),
                    score: scores.composite,
                    threshold,
                }
            );
            match self.write_diff(session, key, reference, candidate).await {
                Ok(diff_path) => result.diff_path = Some(diff_path),
                Err(e) => warn!(key = %key, "Keeping failure without a diff image: {}", e),
            }
        }

        Ok(result)
    }

    async fn write_diff(
        &self,
        session: &SessionHandle,
        key: BaselineKey,
        reference: RgbaImage,
        candidate: RgbaImage,
    ) -> Result<PathBuf> {
        let engine = self.engine.clone();
        let diff = tokio::task::spawn_blocking(move || engine.diff(&reference, &candidate)?.to_png())
            .await
            .map_err(|e| Error::Internal(format!("diff task failed: {}", e)))??;
        let diff_path = session.diff_path(&key);
        fs::write(&diff_path, diff).await?;
        Ok(diff_path)
    }
}
