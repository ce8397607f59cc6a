//! ComparisonOrchestrator integration tests

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use common::{config, key, Behavior, FakeCapturer};
use visreg_common::{CaptureError, ComparisonStatus, PageType, Viewport, VisregConfig};
use visreg_engine::capture::{CaptureRequest, CapturedImage, Capturer};
use visreg_engine::{
    BaselineStore, ComparisonOrchestrator, IsolationManager, OrchestratorConfig, QueryWindow,
    ReportStore, Scope, SimilarityEngine, ThresholdPolicy,
};

struct Harness {
    _tmp: TempDir,
    capturer: Arc<FakeCapturer>,
    store: Arc<BaselineStore>,
    reports: Arc<ReportStore>,
    orchestrator: ComparisonOrchestrator,
}

async fn harness(tweak: impl FnOnce(&mut VisregConfig)) -> Harness {
    let tmp = TempDir::new().unwrap();
    let mut cfg = config(tmp.path());
    tweak(&mut cfg);

    let capturer = Arc::new(FakeCapturer::new());
    let store = Arc::new(BaselineStore::open(&cfg).await.unwrap());
    let isolation = Arc::new(IsolationManager::open(cfg.artifacts_dir()).await.unwrap());
    let reports = Arc::new(ReportStore::open(cfg.reports_db_path()).unwrap());
    let orchestrator = ComparisonOrchestrator::new(
        capturer.clone(),
        store.clone(),
        SimilarityEngine::new(cfg.similarity.clone()).unwrap(),
        ThresholdPolicy::from_config(&cfg.thresholds, &cfg.recommendation).unwrap(),
        isolation,
        OrchestratorConfig::from_config(&cfg),
    )
    .with_reports(reports.clone());

    Harness {
        _tmp: tmp,
        capturer,
        store,
        reports,
        orchestrator,
    }
}

fn pages(pages: &[PageType]) -> Scope {
    Scope {
        pages: Some(pages.to_vec()),
        viewport: None,
    }
}

#[tokio::test]
async fn test_empty_corpus_yields_missing_baseline() {
    let h = harness(|_| {}).await;
    let scope = Scope {
        pages: Some(vec![PageType::Login]),
        viewport: Some(Viewport::Desktop),
    };

    let session = h.orchestrator.run(&scope, CancellationToken::new()).await.unwrap();
    assert_eq!(session.counts.total, 1);
    assert_eq!(session.counts.missing_baseline, 1);
    assert_eq!(session.counts.passed, 0);
    assert_eq!(session.counts.failed, 0);
    assert_eq!(session.counts.errors, 0);

    let result = &session.results[0];
    assert_eq!(result.status, ComparisonStatus::MissingBaseline);
    assert!(result.scores.is_none());
    // kept for the approval workflow
    assert!(result.screenshot_path.as_ref().unwrap().exists());
    assert!(!session.succeeded());
}

#[tokio::test]
async fn test_unchanged_pages_pass() {
    let h = harness(|_| {}).await;
    let scope = pages(&[PageType::Login, PageType::Orders]);
    h.store
        .generate(h.capturer.as_ref(), scope.pages.as_deref(), None)
        .await
        .unwrap();

    let session = h.orchestrator.run(&scope, CancellationToken::new()).await.unwrap();
    assert_eq!(session.counts.total, 8);
    assert_eq!(session.counts.passed, 8);
    assert_eq!(session.avg_similarity, 100.0);
    assert!(session.succeeded());
    assert!(session.results.iter().all(|r| r.baseline_checksum.is_some()));
}

#[tokio::test]
async fn test_changed_page_fails_with_diff() {
    let h = harness(|_| {}).await;
    let scope = pages(&[PageType::Register]);
    h.store
        .generate(h.capturer.as_ref(), scope.pages.as_deref(), None)
        .await
        .unwrap();

    h.capturer.set_variant(1);
    let session = h.orchestrator.run(&scope, CancellationToken::new()).await.unwrap();
    assert_eq!(session.counts.failed, 4);
    for result in &session.results {
        assert_eq!(result.status, ComparisonStatus::Fail);
        assert_eq!(result.threshold, Some(98.0));
        assert!(result.similarity() < 98.0);
        let diff = result.diff_path.as_ref().unwrap();
        assert!(diff.exists());
        assert!(image::open(diff).is_ok());
    }
}

/// Turns every session's diff directory into a plain file before capturing
struct DiffDirBlocker {
    inner: Arc<FakeCapturer>,
    sessions: PathBuf,
}

#[async_trait]
impl Capturer for DiffDirBlocker {
    async fn capture(&self, request: &CaptureRequest) -> Result<CapturedImage, CaptureError> {
        for entry in std::fs::read_dir(&self.sessions).into_iter().flatten().flatten() {
            let diffs = entry.path().join("diffs");
            if diffs.is_dir() {
                let _ = std::fs::remove_dir_all(&diffs);
                let _ = std::fs::write(&diffs, b"");
            }
        }
        self.inner.capture(request).await
    }
}

#[tokio::test]
async fn test_failure_is_kept_when_diff_cannot_be_written() {
    let tmp = TempDir::new().unwrap();
    let cfg = config(tmp.path());
    let fake = Arc::new(FakeCapturer::new());
    let store = Arc::new(BaselineStore::open(&cfg).await.unwrap());
    let scope = pages(&[PageType::Register]);
    store
        .generate(fake.as_ref(), scope.pages.as_deref(), None)
        .await
        .unwrap();
    fake.set_variant(1);

    let capturer = Arc::new(DiffDirBlocker {
        inner: fake.clone(),
        sessions: cfg.artifacts_dir().join("sessions"),
    });
    let orchestrator = ComparisonOrchestrator::new(
        capturer,
        store,
        SimilarityEngine::new(cfg.similarity.clone()).unwrap(),
        ThresholdPolicy::from_config(&cfg.thresholds, &cfg.recommendation).unwrap(),
        Arc::new(IsolationManager::open(cfg.artifacts_dir()).await.unwrap()),
        OrchestratorConfig::from_config(&cfg),
    );

    let session = orchestrator.run(&scope, CancellationToken::new()).await.unwrap();
    assert_eq!(session.counts.failed, 4);
    assert_eq!(session.counts.errors, 0);
    for result in &session.results {
        assert_eq!(result.status, ComparisonStatus::Fail);
        assert!(result.scores.is_some());
        assert!(result.similarity() < 98.0);
        assert!(result.diff_path.is_none());
        assert!(result.screenshot_path.as_ref().unwrap().exists());
    }
}

#[tokio::test]
async fn test_one_timeout_among_ten_units() {
    let h = harness(|cfg| cfg.capture.unit_timeout_ms = 300).await;
    // 4 + 4 + 2 units
    let scope = pages(&[PageType::Login, PageType::Register, PageType::EnhancedModal]);
    assert_eq!(scope.keys().len(), 10);
    h.store
        .generate(h.capturer.as_ref(), scope.pages.as_deref(), None)
        .await
        .unwrap();

    let slow = key(PageType::Register, Viewport::Tablet);
    h.capturer.script(slow, Behavior::Hang);
    let session = h.orchestrator.run(&scope, CancellationToken::new()).await.unwrap();

    assert_eq!(session.counts.total, 10);
    assert_eq!(session.counts.errors, 1);
    assert_eq!(session.counts.scored(), 9);
    assert_eq!(session.counts.passed, 9);
    let errored = session.results.iter().find(|r| r.key == slow).unwrap();
    assert_eq!(errored.status, ComparisonStatus::Error);
    assert!(errored.error.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_capture_error_is_scoped_to_its_unit() {
    let h = harness(|_| {}).await;
    let scope = pages(&[PageType::Orders]);
    h.store
        .generate(h.capturer.as_ref(), scope.pages.as_deref(), None)
        .await
        .unwrap();

    h.capturer.script(
        key(PageType::Orders, Viewport::Laptop),
        Behavior::Fail(CaptureError::Navigation("connection refused".into())),
    );
    let session = h.orchestrator.run(&scope, CancellationToken::new()).await.unwrap();
    assert_eq!(session.counts.errors, 1);
    assert_eq!(session.counts.passed, 3);
    session.verify().unwrap();
}

#[tokio::test]
async fn test_cancelled_session_is_persisted_incomplete() {
    let h = harness(|cfg| {
        cfg.capture.workers = 1;
        cfg.capture.unit_timeout_ms = 60_000;
    })
    .await;
    let scope = pages(&[PageType::Login]);
    h.store
        .generate(h.capturer.as_ref(), scope.pages.as_deref(), None)
        .await
        .unwrap();

    // Units run in key order on one worker: desktop, laptop, then tablet hangs
    h.capturer.script(key(PageType::Login, Viewport::Tablet), Behavior::Hang);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        trigger.cancel();
    });

    let session = h.orchestrator.run(&scope, cancel).await.unwrap();
    assert!(!session.complete);
    assert_eq!(session.counts.total, 2);
    assert_eq!(session.counts.passed, 2);

    let stored = h.reports.get_session(&session.id).unwrap().unwrap();
    assert!(!stored.complete);
    assert_eq!(stored.results.len(), 2);
}

#[tokio::test]
async fn test_sessions_feed_history() {
    let h = harness(|_| {}).await;
    let scope = pages(&[PageType::Orders]);
    h.store
        .generate(h.capturer.as_ref(), scope.pages.as_deref(), None)
        .await
        .unwrap();

    h.orchestrator.run(&scope, CancellationToken::new()).await.unwrap();
    h.orchestrator.run(&scope, CancellationToken::new()).await.unwrap();

    let history = h.reports.history(1).unwrap();
    assert_eq!(history.len(), 2);
    let scores = h
        .reports
        .scores_for_page(PageType::Orders, QueryWindow::all())
        .unwrap();
    assert_eq!(scores.len(), 8);
    assert!(scores.iter().all(|s| s.passed && s.score == 100.0));

    let recommendation = h.orchestrator.thresholds().recommend(PageType::Orders, &scores);
    assert_eq!(recommendation.sample_size, 8);
    assert_eq!(recommendation.recommended, 97.0);
}
