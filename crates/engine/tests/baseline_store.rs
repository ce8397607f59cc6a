//! BaselineStore integration tests
//!
//! Drives generate/backup/restore/list/compare/clean against a temporary
//! workspace with a scripted capture collaborator.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tempfile::TempDir;

use common::{config, key, snapshot, Behavior, FakeCapturer};
use visreg_common::{BaselineKey, CaptureError, Error, PageType, Viewport};
use visreg_engine::baseline::{BaselineStore, CorpusMetadata, EntryChange, CURRENT};

#[tokio::test]
async fn test_generate_writes_images_and_metadata() {
    let tmp = TempDir::new().unwrap();
    let store = BaselineStore::open(&config(tmp.path())).await.unwrap();
    let capturer = FakeCapturer::new();

    let report = store
        .generate(&capturer, Some(&[PageType::Login]), None)
        .await
        .unwrap();
    assert!(report.succeeded());
    assert_eq!(report.created(), 4);
    assert!(report.backup.is_none());

    for viewport in Viewport::ALL {
        assert!(store
            .baseline_dir()
            .join(key(PageType::Login, viewport).file_name())
            .exists());
    }

    let metadata = CorpusMetadata::load(store.baseline_dir()).await.unwrap().unwrap();
    assert_eq!(metadata.entries.len(), 4);
    assert_eq!(metadata.viewports.len(), 4);
    let module = &metadata.modules["login"];
    assert!(module.success);
    assert_eq!(module.baselines_created, 4);
    assert_eq!(module.name, "Login Page");
    assert_eq!(metadata.server_url, "http://localhost:8000");
}

#[tokio::test]
async fn test_generate_isolates_module_failures() {
    let tmp = TempDir::new().unwrap();
    let store = BaselineStore::open(&config(tmp.path())).await.unwrap();
    let capturer = FakeCapturer::new();
    capturer.script(
        key(PageType::Orders, Viewport::Mobile),
        Behavior::Fail(CaptureError::ElementNotFound("table".into())),
    );

    let report = store
        .generate(&capturer, Some(&[PageType::Login, PageType::Orders]), None)
        .await
        .unwrap();
    assert!(!report.succeeded());
    assert_eq!(report.created(), 7);
    assert_eq!(report.failed(), 1);

    let orders = report.modules.iter().find(|m| m.page == PageType::Orders).unwrap();
    assert_eq!(orders.errors.len(), 1);
    assert_eq!(orders.errors[0].0, Viewport::Mobile);

    let metadata = CorpusMetadata::load(store.baseline_dir()).await.unwrap().unwrap();
    assert!(metadata.modules["login"].success);
    assert!(!metadata.modules["orders"].success);
    assert!(metadata.modules["orders"].error.as_deref().unwrap().contains("mobile"));
    assert!(!store
        .baseline_dir()
        .join(key(PageType::Orders, Viewport::Mobile).file_name())
        .exists());
}

#[tokio::test]
async fn test_backup_then_restore_is_byte_for_byte() {
    let tmp = TempDir::new().unwrap();
    let store = BaselineStore::open(&config(tmp.path())).await.unwrap();
    let capturer = FakeCapturer::new();

    store
        .generate(&capturer, Some(&[PageType::Login, PageType::Orders]), None)
        .await
        .unwrap();
    let before = snapshot(store.baseline_dir());
    let version = store.backup(Some("v1")).await.unwrap();
    assert_eq!(version.baseline_count, 8);

    capturer.set_variant(1);
    store
        .generate(&capturer, Some(&[PageType::Login, PageType::Register]), None)
        .await
        .unwrap();
    assert_ne!(snapshot(store.baseline_dir()), before);

    store.restore("v1").await.unwrap();
    assert_eq!(snapshot(store.baseline_dir()), before);
}

#[tokio::test]
async fn test_duplicate_and_missing_versions() {
    let tmp = TempDir::new().unwrap();
    let store = BaselineStore::open(&config(tmp.path())).await.unwrap();

    store.backup(Some("release")).await.unwrap();
    assert!(matches!(
        store.backup(Some("release")).await,
        Err(Error::VersionExists(name)) if name == "release"
    ));
    assert!(matches!(
        store.restore("nope").await,
        Err(Error::VersionNotFound(name)) if name == "nope"
    ));
    assert!(matches!(
        store.compare("nope", CURRENT).await,
        Err(Error::VersionNotFound(_))
    ));
}

#[tokio::test]
async fn test_clean_keeps_most_recent() {
    let tmp = TempDir::new().unwrap();
    let store = BaselineStore::open(&config(tmp.path())).await.unwrap();
    for name in ["a", "b", "c", "d", "e"] {
        store.backup(Some(name)).await.unwrap();
    }

    assert!(store.clean(10).await.unwrap().is_empty());
    assert_eq!(store.list().await.unwrap().len(), 5);

    let removed = store.clean(2).await.unwrap();
    assert_eq!(removed, vec!["a", "b", "c"]);
    let remaining: Vec<String> = store.list().await.unwrap().into_iter().map(|v| v.name).collect();
    assert_eq!(remaining, vec!["d", "e"]);

    store.clean(0).await.unwrap();
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_orders_auto_named_versions() {
    let tmp = TempDir::new().unwrap();
    let store = BaselineStore::open(&config(tmp.path())).await.unwrap();

    let first = store.backup(None).await.unwrap();
    let second = store.backup(None).await.unwrap();
    assert!(first.name.starts_with("backup_"));
    assert_ne!(first.name, second.name);

    let listed = store.list().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].name, first.name);
    assert_eq!(listed[1].name, second.name);
    assert!(listed[0].sequence < listed[1].sequence);
}

#[tokio::test]
async fn test_compare_reports_added_removed_changed() {
    let tmp = TempDir::new().unwrap();
    let store = BaselineStore::open(&config(tmp.path())).await.unwrap();
    let capturer = FakeCapturer::new();

    store
        .generate(&capturer, Some(&[PageType::Login]), None)
        .await
        .unwrap();
    store.backup(Some("before")).await.unwrap();

    capturer.set_variant(1);
    store
        .generate(&capturer, Some(&[PageType::Login]), Some(Viewport::Desktop))
        .await
        .unwrap();
    store
        .generate(&capturer, Some(&[PageType::Register]), Some(Viewport::Desktop))
        .await
        .unwrap();

    let comparison = store.compare("before", CURRENT).await.unwrap();
    assert_eq!(comparison.entries.len(), 5);
    let change = |k: BaselineKey| {
        comparison
            .entries
            .iter()
            .find(|e| e.key == k)
            .map(|e| e.change.clone())
            .unwrap()
    };
    match change(key(PageType::Login, Viewport::Desktop)) {
        EntryChange::Changed { scores } => assert!(scores.composite < 100.0),
        other => panic!("expected change, got {:?}", other),
    }
    assert_eq!(change(key(PageType::Login, Viewport::Mobile)), EntryChange::Identical);
    assert_eq!(change(key(PageType::Register, Viewport::Desktop)), EntryChange::Added);

    let reversed = store.compare(CURRENT, "before").await.unwrap();
    assert_eq!(reversed.count(|c| *c == EntryChange::Removed), 1);
    assert_eq!(reversed.count(|c| *c == EntryChange::Identical), 3);
}

#[tokio::test]
async fn test_concurrent_disjoint_generates_keep_metadata_consistent() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(BaselineStore::open(&config(tmp.path())).await.unwrap());
    let capturer = Arc::new(FakeCapturer::new());

    let (a, b) = tokio::join!(
        store.generate(capturer.as_ref(), Some(&[PageType::Login]), None),
        store.generate(capturer.as_ref(), Some(&[PageType::Orders]), None),
    );
    assert!(a.unwrap().succeeded());
    assert!(b.unwrap().succeeded());

    let metadata = CorpusMetadata::load(store.baseline_dir()).await.unwrap().unwrap();
    assert_eq!(metadata.entries.len(), 8);
    assert!(metadata.modules.contains_key("login"));
    assert!(metadata.modules.contains_key("orders"));
}

#[tokio::test]
async fn test_separate_handles_serialise_through_lock_file() {
    let tmp = TempDir::new().unwrap();
    let first = BaselineStore::open(&config(tmp.path())).await.unwrap();
    let second = BaselineStore::open(&config(tmp.path())).await.unwrap();
    let capturer = FakeCapturer::new();

    let (a, b) = tokio::join!(
        first.generate(&capturer, Some(&[PageType::Register]), None),
        second.generate(&capturer, Some(&[PageType::OrderCreate]), None),
    );
    a.unwrap();
    b.unwrap();

    let metadata = CorpusMetadata::load(first.baseline_dir()).await.unwrap().unwrap();
    assert_eq!(metadata.entries.len(), 8);
    assert_eq!(metadata.modules.len(), 2);
    assert!(!tmp.path().join(".baseline.lock").exists());
}

#[tokio::test]
async fn test_generate_backs_up_previous_corpus() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = config(tmp.path());
    cfg.backup_before_generate = true;
    let store = BaselineStore::open(&cfg).await.unwrap();
    let capturer = FakeCapturer::new();

    let first = store
        .generate(&capturer, Some(&[PageType::Login]), None)
        .await
        .unwrap();
    assert!(first.backup.is_none(), "empty corpus is not backed up");

    let second = store
        .generate(&capturer, Some(&[PageType::Login]), None)
        .await
        .unwrap();
    let backup = second.backup.unwrap();
    assert!(backup.starts_with("backup_"));
    assert_eq!(store.list().await.unwrap()[0].baseline_count, 4);
}

#[tokio::test]
async fn test_info_reports_entries_and_versions() {
    let tmp = TempDir::new().unwrap();
    let store = BaselineStore::open(&config(tmp.path())).await.unwrap();
    let capturer = FakeCapturer::new();
    store
        .generate(&capturer, Some(&[PageType::EnhancedModal]), None)
        .await
        .unwrap();
    store.backup(Some("modal")).await.unwrap();

    let info = store.info().await.unwrap();
    assert_eq!(info.entries.len(), 2);
    assert!(info.entries.iter().all(|e| e.checksum.len() == 64 && e.created_at.is_some()));
    assert_eq!(info.versions.len(), 1);
    assert!(info.metadata.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restore_never_hides_baselines_from_other_handles() {
    let tmp = TempDir::new().unwrap();
    let writer = BaselineStore::open(&config(tmp.path())).await.unwrap();
    let reader = Arc::new(BaselineStore::open(&config(tmp.path())).await.unwrap());
    let capturer = FakeCapturer::new();
    writer
        .generate(&capturer, Some(&[PageType::Login]), None)
        .await
        .unwrap();
    writer.backup(Some("v1")).await.unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let loads = {
        let (reader, stop) = (reader.clone(), stop.clone());
        tokio::spawn(async move {
            let (mut reads, mut missing) = (0usize, 0usize);
            while !stop.load(Ordering::SeqCst) {
                if reader
                    .load_baseline(key(PageType::Login, Viewport::Desktop))
                    .await
                    .unwrap()
                    .is_none()
                {
                    missing += 1;
                }
                reads += 1;
            }
            (reads, missing)
        })
    };
    let compares = {
        let (reader, stop) = (reader.clone(), stop.clone());
        tokio::spawn(async move {
            let mut mismatched = 0usize;
            while !stop.load(Ordering::SeqCst) {
                let diff = reader.compare(CURRENT, "v1").await.unwrap();
                if diff.count(|c| *c == EntryChange::Identical) != 4 {
                    mismatched += 1;
                }
            }
            mismatched
        })
    };

    for _ in 0..100 {
        writer.restore("v1").await.unwrap();
    }
    stop.store(true, Ordering::SeqCst);

    let (reads, missing) = loads.await.unwrap();
    assert!(reads > 0);
    assert_eq!(missing, 0, "baseline reported missing during restores");
    assert_eq!(compares.await.unwrap(), 0);

    // Only the published corpus survives the swaps
    let corpora = std::fs::read_dir(tmp.path())
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .file_name()
                .to_string_lossy()
                .starts_with(".corpus-")
        })
        .count();
    assert_eq!(corpora, 1);
}

#[tokio::test]
async fn test_failed_restore_keeps_published_corpus() {
    let tmp = TempDir::new().unwrap();
    let store = BaselineStore::open(&config(tmp.path())).await.unwrap();
    let capturer = FakeCapturer::new();
    store
        .generate(&capturer, Some(&[PageType::Orders]), None)
        .await
        .unwrap();
    store.backup(Some("broken")).await.unwrap();
    // An image path that cannot be copied fails the restore mid-way
    std::fs::create_dir(store.versions_dir().join("broken").join("register@desktop.png")).unwrap();

    capturer.set_variant(1);
    store
        .generate(&capturer, Some(&[PageType::Orders]), None)
        .await
        .unwrap();
    let before = snapshot(store.baseline_dir());

    assert!(store.restore("broken").await.is_err());
    assert_eq!(snapshot(store.baseline_dir()), before);
    let corpora = std::fs::read_dir(tmp.path())
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .file_name()
                .to_string_lossy()
                .starts_with(".corpus-")
        })
        .count();
    assert_eq!(corpora, 1);
}

#[tokio::test]
async fn test_require_baseline_reports_missing_key() {
    let tmp = TempDir::new().unwrap();
    let store = BaselineStore::open(&config(tmp.path())).await.unwrap();
    match store.require_baseline(key(PageType::Login, Viewport::Tablet)).await {
        Err(Error::MissingBaseline(k)) => assert_eq!(k, "login@tablet"),
        other => panic!("expected missing baseline, got {:?}", other.map(|b| b.key)),
    }
}
