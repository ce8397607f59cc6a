//! Versioned baseline corpus
//!
//! Layout under the configured root:
//!
//! ```text
//! baseline -> .corpus-<id>     pointer to the published corpus
//! .corpus-<id>/                one PNG per (page, viewport)
//!   login@desktop.png
//!   baseline_metadata.json
//! baseline_versions/
//!   backup_20240101_120000/    frozen copy of a corpus plus version.json
//! .baseline.lock               held by the process mutating the corpus
//! ```
//!
//! A published corpus directory is never modified. Mutating operations hold
//! the in-process writer lock and the lock file, build a complete new corpus
//! next to the old one and publish it by renaming a fresh `baseline` symlink
//! over the old one. The pointer path therefore always resolves, in every
//! process, to either the old or the new corpus.
//!
//! Readers resolve the pointer once and read from that corpus directory.
//! Retired corpora are deleted right after publication, so a read that loses
//! the race sees the pointer move and starts over on the new corpus.

mod lock;
mod metadata;

pub use lock::{StoreLock, StoreLockGuard};
pub use metadata::{
    BaselineEntry, CorpusMetadata, ModuleRecord, VersionRecord, ViewportRecord, METADATA_FILE,
    VERSION_FILE,
};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use visreg_common::{
    checksum, BaselineKey, CaptureError, Error, PageType, Result, SimilarityScores, Viewport,
    VisregConfig,
};

use crate::capture::{CaptureRequest, Capturer};
use crate::similarity::{decode, SimilarityEngine};

/// Name accepted by [`BaselineStore::compare`] for the mutable corpus
pub const CURRENT: &str = "current";

const CORPUS_PREFIX: &str = ".corpus-";

/// Reads restarted because the corpus was republished underneath them
const REPUBLISH_RETRIES: usize = 16;

/// Decoded capture (PNG bytes, width, height) or why there is none
type CaptureOutcome = std::result::Result<(Vec<u8>, u32, u32), String>;

/// A baseline image loaded from the current corpus
#[derive(Debug, Clone)]
pub struct Baseline {
    pub key: BaselineKey,
    pub bytes: Vec<u8>,
    pub checksum: String,
}

/// Per page type outcome of [`BaselineStore::generate`]
#[derive(Debug, Clone, Serialize)]
pub struct ModuleOutcome {
    pub page: PageType,
    pub created: Vec<Viewport>,
    pub errors: Vec<(Viewport, String)>,
}

impl ModuleOutcome {
    fn new(page: PageType) -> Self {
        Self {
            page,
            created: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateReport {
    pub modules: Vec<ModuleOutcome>,
    /// Version taken of the previous corpus before it was overwritten
    pub backup: Option<String>,
}

impl GenerateReport {
    pub fn created(&self) -> usize {
        self.modules.iter().map(|m| m.created.len()).sum()
    }

    pub fn failed(&self) -> usize {
        self.modules.iter().map(|m| m.errors.len()).sum()
    }

    pub fn succeeded(&self) -> bool {
        self.modules.iter().all(ModuleOutcome::succeeded)
    }
}

/// How one baseline differs between two sides of a comparison
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum EntryChange {
    /// Only on the right-hand side
    Added,
    /// Only on the left-hand side
    Removed,
    /// Byte-identical
    Identical,
    Changed { scores: SimilarityScores },
    Unreadable { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryComparison {
    pub key: BaselineKey,
    #[serde(flatten)]
    pub change: EntryChange,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionComparison {
    pub left: String,
    pub right: String,
    pub entries: Vec<EntryComparison>,
}

impl VersionComparison {
    pub fn count(&self, pred: impl Fn(&EntryChange) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.change)).count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryInfo {
    pub key: BaselineKey,
    pub file: String,
    pub size_bytes: u64,
    pub checksum: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Snapshot returned by [`BaselineStore::info`]
#[derive(Debug, Clone, Serialize)]
pub struct CorpusInfo {
    pub baseline_dir: PathBuf,
    pub entries: Vec<EntryInfo>,
    pub versions: Vec<VersionRecord>,
    pub metadata: Option<CorpusMetadata>,
}

pub struct BaselineStore {
    root: PathBuf,
    baseline_dir: PathBuf,
    versions_dir: PathBuf,
    lock: StoreLock,
    writer: Mutex<()>,
    engine: SimilarityEngine,
    base_url: String,
    fixture_order_id: u64,
    backup_before_generate: bool,
    workers: usize,
    unit_timeout: Duration,
}

impl BaselineStore {
    pub async fn open(config: &VisregConfig) -> Result<Self> {
        let baseline_dir = config.baseline_dir();
        let versions_dir = config.versions_dir();
        fs::create_dir_all(&config.root).await?;
        fs::create_dir_all(&versions_dir).await?;

        let store = Self {
            root: config.root.clone(),
            baseline_dir,
            versions_dir,
            lock: StoreLock::new(config.lock_path(), &config.store_lock),
            writer: Mutex::new(()),
            engine: SimilarityEngine::new(config.similarity.clone())?,
            base_url: config.base_url.clone(),
            fixture_order_id: config.fixture_order_id,
            backup_before_generate: config.backup_before_generate,
            workers: config.capture.workers.max(1),
            unit_timeout: Duration::from_millis(config.capture.unit_timeout_ms),
        };
        store.ensure_published().await?;
        Ok(store)
    }

    /// Make sure the `baseline` pointer exists. A first open publishes an
    /// empty corpus; a plain `baseline/` directory is adopted as a corpus.
    async fn ensure_published(&self) -> Result<()> {
        if is_symlink(&self.baseline_dir).await? {
            return Ok(());
        }
        let _writer = self.writer.lock().await;
        let _lock = self.lock.acquire().await?;

        match fs::symlink_metadata(&self.baseline_dir).await {
            Ok(meta) if meta.file_type().is_symlink() => Ok(()),
            Ok(meta) if meta.is_dir() => {
                let corpus = self.new_corpus_dir();
                fs::rename(&self.baseline_dir, &corpus).await?;
                info!(corpus = %corpus.display(), "Adopted existing baseline directory");
                self.publish(&corpus).await
            }
            Ok(_) => Err(Error::InvalidConfig(format!(
                "{} exists and is not a baseline corpus",
                self.baseline_dir.display()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let corpus = self.new_corpus_dir();
                fs::create_dir_all(&corpus).await?;
                self.publish(&corpus).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The `baseline` pointer; resolves to the published corpus
    pub fn baseline_dir(&self) -> &Path {
        &self.baseline_dir
    }

    pub fn versions_dir(&self) -> &Path {
        &self.versions_dir
    }

    /// Capture every (page, viewport) in scope and publish the results as
    /// the new current baselines. A failed capture or write is recorded
    /// against its module and never stops the rest of the scope; any other
    /// failure leaves the published corpus untouched.
    pub async fn generate<C: Capturer + ?Sized>(
        &self,
        capturer: &C,
        pages: Option<&[PageType]>,
        viewport: Option<Viewport>,
    ) -> Result<GenerateReport> {
        let keys = BaselineKey::scope(pages, viewport);
        info!(count = keys.len(), "Generating baselines");

        let timeout_ms = self.unit_timeout.as_millis() as u64;
        let captures: Vec<(BaselineKey, CaptureOutcome)> =
            stream::iter(keys)
                .map(|key| async move {
                    let request = CaptureRequest::for_key(key, &self.base_url, self.fixture_order_id);
                    let outcome =
                        match tokio::time::timeout(self.unit_timeout, capturer.capture(&request)).await {
                            Ok(Ok(image)) => decode(&image.bytes)
                                .map(|decoded| (image.bytes, decoded.width(), decoded.height()))
                                .map_err(|e| e.to_string()),
                            Ok(Err(e)) => Err(e.to_string()),
                            Err(_) => Err(CaptureError::Timeout { ms: timeout_ms }.to_string()),
                        };
                    (key, outcome)
                })
                .buffer_unordered(self.workers)
                .collect()
                .await;

        let _writer = self.writer.lock().await;
        let _lock = self.lock.acquire().await?;
        let current = self.current_corpus().await?;

        let backup = if self.backup_before_generate && !list_images(&current).await?.is_empty() {
            Some(self.backup_locked(&current, None).await?.name)
        } else {
            None
        };

        let staging = self.new_corpus_dir();
        let staged = async {
            copy_corpus(&current, &staging).await?;
            let mut metadata = CorpusMetadata::load(&staging).await?.unwrap_or_default();
            let now = Utc::now();
            let mut modules = write_captures(&staging, captures, &mut metadata, now).await;

            for module in modules.values_mut() {
                module.created.sort();
                module.errors.sort();
                let error = (!module.errors.is_empty()).then(|| {
                    module
                        .errors
                        .iter()
                        .map(|(vp, e)| format!("{}: {}", vp, e))
                        .collect::<Vec<_>>()
                        .join("; ")
                });
                metadata.modules.insert(
                    module.page.as_str().to_string(),
                    ModuleRecord {
                        name: module.page.config().display_name.to_string(),
                        success: module.succeeded(),
                        baselines_created: module.created.len(),
                        error,
                        created_at: now,
                    },
                );
            }

            metadata.created_at.get_or_insert(now);
            metadata.updated_at = Some(now);
            metadata.server_url = self.base_url.clone();
            metadata.save(&staging).await?;
            self.publish(&staging).await?;
            Ok::<_, Error>(modules)
        }
        .await;

        let modules = match staged {
            Ok(modules) => modules,
            Err(e) => {
                let _ = fs::remove_dir_all(&staging).await;
                return Err(e);
            }
        };

        let report = GenerateReport {
            modules: modules.into_values().collect(),
            backup,
        };
        info!(
            created = report.created(),
            failed = report.failed(),
            "Baseline generation finished"
        );
        Ok(report)
    }

    /// Freeze the current corpus as a new version. Without a name one is
    /// derived from the current time.
    pub async fn backup(&self, name: Option<&str>) -> Result<VersionRecord> {
        let _writer = self.writer.lock().await;
        let _lock = self.lock.acquire().await?;
        let current = self.current_corpus().await?;
        self.backup_locked(&current, name).await
    }

    async fn backup_locked(&self, corpus: &Path, name: Option<&str>) -> Result<VersionRecord> {
        let name = match name {
            Some(name) => {
                validate_version_name(name)?;
                if self.versions_dir.join(name).exists() {
                    return Err(Error::VersionExists(name.to_string()));
                }
                name.to_string()
            }
            None => self.auto_version_name(),
        };

        let sequence = self.next_sequence().await?;
        let staging = self.versions_dir.join(format!(".staging-{}", Uuid::new_v4()));
        let result = async {
            let baseline_count = copy_corpus(corpus, &staging).await?;
            let record = VersionRecord {
                name: name.clone(),
                created_at: Utc::now(),
                sequence,
                baseline_count,
            };
            record.save(&staging).await?;
            fs::rename(&staging, self.versions_dir.join(&name)).await?;
            Ok::<_, Error>(record)
        }
        .await;

        match result {
            Ok(record) => {
                info!(
                    version = %record.name,
                    baselines = record.baseline_count,
                    "Created baseline version"
                );
                Ok(record)
            }
            Err(e) => {
                let _ = fs::remove_dir_all(&staging).await;
                Err(e)
            }
        }
    }

    /// Replace the current corpus with the contents of version `name`.
    /// The copy is staged in full and then published, so a failure leaves
    /// the previous corpus in place and readers never see a gap.
    pub async fn restore(&self, name: &str) -> Result<VersionRecord> {
        validate_version_name(name)?;
        let _writer = self.writer.lock().await;
        let _lock = self.lock.acquire().await?;

        let source = self.versions_dir.join(name);
        if !source.join(VERSION_FILE).exists() {
            return Err(Error::VersionNotFound(name.to_string()));
        }
        let record = VersionRecord::load(&source).await?;

        let staging = self.new_corpus_dir();
        let staged = async {
            copy_corpus(&source, &staging).await?;
            self.publish(&staging).await
        }
        .await;
        if let Err(e) = staged {
            let _ = fs::remove_dir_all(&staging).await;
            return Err(e);
        }

        info!(version = %name, baselines = record.baseline_count, "Restored baseline version");
        Ok(record)
    }

    /// Versions, oldest first
    pub async fn list(&self) -> Result<Vec<VersionRecord>> {
        let mut versions = Vec::new();
        let mut dir = match fs::read_dir(&self.versions_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(versions),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !entry.file_type().await?.is_dir() {
                continue;
            }
            match VersionRecord::load(&entry.path()).await {
                Ok(record) => versions.push(record),
                Err(e) => warn!(version = %name, "Skipping unreadable version: {}", e),
            }
        }
        versions.sort_by(|a, b| {
            (a.sequence, a.created_at, &a.name).cmp(&(b.sequence, b.created_at, &b.name))
        });
        Ok(versions)
    }

    /// Compare two versions (either may be [`CURRENT`]) over the union of
    /// their baselines
    pub async fn compare(&self, left: &str, right: &str) -> Result<VersionComparison> {
        let left_images = self.read_side(left).await?;
        let right_images = self.read_side(right).await?;

        let keys: BTreeSet<BaselineKey> = left_images
            .keys()
            .chain(right_images.keys())
            .copied()
            .collect();

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let change = match (left_images.get(&key), right_images.get(&key)) {
                (Some(a), Some(b)) if a == b => EntryChange::Identical,
                (Some(a), Some(b)) => match self.engine.compare_bytes(a, b) {
                    Ok(scores) => EntryChange::Changed { scores },
                    Err(e) => EntryChange::Unreadable { error: e.to_string() },
                },
                (Some(_), None) => EntryChange::Removed,
                (None, Some(_)) => EntryChange::Added,
                (None, None) => continue,
            };
            entries.push(EntryComparison { key, change });
        }

        Ok(VersionComparison {
            left: left.to_string(),
            right: right.to_string(),
            entries,
        })
    }

    /// Keep the `keep` most recent versions and delete the rest.
    /// Returns the names removed.
    pub async fn clean(&self, keep: usize) -> Result<Vec<String>> {
        let _writer = self.writer.lock().await;
        let _lock = self.lock.acquire().await?;

        let versions = self.list().await?;
        let excess = versions.len().saturating_sub(keep);
        let mut removed = Vec::with_capacity(excess);
        for version in versions.into_iter().take(excess) {
            fs::remove_dir_all(self.versions_dir.join(&version.name)).await?;
            info!(version = %version.name, "Removed baseline version");
            removed.push(version.name);
        }
        Ok(removed)
    }

    pub async fn info(&self) -> Result<CorpusInfo> {
        let (entries, metadata) = self
            .read_current(|corpus| async move { describe_corpus(&corpus).await })
            .await?;
        Ok(CorpusInfo {
            baseline_dir: self.baseline_dir.clone(),
            entries,
            versions: self.list().await?,
            metadata,
        })
    }

    /// Current baseline for `key`, if one has been approved
    pub async fn load_baseline(&self, key: BaselineKey) -> Result<Option<Baseline>> {
        let file = key.file_name();
        let bytes = self
            .read_current(|corpus| {
                let path = corpus.join(&file);
                async move {
                    match fs::read(&path).await {
                        Ok(bytes) => Ok(Some(bytes)),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                        Err(e) => Err(e.into()),
                    }
                }
            })
            .await?;
        Ok(bytes.map(|bytes| Baseline {
            key,
            checksum: checksum(&bytes),
            bytes,
        }))
    }

    /// Current baseline for `key`, or [`Error::MissingBaseline`] when none
    /// has been approved yet
    pub async fn require_baseline(&self, key: BaselineKey) -> Result<Baseline> {
        self.load_baseline(key)
            .await?
            .ok_or_else(|| Error::MissingBaseline(key.to_string()))
    }

    async fn read_side(&self, name: &str) -> Result<BTreeMap<BaselineKey, Vec<u8>>> {
        if name == CURRENT {
            return self
                .read_current(|corpus| async move { read_images(&corpus).await })
                .await;
        }
        validate_version_name(name)?;
        let dir = self.versions_dir.join(name);
        if !dir.join(VERSION_FILE).exists() {
            return Err(Error::VersionNotFound(name.to_string()));
        }
        read_images(&dir).await
    }

    /// Directory the `baseline` pointer currently resolves to
    async fn current_corpus(&self) -> Result<PathBuf> {
        let target = fs::read_link(&self.baseline_dir).await?;
        Ok(self.root.join(target))
    }

    fn new_corpus_dir(&self) -> PathBuf {
        self.root.join(format!("{}{}", CORPUS_PREFIX, Uuid::new_v4()))
    }

    /// Run `read` against the published corpus. The pointer is checked again
    /// afterwards; if it moved, the corpus may have been deleted mid-read and
    /// the read starts over.
    async fn read_current<T, F, Fut>(&self, read: F) -> Result<T>
    where
        F: Fn(PathBuf) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        for attempt in 1..=REPUBLISH_RETRIES {
            let corpus = self.current_corpus().await?;
            let outcome = read(corpus.clone()).await;
            if self.current_corpus().await? == corpus {
                return outcome;
            }
            debug!(attempt, "Corpus republished during read, retrying");
        }
        Err(Error::StoreLockConflict {
            attempts: REPUBLISH_RETRIES,
        })
    }

    /// Point `baseline` at `corpus` and delete the corpus it replaced.
    /// Callers hold the writer lock and the lock file.
    async fn publish(&self, corpus: &Path) -> Result<()> {
        let target = corpus
            .file_name()
            .ok_or_else(|| Error::Internal(format!("no corpus name in {}", corpus.display())))?;
        let previous = match fs::read_link(&self.baseline_dir).await {
            Ok(previous) => Some(self.root.join(previous)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let link = self.root.join(format!(".baseline-link-{}", Uuid::new_v4()));
        fs::symlink(target, &link).await?;
        if let Err(e) = fs::rename(&link, &self.baseline_dir).await {
            let _ = fs::remove_file(&link).await;
            return Err(e.into());
        }
        debug!(corpus = %corpus.display(), "Published corpus");

        if let Some(previous) = previous.filter(|p| p.as_path() != corpus) {
            if let Err(e) = fs::remove_dir_all(&previous).await {
                warn!(path = %previous.display(), "Failed to remove retired corpus: {}", e);
            }
        }
        Ok(())
    }

    async fn next_sequence(&self) -> Result<u64> {
        Ok(self
            .list()
            .await?
            .iter()
            .map(|v| v.sequence)
            .max()
            .map_or(1, |max| max + 1))
    }

    fn auto_version_name(&self) -> String {
        let base = format!("backup_{}", Utc::now().format("%Y%m%d_%H%M%S"));
        let mut candidate = base.clone();
        let mut n = 2;
        while self.versions_dir.join(&candidate).exists() {
            candidate = format!("{}_{}", base, n);
            n += 1;
        }
        candidate
    }
}

/// Write via a sibling temp file and rename, so readers never see a partial file
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| Error::Internal(format!("no file name in {}", path.display())))?;
    let tmp = path.with_file_name(format!(".{}.tmp-{}", file_name, Uuid::new_v4()));
    fs::write(&tmp, bytes).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Write each successful capture into `dir` and record it in `metadata`.
/// A capture that cannot be written is reported as that key's error.
async fn write_captures(
    dir: &Path,
    captures: Vec<(BaselineKey, CaptureOutcome)>,
    metadata: &mut CorpusMetadata,
    now: DateTime<Utc>,
) -> BTreeMap<PageType, ModuleOutcome> {
    let mut modules: BTreeMap<PageType, ModuleOutcome> = BTreeMap::new();
    for (key, outcome) in captures {
        let module = modules
            .entry(key.page)
            .or_insert_with(|| ModuleOutcome::new(key.page));
        let (bytes, width, height) = match outcome {
            Ok(captured) => captured,
            Err(e) => {
                warn!(key = %key, "Baseline capture failed: {}", e);
                module.errors.push((key.viewport, e));
                continue;
            }
        };
        if let Err(e) = fs::write(dir.join(key.file_name()), &bytes).await {
            warn!(key = %key, "Failed to write baseline: {}", e);
            module
                .errors
                .push((key.viewport, format!("failed to write baseline: {}", e)));
            continue;
        }
        metadata.record_entry(BaselineEntry {
            page: key.page,
            viewport: key.viewport,
            width,
            height,
            checksum: checksum(&bytes),
            size_bytes: bytes.len() as u64,
            created_at: now,
        });
        debug!(key = %key, width, height, "Wrote baseline");
        module.created.push(key.viewport);
    }
    modules
}

async fn describe_corpus(dir: &Path) -> Result<(Vec<EntryInfo>, Option<CorpusMetadata>)> {
    let metadata = CorpusMetadata::load(dir).await?;
    let mut entries = Vec::new();
    for (key, path) in list_images(dir).await? {
        let bytes = fs::read(&path).await?;
        let created_at = metadata
            .as_ref()
            .and_then(|m| m.entries.get(&key.stem()))
            .map(|e| e.created_at);
        entries.push(EntryInfo {
            key,
            file: key.file_name(),
            size_bytes: bytes.len() as u64,
            checksum: checksum(&bytes),
            created_at,
        });
    }
    Ok((entries, metadata))
}

async fn is_symlink(path: &Path) -> Result<bool> {
    match fs::symlink_metadata(path).await {
        Ok(meta) => Ok(meta.file_type().is_symlink()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn validate_version_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && name != CURRENT
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!("invalid version name '{}'", name)))
    }
}

/// Baseline images in `dir` keyed by (page, viewport); unrelated files are ignored
async fn list_images(dir: &Path) -> Result<BTreeMap<BaselineKey, PathBuf>> {
    let mut images = BTreeMap::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(images),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("png") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        match BaselineKey::from_stem(stem) {
            Ok(key) => {
                images.insert(key, path);
            }
            Err(_) => debug!(file = %path.display(), "Ignoring unrecognised image"),
        }
    }
    Ok(images)
}

async fn read_images(dir: &Path) -> Result<BTreeMap<BaselineKey, Vec<u8>>> {
    let mut images = BTreeMap::new();
    for (key, path) in list_images(dir).await? {
        images.insert(key, fs::read(&path).await?);
    }
    Ok(images)
}

/// Copy baseline images and the metadata record from `from` into a new `to`
async fn copy_corpus(from: &Path, to: &Path) -> Result<usize> {
    fs::create_dir_all(to).await?;
    let images = list_images(from).await?;
    for (key, path) in &images {
        fs::copy(path, to.join(key.file_name())).await?;
    }
    let metadata = from.join(METADATA_FILE);
    if metadata.exists() {
        fs::copy(&metadata, to.join(METADATA_FILE)).await?;
    }
    Ok(images.len())
}
